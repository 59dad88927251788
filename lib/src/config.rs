//! Defines the configuration structures for a BioCypher run.
//! `Config` mirrors the YAML file layout (a `biocypher` section and a `neo4j`
//! section); `WriterConfig` is the flattened view the batch writer consumes.

use crate::consts::*;
use crate::errors::{Error, Result};
use crate::options::{DuplicatePolicy, PropertyNaming, RelationshipPolicy, SchemaMode};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HeadOntology {
    pub url: String,
    #[serde(default)]
    pub root_node: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TailOntology {
    pub url: String,
    pub head_join_node: String,
    pub tail_join_node: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BioCypherSettings {
    // required fields and provenance checks
    pub strict_mode: bool,
    // never talk to a live database
    pub offline: bool,
    pub output_directory: PathBuf,
    pub schema_config_path: Option<PathBuf>,
    pub head_ontology: Option<HeadOntology>,
    pub tail_ontologies: BTreeMap<String, TailOntology>,
    pub property_naming: PropertyNaming,
    pub ledger_path: Option<PathBuf>,
}

impl Default for BioCypherSettings {
    fn default() -> Self {
        Self {
            strict_mode: false,
            offline: true,
            output_directory: PathBuf::from(DEFAULT_OUTPUT_DIRECTORY),
            schema_config_path: None,
            head_ontology: None,
            tail_ontologies: BTreeMap::new(),
            property_naming: PropertyNaming::default(),
            ledger_path: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Neo4jSettings {
    pub database_name: String,
    pub wipe: bool,
    pub delimiter: char,
    pub array_delimiter: char,
    pub quote_character: char,
    pub skip_duplicate_nodes: bool,
    pub skip_bad_relationships: bool,
    pub schema_mode: SchemaMode,
    pub import_call_bin_prefix: String,
    pub import_call_file_prefix: Option<String>,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE.to_string(),
            wipe: false,
            delimiter: DEFAULT_DELIMITER,
            array_delimiter: DEFAULT_ARRAY_DELIMITER,
            quote_character: DEFAULT_QUOTE,
            skip_duplicate_nodes: false,
            skip_bad_relationships: false,
            schema_mode: SchemaMode::default(),
            import_call_bin_prefix: "bin/".to_string(),
            import_call_file_prefix: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub biocypher: BioCypherSettings,
    pub neo4j: Neo4jSettings,
}

impl Config {
    /// Reads a YAML config; files ending in `.json` are read as JSON.
    pub fn from_file(file: &Path) -> Result<Self> {
        let handle = std::fs::File::open(file)?;
        let reader = BufReader::new(handle);
        let config: Config = if file.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_reader(reader)?
        } else {
            serde_yaml::from_reader(reader)?
        };
        config.writer_config().validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(s)?;
        config.writer_config().validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_yaml::to_string(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    /// The writer's view of this configuration.
    pub fn writer_config(&self) -> WriterConfig {
        let n = &self.neo4j;
        WriterConfig {
            output_directory: self.biocypher.output_directory.clone(),
            database_name: n.database_name.clone(),
            delimiter: n.delimiter,
            array_delimiter: n.array_delimiter,
            quote: n.quote_character,
            duplicates: DuplicatePolicy::from(n.skip_duplicate_nodes),
            bad_relationships: RelationshipPolicy::from(n.skip_bad_relationships),
            schema_mode: n.schema_mode,
            wipe: n.wipe,
            import_call_bin_prefix: n.import_call_bin_prefix.clone(),
            import_call_file_prefix: n.import_call_file_prefix.clone(),
        }
    }

    /// Prints out the current Config in a clear and readable way for command line output.
    pub fn print(&self) {
        let b = &self.biocypher;
        let n = &self.neo4j;
        println!("Configuration:");
        println!("  Strict mode: {}", b.strict_mode);
        println!("  Offline: {}", b.offline);
        println!("  Output directory: {}", b.output_directory.display());
        if let Some(schema) = &b.schema_config_path {
            println!("  Schema config: {}", schema.display());
        }
        if let Some(head) = &b.head_ontology {
            println!("  Head ontology: {}", head.url);
            if let Some(root) = &head.root_node {
                println!("    root node: {}", root);
            }
        }
        for (name, tail) in &b.tail_ontologies {
            println!(
                "  Tail ontology {}: {} ({} -> {})",
                name, tail.url, tail.tail_join_node, tail.head_join_node
            );
        }
        println!("  Property naming: {:?}", b.property_naming);
        println!("  Database: {}", n.database_name);
        println!(
            "  Delimiters: field {:?}, array {:?}, quote {:?}",
            n.delimiter, n.array_delimiter, n.quote_character
        );
        println!("  Skip duplicate nodes: {}", n.skip_duplicate_nodes);
        println!("  Skip bad relationships: {}", n.skip_bad_relationships);
        println!("  Schema mode: {:?}", n.schema_mode);
        println!("  Wipe: {}", n.wipe);
    }
}

/// Everything the batch writer needs, built with `WriterConfig::builder()`.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into))]
pub struct WriterConfig {
    #[builder(default = "PathBuf::from(DEFAULT_OUTPUT_DIRECTORY)")]
    pub output_directory: PathBuf,
    #[builder(default = "DEFAULT_DATABASE.to_string()")]
    pub database_name: String,
    #[builder(default = "DEFAULT_DELIMITER")]
    pub delimiter: char,
    #[builder(default = "DEFAULT_ARRAY_DELIMITER")]
    pub array_delimiter: char,
    #[builder(default = "DEFAULT_QUOTE")]
    pub quote: char,
    #[builder(default)]
    pub duplicates: DuplicatePolicy,
    #[builder(default)]
    pub bad_relationships: RelationshipPolicy,
    #[builder(default)]
    pub schema_mode: SchemaMode,
    #[builder(default)]
    pub wipe: bool,
    #[builder(default = "\"bin/\".to_string()")]
    pub import_call_bin_prefix: String,
    #[builder(default)]
    pub import_call_file_prefix: Option<String>,
}

impl WriterConfig {
    pub fn builder() -> WriterConfigBuilder {
        WriterConfigBuilder::default()
    }

    /// Delimiters must be single ASCII characters, distinct from each other,
    /// and must not be line breaks.
    pub fn validate(&self) -> Result<()> {
        let chars = [
            ("delimiter", self.delimiter),
            ("array_delimiter", self.array_delimiter),
            ("quote_character", self.quote),
        ];
        for (name, c) in chars {
            if !c.is_ascii() || c == '\n' || c == '\r' {
                return Err(Error::Config(format!(
                    "{} must be a single ASCII character other than a line break, got {:?}",
                    name, c
                )));
            }
        }
        if self.delimiter == self.array_delimiter
            || self.delimiter == self.quote
            || self.array_delimiter == self.quote
        {
            return Err(Error::Config(format!(
                "delimiter {:?}, array delimiter {:?} and quote {:?} must differ",
                self.delimiter, self.array_delimiter, self.quote
            )));
        }
        Ok(())
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Config::default().writer_config()
    }
}
