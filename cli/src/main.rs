use anyhow::{anyhow, Context, Result};
use biocypher::config::Config;
use biocypher::entity::Properties;
use biocypher::factory::{EdgeRecord, NodeRecord};
use biocypher::ledger::{Drift, VersionLedger};
use biocypher::BioCypher;
use clap::{Parser, Subcommand};
use log::info;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(name = "biocypher")]
#[command(about = "Reconcile biomedical records against an ontology and write neo4j-admin import files")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// Path to the YAML (or JSON) configuration file
    #[clap(long, short, default_value = "biocypher_config.yaml", global = true)]
    config: PathBuf,
    /// Strict mode - require ids, provenance fields and declared properties
    #[clap(long, action, global = true)]
    strict: bool,
    /// Output directory, overrides the configuration
    #[clap(long, short, global = true)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the ontology hierarchy after joining all tail ontologies
    Tree {
        /// Print GraphViz dot instead of the text figure
        #[clap(long, action)]
        dot: bool,
    },
    /// Print how every configured leaf label resolves onto the ontology
    Resolve {
        /// Print the mappings as JSON
        #[clap(long, action)]
        json: bool,
    },
    /// Read JSON-lines records, write the partition files and the import call
    Import {
        /// Record files, or directories searched for *.jsonl files
        #[clap(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Print the recorded ledger states
    Ledger,
    /// Print the effective configuration
    Config,
    /// Print the version
    Version,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawRecord {
    Node {
        id: String,
        label: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    #[serde(alias = "relationship")]
    Edge {
        source: String,
        target: String,
        label: String,
        #[serde(default)]
        properties: Map<String, Value>,
        #[serde(default)]
        as_node: bool,
    },
}

enum Record {
    Node(NodeRecord),
    Edge(EdgeRecord),
}

fn load_config(cmd: &Cli) -> Result<Config> {
    let mut config = if cmd.config.exists() {
        Config::from_file(&cmd.config)
            .with_context(|| format!("reading config {}", cmd.config.display()))?
    } else {
        info!("No config at {}, using defaults", cmd.config.display());
        Config::default()
    };
    if cmd.strict {
        config.biocypher.strict_mode = true;
    }
    if let Some(output) = &cmd.output {
        config.biocypher.output_directory = output.clone();
    }
    Ok(config)
}

/// Input files in a stable order: directories are walked for `.jsonl` and
/// `.ndjson` files sorted by name.
fn input_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry?;
                let ext = entry.path().extension().and_then(|e| e.to_str());
                if entry.file_type().is_file() && matches!(ext, Some("jsonl") | Some("ndjson")) {
                    files.push(entry.into_path());
                }
            }
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            return Err(anyhow!("input {} does not exist", input.display()));
        }
    }
    Ok(files)
}

fn read_records(path: &Path) -> Result<Vec<Record>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let at = || format!("{}:{}", path.display(), lineno + 1);
        let raw: RawRecord = serde_json::from_str(line).with_context(at)?;
        let record = match raw {
            RawRecord::Node { id, label, properties } => Record::Node(NodeRecord {
                properties: Properties::from_json(&label, &properties).with_context(at)?,
                id,
                label,
            }),
            RawRecord::Edge {
                source,
                target,
                label,
                properties,
                as_node,
            } => Record::Edge(EdgeRecord {
                properties: Properties::from_json(&label, &properties).with_context(at)?,
                source,
                target,
                label,
                as_node,
            }),
        };
        records.push(record);
    }
    Ok(records)
}

fn import(bc: &mut BioCypher, inputs: &[PathBuf]) -> Result<()> {
    let files = input_files(inputs)?;
    if files.is_empty() {
        return Err(anyhow!("no record files found"));
    }
    // nodes from every file first, so relationships can be checked against them
    for path in &files {
        let nodes: Vec<NodeRecord> = read_records(path)?
            .into_iter()
            .filter_map(|r| match r {
                Record::Node(n) => Some(n),
                Record::Edge(_) => None,
            })
            .collect();
        bc.write_nodes(nodes)?;
    }
    for path in &files {
        let edges: Vec<EdgeRecord> = read_records(path)?
            .into_iter()
            .filter_map(|r| match r {
                Record::Edge(e) => Some(e),
                Record::Node(_) => None,
            })
            .collect();
        bc.write_edges(edges)?;
    }
    let summary = bc.finish()?;
    let call = bc.write_import_call()?;
    println!(
        "Wrote {} nodes and {} relationships to {} files",
        summary.nodes,
        summary.edges,
        summary.files.len()
    );
    if summary.duplicate_nodes + summary.duplicate_edges > 0 {
        println!(
            "Skipped {} duplicate nodes and {} duplicate relationships",
            summary.duplicate_nodes, summary.duplicate_edges
        );
    }
    println!("Import call: {}", call.display());
    Ok(())
}

fn print_ledger(ledger: &VersionLedger) {
    if ledger.is_empty() {
        println!("No ledger states recorded.");
        return;
    }
    let current = ledger.current_version().map(|v| v.state_id);
    for state in ledger.states() {
        let marker = if Some(state.state_id) == current { "*" } else { " " };
        let digest: String = state.leaf_mapping_digest.chars().take(12).collect();
        println!(
            "{} {:>4}  {}  {}  {}  prior={}",
            marker,
            state.state_id,
            state.timestamp.to_rfc3339(),
            digest,
            state.ontology_source,
            state.prior_states
        );
    }
}

fn main() -> Result<()> {
    let cmd = Cli::parse();

    let log_level = if cmd.verbose { "info" } else { "warn" };
    let log_level = if cmd.debug { "debug" } else { log_level };
    std::env::set_var("RUST_LOG", log_level);
    biocypher::init_logging();
    env_logger::init();

    if let Commands::Version = cmd.command {
        println!("biocypher {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = load_config(&cmd)?;
    if cmd.verbose || cmd.debug {
        config.print();
    }

    match cmd.command {
        Commands::Config => {
            config.print();
        }
        Commands::Ledger => {
            let path = config
                .biocypher
                .ledger_path
                .as_ref()
                .ok_or_else(|| anyhow!("no ledger_path configured"))?;
            let ledger = VersionLedger::load_or_new(path)?;
            print_ledger(&ledger);
        }
        Commands::Tree { dot } => {
            let bc = BioCypher::new(config)?;
            if dot {
                println!("{}", bc.tree().to_dot());
            } else {
                print!("{}", bc.tree().render());
            }
        }
        Commands::Resolve { json } => {
            let bc = BioCypher::new(config)?;
            if json {
                let mappings: Vec<_> = bc.mappings().collect();
                println!("{}", serde_json::to_string_pretty(&mappings)?);
            } else {
                for m in bc.mappings() {
                    println!(
                        "{} [{}] -> {} ({})",
                        m.leaf,
                        m.input_labels.join(", "),
                        m.display_label,
                        m.ancestors.join(" > ")
                    );
                }
            }
        }
        Commands::Import { ref inputs } => {
            let mut bc = BioCypher::new(config)?;
            if let Drift::Changed { previous, current } = bc.drift() {
                println!("Leaf mappings changed since the last run ({} -> {})", previous, current);
            }
            import(&mut bc, inputs)?;
            println!("Ledger state {}", bc.state_id());
        }
        Commands::Version => {}
    }

    Ok(())
}
