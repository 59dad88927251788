//! Defines constant NamedNodeRefs for the RDF terms the ontology loader reads,
//! and the defaults and header tokens used by the neo4j-admin writer.

use oxigraph::model::NamedNodeRef;

pub const SUBCLASS_OF: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#subClassOf");
pub const LABEL: NamedNodeRef<'_> =
    NamedNodeRef::new_unchecked("http://www.w3.org/2000/01/rdf-schema#label");

// writer defaults
pub const DEFAULT_DELIMITER: char = ';';
pub const DEFAULT_ARRAY_DELIMITER: char = '|';
pub const DEFAULT_QUOTE: char = '\'';
pub const DEFAULT_DATABASE: &str = "neo4j";
pub const DEFAULT_OUTPUT_DIRECTORY: &str = "biocypher-out";
pub const IMPORT_CALL_FILE: &str = "neo4j-admin-import-call.sh";
pub const PARTIAL_SUFFIX: &str = ".partial";

// neo4j-admin header tokens
pub const ID_COLUMN: &str = ":ID";
pub const LABEL_COLUMN: &str = ":LABEL";
pub const START_ID_COLUMN: &str = ":START_ID";
pub const END_ID_COLUMN: &str = ":END_ID";
pub const TYPE_COLUMN: &str = ":TYPE";

// provenance properties required in strict mode
pub const STRICT_PROPERTIES: [&str; 3] = ["source", "licence", "version"];

// node property carrying the configured preferred identifier namespace
pub const PREFERRED_ID_KEY: &str = "preferred_id";

// relationship-as-node wiring
pub const SOURCE_EDGE_LABEL: &str = "IS_SOURCE_OF";
pub const TARGET_EDGE_LABEL: &str = "IS_TARGET_OF";

// version ledger meta-entities
pub const VERSION_NODE_LABEL: &str = "BioCypher";
pub const VERSION_EDGE_LABEL: &str = "PRECEDES";
