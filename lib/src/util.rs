use crate::errors::{Error, Result};
use crate::options::PropertyNaming;

use std::io::BufReader;
use std::path::Path;
use std::sync::OnceLock;

use log::debug;
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::graph::Graph as OxigraphGraph;
use oxigraph::model::Triple;
use regex::Regex;
use reqwest::header::ACCEPT;

fn format_for_extension(path: &Path) -> RdfFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("xml") | Some("owl") | Some("rdf") => RdfFormat::RdfXml,
        Some("nt") => RdfFormat::NTriples,
        _ => RdfFormat::Turtle,
    }
}

fn parse_graph<R: std::io::Read>(
    reader: R,
    format: RdfFormat,
    name: &str,
) -> Result<OxigraphGraph> {
    let mut graph = OxigraphGraph::new();
    for quad in RdfParser::from_format(format).for_reader(reader) {
        let quad = quad.map_err(|e| Error::OntologyLoad {
            source_name: name.to_string(),
            reason: e.to_string(),
        })?;
        let triple = Triple::new(quad.subject, quad.predicate, quad.object);
        graph.insert(&triple);
    }
    Ok(graph)
}

pub fn read_file(file: &Path) -> Result<OxigraphGraph> {
    debug!("Reading file: {}", file.display());
    let name = file.display().to_string();
    let handle = std::fs::File::open(file).map_err(|e| Error::OntologyLoad {
        source_name: name.clone(),
        reason: e.to_string(),
    })?;
    parse_graph(BufReader::new(handle), format_for_extension(file), &name)
}

pub fn read_url(url: &str) -> Result<OxigraphGraph> {
    debug!("Reading url: {}", url);
    let load_err = |reason: String| Error::OntologyLoad {
        source_name: url.to_string(),
        reason,
    };

    let client = reqwest::blocking::Client::new();
    let resp = client
        .get(url)
        .header(ACCEPT, "text/turtle, application/rdf+xml;q=0.9, application/n-triples;q=0.8")
        .send()
        .map_err(|e| load_err(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(load_err(format!("HTTP status {}", resp.status())));
    }
    let content_type = resp
        .headers()
        .get("Content-Type")
        .and_then(|ct| ct.to_str().ok())
        .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_string());
    let format = match content_type.as_deref() {
        Some("application/rdf+xml") | Some("application/owl+xml") => RdfFormat::RdfXml,
        Some("application/n-triples") => RdfFormat::NTriples,
        Some("text/turtle") | Some("application/x-turtle") => RdfFormat::Turtle,
        other => {
            debug!("Unknown content type {:?}, guessing from url", other);
            format_for_extension(Path::new(url))
        }
    };
    let bytes = resp.bytes().map_err(|e| load_err(e.to_string()))?;
    parse_graph(std::io::Cursor::new(bytes), format, url)
}

fn camel_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("static regex"))
}

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s_\-]+").expect("static regex"))
}

fn words(label: &str) -> Vec<String> {
    let spaced = camel_boundary().replace_all(label.trim(), "$1 $2");
    separators()
        .split(&spaced)
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Normalizes a label to the ontology naming convention: lower sentence case
/// with single spaces ("BiologicalEntity", "biological_entity" and
/// "biological entity" all become "biological entity").
pub fn normalize_label(label: &str) -> String {
    words(label).join(" ")
}

/// "biological entity" -> "BiologicalEntity"
pub fn to_pascal_case(label: &str) -> String {
    words(label).iter().map(|w| capitalize(w)).collect()
}

pub fn to_snake_case(label: &str) -> String {
    words(label).join("_")
}

pub fn to_lower_camel_case(label: &str) -> String {
    let mut out = String::new();
    for (i, w) in words(label).iter().enumerate() {
        if i == 0 {
            out.push_str(w);
        } else {
            out.push_str(&capitalize(w));
        }
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Applies the configured property naming convention to a key.
pub fn coerce_property_key(key: &str, naming: PropertyNaming) -> String {
    match naming {
        PropertyNaming::Preserve => key.to_string(),
        PropertyNaming::SnakeCase => to_snake_case(key),
        PropertyNaming::LowerCamelCase => to_lower_camel_case(key),
    }
}

/// Local name of an IRI: the part after the last `#` or `/`.
pub fn iri_local_name(iri: &str) -> &str {
    iri.rsplit(['#', '/']).next().unwrap_or(iri)
}
