use biocypher::config::WriterConfig;
use biocypher::entity::{BioCypherEdge, BioCypherNode, Entity, Properties, PropertyValue};
use biocypher::errors::{EntityKind, Error};
use biocypher::options::{DuplicatePolicy, RelationshipPolicy, SchemaMode};
use biocypher::writer::{read_partition, BatchWriter, PartitionState, RunStatus};
use std::fs;
use std::path::Path;
use tempdir::TempDir;

fn config(dir: &Path) -> WriterConfig {
    WriterConfig::builder()
        .output_directory(dir)
        .build()
        .unwrap()
}

fn node(id: &str, label: &str, props: Properties) -> Entity {
    Entity::Node(BioCypherNode::new(id, label, props))
}

fn edge(source: &str, target: &str, label: &str) -> Entity {
    Entity::Edge(BioCypherEdge::new(source, target, label, Properties::new()))
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}

#[test]
fn test_schema_drift_fails_fast() {
    let dir = TempDir::new("drift").unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    writer
        .write(vec![node("p1", "Protein", Properties::new().with("name", "a"))])
        .unwrap();
    let err = writer
        .write(vec![node(
            "p2",
            "Protein",
            Properties::new().with("name", "b").with("mass", 1.5),
        )])
        .unwrap_err();
    match err {
        Error::SchemaDrift { kind, label, id, key } => {
            assert_eq!(kind, EntityKind::Node);
            assert_eq!(label, "Protein");
            assert_eq!(id, "p2");
            assert_eq!(key, "mass");
        }
        other => panic!("expected schema drift, got {:?}", other),
    }
    assert!(matches!(writer.status(), RunStatus::Incomplete(_)));
    assert!(dir.path().join("Protein.csv.partial").exists());
    assert!(!dir.path().join("Protein.csv").exists());
}

#[test]
fn test_widen_mode_backfills_earlier_rows() {
    let dir = TempDir::new("widen").unwrap();
    let cfg = WriterConfig::builder()
        .output_directory(dir.path())
        .schema_mode(SchemaMode::Widen)
        .build()
        .unwrap();
    let mut writer = BatchWriter::new(cfg).unwrap();
    writer
        .write(vec![
            node("p1", "Protein", Properties::new().with("name", "a")),
            node("p2", "Protein", Properties::new().with("name", "b").with("mass", 1.5)),
        ])
        .unwrap();
    writer.finish().unwrap();

    let content = lines(&dir.path().join("Protein.csv"));
    assert_eq!(
        content,
        vec![
            ":ID;name:string;mass:double;:LABEL".to_string(),
            "p1;a;;Protein".to_string(),
            "p2;b;1.5;Protein".to_string(),
        ]
    );
}

#[test]
fn test_missing_properties_leave_empty_cells() {
    let dir = TempDir::new("sparse").unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    writer
        .write(vec![
            node("p1", "Protein", Properties::new().with("name", "a").with("length", 10i64)),
            node("p2", "Protein", Properties::new().with("length", 20i64)),
        ])
        .unwrap();
    writer.finish().unwrap();
    let content = lines(&dir.path().join("Protein.csv"));
    assert_eq!(content[2], "p2;;20;Protein");
}

#[test]
fn test_type_mismatch_is_a_serialization_error() {
    let dir = TempDir::new("types").unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    writer
        .write(vec![node("p1", "Protein", Properties::new().with("length", 10i64))])
        .unwrap();
    let err = writer
        .write(vec![node("p2", "Protein", Properties::new().with("length", "long"))])
        .unwrap_err();
    assert!(matches!(err, Error::Serialization { ref id, .. } if id == "p2"));
}

#[test]
fn test_duplicate_nodes_fail_by_default() {
    let dir = TempDir::new("dupes").unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    let err = writer
        .write(vec![
            node("p1", "Protein", Properties::new()),
            node("p1", "Protein", Properties::new()),
        ])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DuplicateEntity { kind: EntityKind::Node, ref id, .. } if id == "p1"
    ));
    assert!(matches!(writer.finish(), Err(Error::IncompleteRun { .. })));
}

#[test]
fn test_duplicate_nodes_skipped_and_counted() {
    let dir = TempDir::new("dupes").unwrap();
    let cfg = WriterConfig::builder()
        .output_directory(dir.path())
        .duplicates(DuplicatePolicy::Skip)
        .build()
        .unwrap();
    let mut writer = BatchWriter::new(cfg).unwrap();
    let written = writer
        .write(vec![
            node("p1", "Protein", Properties::new().with("name", "first")),
            node("p1", "Protein", Properties::new().with("name", "second")),
            node("g1", "Gene", Properties::new()),
            edge("g1", "p1", "ENCODES"),
            edge("g1", "p1", "ENCODES"),
        ])
        .unwrap();
    assert_eq!(written, 3);
    let summary = writer.finish().unwrap();
    assert_eq!(summary.nodes, 2);
    assert_eq!(summary.edges, 1);
    assert_eq!(summary.duplicate_nodes, 1);
    assert_eq!(summary.duplicate_edges, 1);
    assert_eq!(writer.duplicate_nodes().into_iter().collect::<Vec<_>>(), vec!["p1"]);
    assert_eq!(
        writer.duplicate_node_labels().into_iter().collect::<Vec<_>>(),
        vec!["Protein"]
    );
    assert_eq!(writer.count_duplicate_edges().get("ENCODES"), Some(&1));

    let content = lines(&dir.path().join("Protein.csv"));
    assert_eq!(content.len(), 2);
    assert_eq!(content[1], "p1;first;Protein");
}

#[test]
fn test_relationship_partition_layout() {
    let dir = TempDir::new("edges").unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    writer
        .write(vec![
            node("g1", "Gene", Properties::new()),
            node("p1", "Protein", Properties::new()),
            Entity::Edge(
                BioCypherEdge::new(
                    "g1",
                    "p1",
                    "GENE_TO_PROTEIN",
                    Properties::new().with("score", 0.5),
                )
                .with_id(Some("e1".to_string())),
            ),
        ])
        .unwrap();
    writer.finish().unwrap();
    let content = lines(&dir.path().join("GeneToProtein.csv"));
    assert_eq!(content[0], ":START_ID;id:string;score:double;:END_ID;:TYPE");
    assert_eq!(content[1], "g1;e1;0.5;p1;GENE_TO_PROTEIN");
}

#[test]
fn test_bad_relationships_kept_or_skipped() {
    for (policy, expected) in [(RelationshipPolicy::Keep, 1), (RelationshipPolicy::Skip, 0)] {
        let dir = TempDir::new("bad").unwrap();
        let cfg = WriterConfig::builder()
            .output_directory(dir.path())
            .bad_relationships(policy)
            .build()
            .unwrap();
        let mut writer = BatchWriter::new(cfg).unwrap();
        writer
            .write(vec![node("p1", "Protein", Properties::new()), edge("p1", "nowhere", "BINDS")])
            .unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.edges, expected);
        assert_eq!(summary.bad_relationships, 1);
        assert_eq!(dir.path().join("Binds.csv").exists(), expected == 1);
    }
}

#[test]
fn test_flushed_writer_rejects_rows() {
    let dir = TempDir::new("closed").unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    writer.write(vec![node("p1", "Protein", Properties::new())]).unwrap();
    writer.finish().unwrap();
    assert_eq!(
        writer.partition_state(EntityKind::Node, "Protein"),
        Some(PartitionState::Flushed)
    );
    let err = writer
        .write(vec![node("p2", "Protein", Properties::new())])
        .unwrap_err();
    assert!(matches!(err, Error::WriterClosed { .. }));
    // a second finish is a no-op
    assert_eq!(writer.finish().unwrap().nodes, 1);
}

#[test]
fn test_failed_publish_withdraws_earlier_files() {
    let dir = TempDir::new("publish").unwrap();
    // a directory in the way of the last partition's final name
    fs::create_dir(dir.path().join("Zzz.csv")).unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    writer
        .write(vec![
            node("a1", "Aaa", Properties::new()),
            node("z1", "Zzz", Properties::new()),
        ])
        .unwrap();
    assert!(writer.finish().is_err());
    assert!(matches!(writer.status(), RunStatus::Incomplete(_)));
    assert!(!dir.path().join("Aaa.csv").exists());
    assert!(dir.path().join("Aaa.csv.partial").exists());
    assert!(dir.path().join("Zzz.csv.partial").exists());
    assert!(matches!(writer.import_call(), Err(Error::IncompleteRun { .. })));
}

#[test]
fn test_empty_values_read_back_as_absent() {
    let dir = TempDir::new("empty").unwrap();
    let cfg = config(dir.path());
    let mut writer = BatchWriter::new(cfg.clone()).unwrap();
    let props = Properties::new()
        .with("name", "")
        .with("synonyms", Vec::<String>::new())
        .with("gene", "TP53");
    writer
        .write(vec![Entity::Node(BioCypherNode::new("p1", "Protein", props))])
        .unwrap();
    writer.finish().unwrap();
    assert_eq!(
        lines(&dir.path().join("Protein.csv"))[1],
        "p1;;;TP53;Protein"
    );

    let entities = read_partition(&dir.path().join("Protein.csv"), &cfg).unwrap();
    let Entity::Node(read) = &entities[0] else {
        panic!("expected a node");
    };
    assert_eq!(read.properties().keys().collect::<Vec<_>>(), vec!["gene"]);
}

#[test]
fn test_declared_columns_fix_header_order() {
    use biocypher::entity::{ColumnType, ScalarKind};
    let dir = TempDir::new("declared").unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    writer
        .declare(
            EntityKind::Node,
            "Protein",
            vec![
                ("length".to_string(), ColumnType::scalar(ScalarKind::Long)),
                ("name".to_string(), ColumnType::scalar(ScalarKind::String)),
            ],
        )
        .unwrap();
    assert_eq!(
        writer.partition_state(EntityKind::Node, "Protein"),
        Some(PartitionState::SchemaFixed)
    );
    writer
        .write(vec![node(
            "p1",
            "Protein",
            Properties::new().with("name", "a").with("length", 3i64),
        )])
        .unwrap();
    writer.finish().unwrap();
    let content = lines(&dir.path().join("Protein.csv"));
    assert_eq!(content[0], ":ID;length:long;name:string;:LABEL");
    assert_eq!(content[1], "p1;3;a;Protein");
}

#[test]
fn test_read_partition_restores_entities() {
    let dir = TempDir::new("read").unwrap();
    let cfg = config(dir.path());
    let mut writer = BatchWriter::new(cfg.clone()).unwrap();
    let protein = BioCypherNode::new(
        "p1",
        "Protein",
        Properties::new()
            .with("name", "TP53; tumor protein")
            .with("taxa", vec![9606i64, 10090])
            .with("reviewed", true),
    )
    .with_additional_labels(["BiologicalEntity"]);
    writer.write(vec![Entity::Node(protein.clone())]).unwrap();
    writer.finish().unwrap();

    let entities = read_partition(&dir.path().join("Protein.csv"), &cfg).unwrap();
    assert_eq!(entities.len(), 1);
    let Entity::Node(read) = &entities[0] else {
        panic!("expected a node");
    };
    assert_eq!(read, &protein);
    assert_eq!(
        read.properties().get("taxa"),
        Some(&PropertyValue::IntList(vec![9606, 10090]))
    );
}

#[test]
fn test_import_call_lists_published_files() {
    let dir = TempDir::new("call").unwrap();
    let cfg = WriterConfig::builder()
        .output_directory(dir.path())
        .database_name("kg")
        .wipe(true)
        .import_call_file_prefix(Some("/import/".to_string()))
        .build()
        .unwrap();
    let mut writer = BatchWriter::new(cfg).unwrap();
    writer
        .write(vec![
            node("g1", "Gene", Properties::new()),
            node("p1", "Protein", Properties::new()),
            edge("g1", "p1", "ENCODES"),
        ])
        .unwrap();
    writer.finish().unwrap();
    let path = writer.write_import_call().unwrap();
    assert_eq!(path, dir.path().join("neo4j-admin-import-call.sh"));
    let call = fs::read_to_string(path).unwrap();
    assert!(call.starts_with("bin/neo4j-admin import \\\n    --database=kg"));
    assert!(call.contains("--force=true"));
    assert!(call.contains("--nodes=\"/import/Gene.csv\""));
    assert!(call.contains("--nodes=\"/import/Protein.csv\""));
    assert!(call.contains("--relationships=\"/import/Encodes.csv\""));
    assert!(call.find("--nodes").unwrap() < call.find("--relationships").unwrap());
}

#[test]
fn test_label_file_collision_rejected() {
    let dir = TempDir::new("collide").unwrap();
    let mut writer = BatchWriter::new(config(dir.path())).unwrap();
    let err = writer
        .write(vec![
            node("p1", "Protein", Properties::new()),
            node("p2", "protein", Properties::new()),
        ])
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_invalid_delimiters_rejected() {
    let dir = TempDir::new("delims").unwrap();
    let cfg = WriterConfig::builder()
        .output_directory(dir.path())
        .array_delimiter(';')
        .build()
        .unwrap();
    assert!(matches!(BatchWriter::new(cfg), Err(Error::Config(_))));
}
