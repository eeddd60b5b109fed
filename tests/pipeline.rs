//! End-to-end pipeline runs: config → sources → tables and manifest

mod common;

use biomerge::export::load_manifest;
use biomerge::{PropertyValue, RunMode, RunStatus};
use common::{entity, relation, Workspace, BASE_ONTOLOGY};
use serde_json::{json, Value};

fn two_source_config(extra: &str) -> String {
    format!(
        "ontology: base.yaml\nsources:\n  - name: A\n    snapshot: a.jsonl\n  - name: B\n    snapshot: b.jsonl\n{}",
        extra
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retyped_property_fails_only_the_declaring_source() {
    let ws = Workspace::new();
    ws.snapshot("a.jsonl", &[entity("Protein", &["uniprot:P1"], json!({"mass": 1.5}))]);
    ws.snapshot("b.jsonl", &[entity("Protein", &["uniprot:P2"], json!({}))]);
    ws.snapshot("c.jsonl", &[entity("Protein", &["uniprot:P3"], json!({}))]);
    ws.config(
        r#"
sources:
  - name: A
    snapshot: a.jsonl
    ontology:
      Protein: { parent: Gene, properties: { mass: float } }
  - name: B
    snapshot: b.jsonl
    ontology:
      Protein: { parent: Gene, properties: { mass: int } }
  - name: C
    snapshot: c.jsonl
"#,
    );

    let manifest = ws.run(RunMode::Fresh).await;

    let a = manifest.run("A").unwrap();
    assert_eq!(a.status, RunStatus::Completed);
    assert_eq!(a.ontology_deltas.len(), 1);

    let b = manifest.run("B").unwrap();
    assert_eq!(b.status, RunStatus::Failed);
    assert_eq!(b.records_emitted, 0);
    assert!(b.error.as_deref().unwrap().contains("ontology conflict on type 'Protein'"));

    assert_eq!(manifest.run("C").unwrap().status, RunStatus::Completed);
    assert_eq!(ws.table_rows("nodes/Protein.psv").len(), 2);
    assert!(ws.read_output("ontology.yaml").contains("mass: float"));
}

#[tokio::test]
async fn shared_identifier_merges_across_sources() {
    let ws = Workspace::new();
    ws.write("base.yaml", BASE_ONTOLOGY);
    ws.snapshot("a.jsonl", &[entity("Protein", &["uniprot:P12345"], json!({}))]);
    ws.snapshot(
        "b.jsonl",
        &[entity("Protein", &["uniprot:P12345", "gene:ABC1"], json!({}))],
    );
    ws.config(&two_source_config(""));

    let manifest = ws.run(RunMode::Fresh).await;

    assert_eq!(manifest.entity_count, 1);
    let rows = ws.table_rows("nodes/Protein.psv");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].ends_with("|\"A;B\""), "row: {}", rows[0]);
}

#[tokio::test]
async fn complex_links_existing_and_new_members() {
    let ws = Workspace::new();
    ws.write("base.yaml", BASE_ONTOLOGY);
    ws.snapshot("a.jsonl", &[entity("Protein", &["gene:GENE1"], json!({}))]);
    ws.snapshot(
        "b.jsonl",
        &[entity("Complex", &["gene:GENE1", "gene:GENE2"], json!({}))],
    );
    ws.config(&two_source_config(""));

    let manifest = ws.run(RunMode::Fresh).await;
    assert_eq!(manifest.run("B").unwrap().status, RunStatus::Completed);

    let proteins = ws.table_rows("nodes/Protein.psv");
    let genes = ws.table_rows("nodes/Gene.psv");
    assert_eq!(proteins.len(), 1);
    assert_eq!(genes.len(), 1);
    assert_eq!(ws.table_rows("nodes/Complex.psv").len(), 1);

    let protein_id = proteins[0].split('|').next().unwrap().to_string();
    let gene_id = genes[0].split('|').next().unwrap().to_string();
    assert_ne!(protein_id, gene_id);

    let edges = ws.table_rows("edges/has_member.psv");
    assert_eq!(edges.len(), 2);
    let targets: Vec<&str> = edges.iter().map(|row| row.split('|').nth(3).unwrap()).collect();
    assert!(targets.contains(&protein_id.as_str()));
    assert!(targets.contains(&gene_id.as_str()));
    assert_eq!(manifest.entity_count, 3);
}

fn numbered_proteins(count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| entity("Protein", &[format!("uniprot:P{}", i).as_str()], json!({"mass": i as f64})))
        .collect()
}

fn write_lines(ws: &Workspace, relative: &str, records: &[Value], malformed_at: Option<usize>) {
    let mut text = String::new();
    for (index, record) in records.iter().enumerate() {
        if malformed_at == Some(index + 1) {
            text.push_str("{\"type\": \"Protein\", \"ids\": [\n");
        } else {
            text.push_str(&record.to_string());
            text.push('\n');
        }
    }
    ws.write(relative, &text);
}

fn resume_workspace() -> Workspace {
    let ws = Workspace::new();
    ws.write("base.yaml", BASE_ONTOLOGY);
    ws.snapshot("a.jsonl", &[entity("Gene", &["gene:ABC1"], json!({"symbol": "ABC1"}))]);
    write_lines(&ws, "b.jsonl", &numbered_proteins(500), Some(101));
    ws.snapshot(
        "c.jsonl",
        &[
            relation("interacts_with", ("Protein", "uniprot:P1"), ("Protein", "uniprot:P2")),
            entity("Protein", &["uniprot:P3"], json!({"synonyms": ["p3"]})),
        ],
    );
    ws.config(
        "ontology: base.yaml\nsources:\n  - name: A\n    snapshot: a.jsonl\n  - name: B\n    snapshot: b.jsonl\n  - name: C\n    snapshot: c.jsonl\n",
    );
    ws
}

#[tokio::test]
async fn failed_source_keeps_committed_records() {
    let ws = resume_workspace();
    let manifest = ws.run(RunMode::Fresh).await;

    let b = manifest.run("B").unwrap();
    assert_eq!(b.status, RunStatus::Failed);
    assert_eq!(b.records_emitted, 100);
    assert!(b.error.as_deref().unwrap().contains("b.jsonl:101"));

    assert_eq!(manifest.run("C").unwrap().status, RunStatus::Completed);
    assert_eq!(ws.table_rows("nodes/Protein.psv").len(), 100);
    assert_eq!(ws.table_rows("edges/interacts_with.psv").len(), 1);
}

#[tokio::test]
async fn resume_reruns_only_the_failed_source() {
    let ws = resume_workspace();
    ws.run(RunMode::Fresh).await;
    let first_tables = ws.tables();

    let manifest = ws.run(RunMode::Resume).await;
    let a = manifest.run("A").unwrap();
    let b = manifest.run("B").unwrap();
    let c = manifest.run("C").unwrap();
    assert!(a.replayed && c.replayed);
    assert!(!b.replayed);
    assert_eq!(b.status, RunStatus::Failed);
    assert_eq!(b.records_emitted, 100);
    assert_eq!(ws.tables(), first_tables);
}

#[tokio::test]
async fn resume_after_fix_matches_a_fresh_run() {
    let ws = resume_workspace();
    ws.run(RunMode::Fresh).await;

    write_lines(&ws, "b.jsonl", &numbered_proteins(500), None);
    let resumed = ws.run(RunMode::Resume).await;
    assert!(resumed.run("A").unwrap().replayed);
    assert!(resumed.run("C").unwrap().replayed);
    let b = resumed.run("B").unwrap();
    assert!(!b.replayed);
    assert_eq!(b.status, RunStatus::Completed);
    assert_eq!(b.records_emitted, 500);
    let resumed_tables = ws.tables();

    let fresh = ws.run(RunMode::Fresh).await;
    assert!(fresh.runs.iter().all(|run| !run.replayed));
    assert_eq!(ws.tables(), resumed_tables);
    assert_eq!(fresh.schema_revision, resumed.schema_revision);
    assert_eq!(ws.table_rows("nodes/Protein.psv").len(), 500);
}

#[tokio::test]
async fn scalar_conflict_keeps_first_writer() {
    let ws = Workspace::new();
    ws.write("base.yaml", BASE_ONTOLOGY);
    ws.snapshot("a.jsonl", &[entity("Protein", &["uniprot:P1"], json!({"mass": 120.1}))]);
    ws.snapshot("b.jsonl", &[entity("Protein", &["uniprot:P1"], json!({"mass": 118.0}))]);
    ws.config(&two_source_config(""));

    let manifest = ws.run(RunMode::Fresh).await;

    assert_eq!(manifest.conflicts.len(), 1);
    let conflict = &manifest.conflicts[0];
    assert_eq!(conflict.property, "mass");
    assert_eq!(conflict.kept_value, PropertyValue::Float(120.1));
    assert_eq!(conflict.kept_source, "A");
    assert_eq!(conflict.rejected_value, PropertyValue::Float(118.0));
    assert_eq!(conflict.rejected_source, "B");
    assert_eq!(manifest.run("B").unwrap().conflicts, 1);

    let rows = ws.table_rows("nodes/Protein.psv");
    assert!(rows[0].contains("|120.1|"), "row: {}", rows[0]);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

fn mixed_workspace() -> Workspace {
    let ws = Workspace::new();
    ws.write("base.yaml", BASE_ONTOLOGY);
    ws.snapshot(
        "a.jsonl",
        &[
            entity("Protein", &["uniprot:P1", "gene:TP53"], json!({"mass": 43.7, "synonyms": ["p53", "tumor; suppressor"]})),
            entity("Protein", &["uniprot:P2"], json!({"symbol": "MDM2 \"E3\"\nligase"})),
            relation("interacts_with", ("Protein", "uniprot:P1"), ("Protein", "uniprot:P2")),
            entity("Complex", &["gene:TP53", "gene:MDM2", "corum:42"], json!({})),
        ],
    );
    ws.snapshot(
        "b.jsonl",
        &[
            entity("Drug", &["drugbank:DB001"], json!({"approved": true, "targets": 2})),
            entity("Protein", &["gene:TP53"], json!({"synonyms": ["TP53"]})),
        ],
    );
    ws.config(&two_source_config("    extends_schema: true\n"));
    ws
}

#[tokio::test]
async fn fresh_runs_are_byte_identical() {
    let first = mixed_workspace();
    let second = mixed_workspace();
    first.run(RunMode::Fresh).await;
    second.run(RunMode::Fresh).await;

    let tables = first.tables();
    assert!(!tables.is_empty());
    assert_eq!(tables, second.tables());
    assert_eq!(
        first.read_output("ontology.yaml"),
        second.read_output("ontology.yaml")
    );

    first.run(RunMode::Fresh).await;
    assert_eq!(first.tables(), tables);
}

#[tokio::test]
async fn string_and_array_cells_are_escaped() {
    let ws = mixed_workspace();
    ws.run(RunMode::Fresh).await;

    let proteins = ws.read_output("nodes/Protein.psv");
    assert!(proteins.starts_with("canonical_id|type|mass|symbol|synonyms|provenance\n"));
    assert!(proteins.contains("\"MDM2 \"\"E3\"\" ligase\""));
    assert!(proteins.contains("tumor\\; suppressor"));
    assert!(proteins.contains("|43.7|"));
}

#[tokio::test]
async fn revisions_only_grow_in_run_order() {
    let ws = mixed_workspace();
    let manifest = ws.run(RunMode::Fresh).await;

    let revisions: Vec<u64> = manifest
        .runs
        .iter()
        .flat_map(|run| run.ontology_deltas.iter().map(|d| d.revision))
        .collect();
    assert!(!revisions.is_empty());
    assert!(revisions.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(manifest.schema_revision, *revisions.last().unwrap());

    let b = manifest.run("B").unwrap();
    assert!(b.ontology_deltas.iter().any(|d| d.type_name == "Drug"));
    assert_eq!(ws.table_rows("nodes/Drug.psv").len(), 1);
}

#[tokio::test]
async fn unauthorized_source_cannot_extend_schema() {
    let ws = Workspace::new();
    ws.write("base.yaml", BASE_ONTOLOGY);
    ws.snapshot(
        "a.jsonl",
        &[
            entity("Drug", &["drugbank:DB001"], json!({})),
            entity("Protein", &["uniprot:P1"], json!({"charge": -2, "mass": "heavy"})),
        ],
    );
    ws.snapshot("b.jsonl", &[]);
    ws.config(&two_source_config(""));

    let manifest = ws.run(RunMode::Fresh).await;
    let a = manifest.run("A").unwrap();
    assert_eq!(a.status, RunStatus::Completed);
    assert_eq!(a.records_emitted, 2);
    assert_eq!(a.records_rejected, 1);
    assert_eq!(a.schema_violations, 2);
    assert!(a.ontology_deltas.is_empty());
    assert_eq!(manifest.schema_violations.get("A"), Some(&2));

    let proteins = ws.read_output("nodes/Protein.psv");
    assert!(!proteins.contains("charge"));
    assert!(!ws.output_dir().join("nodes/Drug.psv").exists());
}

#[tokio::test]
async fn missing_and_disabled_sources_are_skipped() {
    let ws = Workspace::new();
    ws.snapshot("a.jsonl", &[entity("Gene", &["gene:A"], json!({}))]);
    ws.config(
        r#"
sources:
  - name: Missing
    snapshot: nowhere.jsonl
  - name: Off
    enabled: false
    records:
      - { type: Gene, ids: ["gene:B"] }
  - name: A
    snapshot: a.jsonl
"#,
    );

    let manifest = ws.run(RunMode::Fresh).await;
    assert_eq!(manifest.run("Missing").unwrap().status, RunStatus::Skipped);
    assert_eq!(manifest.run("Off").unwrap().status, RunStatus::Skipped);
    assert_eq!(manifest.run("A").unwrap().status, RunStatus::Completed);
    assert_eq!(manifest.entity_count, 1);
}

#[tokio::test]
async fn manifest_on_disk_matches_returned_manifest() {
    let ws = mixed_workspace();
    let manifest = ws.run(RunMode::Fresh).await;

    assert_eq!(load_manifest(ws.output_dir()).unwrap(), manifest);
    assert_eq!(manifest.runs.len(), 2);
    assert_eq!(manifest.runs[0].sequence_index, 0);
    assert_eq!(manifest.runs[1].sequence_index, 1);
    let mut listed: Vec<String> = manifest.tables.iter().map(|t| t.path.clone()).collect();
    listed.sort();
    let written: Vec<String> = ws.tables().into_iter().map(|(path, _)| path).collect();
    assert_eq!(listed, written);
}

#[tokio::test]
async fn inline_records_run_without_snapshots() {
    let ws = Workspace::new();
    ws.config(
        r#"
sources:
  - name: Curated
    extends_schema: true
    records:
      - { type: Gene, ids: ["gene:ABC1"], properties: { symbol: ABC1 } }
      - { type: Gene, ids: ["gene:ABC1", "hgnc:17"], properties: { symbol: ABC1 } }
"#,
    );

    let manifest = ws.run(RunMode::Fresh).await;
    assert_eq!(manifest.run("Curated").unwrap().records_emitted, 2);
    assert_eq!(manifest.entity_count, 1);
    assert!(manifest.conflicts.is_empty());
}

#[tokio::test]
async fn path_like_type_names_stay_inside_the_output_dir() {
    let ws = Workspace::new();
    ws.config(
        r#"
sources:
  - name: Rogue
    extends_schema: true
    records:
      - { type: "../../escaped", ids: ["x:1"] }
      - { type: "GO/term", ids: ["go:0001"] }
      - { type: Gene, ids: ["gene:ABC1"] }
"#,
    );

    let manifest = ws.run(RunMode::Fresh).await;
    let run = manifest.run("Rogue").unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_rejected, 2);
    assert_eq!(manifest.entity_count, 1);
    assert!(!ws.path().join("escaped.psv").exists());
    assert!(!ws.output_dir().join("nodes/GO").exists());
    assert_eq!(ws.table_rows("nodes/Gene.psv").len(), 1);
}
