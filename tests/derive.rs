use std::collections::BTreeMap;
use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use c2m2_facts::domain::{CyclePolicy, EntityKey, EntityKind, Nid, VocabularyKind};
use c2m2_facts::error::FactError;
use c2m2_facts::pipeline::{DerivedLayer, Pipeline, PipelineOptions, SilentSink};
use c2m2_facts::store::OutputStore;
use c2m2_facts::submission::Submission;
use c2m2_facts::table::Datapackage;

const NS: &str = "tag:example.org,2024:";

fn fixture() -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/hmp")
}

fn fixture_tables() -> BTreeMap<String, String> {
    let mut tables = BTreeMap::new();
    for entry in fs::read_dir(fixture()).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        if let Some(stem) = name.strip_suffix(".tsv") {
            tables.insert(stem.to_string(), fs::read_to_string(&path).unwrap());
        }
    }
    tables
}

fn derive_tables(tables: BTreeMap<String, String>, options: PipelineOptions) -> DerivedLayer {
    let submission = Submission::load(&Datapackage::from_tables("memory", tables)).unwrap();
    Pipeline::new(options).derive(&submission, &SilentSink).unwrap()
}

fn derive_fixture() -> DerivedLayer {
    let pipeline = Pipeline::new(PipelineOptions::default());
    let submission = pipeline.load(&[fixture()], &SilentSink).unwrap();
    pipeline.derive(&submission, &SilentSink).unwrap()
}

fn key(local_id: &str) -> EntityKey {
    EntityKey::new(NS, local_id)
}

fn project(layer: &DerivedLayer, local_id: &str) -> Nid {
    layer.batch.ids.projects.lookup(&key(local_id)).unwrap()
}

fn term(layer: &DerivedLayer, kind: VocabularyKind, id: &str) -> Nid {
    layer.batch.vocab.lookup(kind, id).unwrap()
}

/// Reverses the data rows of a table, keeping the header in place.
fn reverse_rows(content: &str) -> String {
    let mut lines: Vec<&str> = content.lines().collect();
    lines[1..].reverse();
    lines.join("\n") + "\n"
}

fn rendered(fact: &serde_json::Value, field: &str) -> Vec<String> {
    fact[field]
        .as_array()
        .unwrap()
        .iter()
        .map(|value| value.as_str().unwrap().to_string())
        .collect()
}

fn describe(layer: &DerivedLayer, kind: EntityKind, local_id: &str) -> serde_json::Value {
    let (_, refs) = layer.entity(kind, &key(local_id)).unwrap();
    layer.describe_fact(refs.core).unwrap()
}

fn append(tables: &mut BTreeMap<String, String>, name: &str, header: &str, rows: &[String]) {
    let mut content = tables.get(name).cloned().unwrap_or_else(|| format!("{header}\n"));
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    tables.insert(name.to_string(), content);
}

/// The fixture plus a nested collection, a bundle, a role/taxon link and
/// files described directly by a subject.
fn extended_tables() -> BTreeMap<String, String> {
    let mut tables = fixture_tables();
    let file_header = "id_namespace\tlocal_id\tproject_id_namespace\tproject_local_id\tpersistent_id\tsize_in_bytes\tfilename\tfile_format\tdata_type\tmime_type\tbundle_collection_id_namespace\tbundle_collection_local_id";
    let mut files = vec![file_header.to_string()];
    for line in tables["file"].lines().skip(1) {
        files.push(format!("{line}\t\t"));
    }
    files.push(format!(
        "{NS}\tF3\t{NS}\tP2\t\t10\tf3.fastq\tformat:1930\tdata:2044\ttext/plain\t{NS}\tC2"
    ));
    files.push(format!(
        "{NS}\tF4\t{NS}\tP2\tdrs://example.org/F4\t70\tf4.tsv\tformat:3475\tdata:3002\ttext/tab-separated-values\t\t"
    ));
    tables.insert("file".to_string(), files.join("\n") + "\n");

    append(
        &mut tables,
        "collection",
        "id_namespace\tlocal_id\tabbreviation\tname",
        &[
            format!("{NS}\tC0\tC0\tUmbrella collection"),
            format!("{NS}\tC2\tC2\tBundle of F3"),
        ],
    );
    append(
        &mut tables,
        "collection_in_collection",
        "superset_collection_id_namespace\tsuperset_collection_local_id\tsubset_collection_id_namespace\tsubset_collection_local_id",
        &[format!("{NS}\tC0\t{NS}\tC1")],
    );
    append(
        &mut tables,
        "subject_role_taxonomy",
        "subject_id_namespace\tsubject_local_id\trole_id\ttaxonomy_id",
        &[format!("{NS}\tS1\tcfde_subject_role:0\tNCBI:txid9606")],
    );
    append(
        &mut tables,
        "file_describes_subject",
        "file_id_namespace\tfile_local_id\tsubject_id_namespace\tsubject_local_id",
        &[format!("{NS}\tF3\t{NS}\tS1")],
    );
    tables
}

#[test]
fn nested_projects_roll_up_to_the_registered_dcc() {
    let layer = derive_fixture();
    let p1 = project(&layer, "P1");
    let p2 = project(&layer, "P2");

    let mut pairs: Vec<_> = layer.closures.projects.pairs().collect();
    pairs.sort();
    let mut expected = vec![(p1, p1), (p1, p2), (p2, p2)];
    expected.sort();
    assert_eq!(pairs, expected);
    assert_eq!(layer.closures.project_roots, vec![p1]);

    let (_, refs) = layer.entity(EntityKind::File, &key("F1")).unwrap();
    let fact = layer.core_fact(refs.core).unwrap();
    assert_eq!(fact.dccs.as_slice(), &[p1]);
    assert_eq!(fact.project, Some(p2));
    assert_eq!(
        fact.anatomy,
        Some(term(&layer, VocabularyKind::Anatomy, "UBERON:0002107"))
    );
    assert_eq!(
        fact.subject_granularities.as_slice(),
        &[term(
            &layer,
            VocabularyKind::SubjectGranularity,
            "cfde_subject_granularity:0"
        )]
    );
    assert_eq!(
        fact.subject_species.as_slice(),
        &[term(&layer, VocabularyKind::NcbiTaxonomy, "NCBI:txid9606")]
    );
    assert_eq!(fact.diseases.len(), 1);
    assert!(fact.diseases.iter().all(|d| d.association_type.is_some()));
}

#[test]
fn collection_with_two_data_types_leaves_the_scalar_empty() {
    let layer = derive_fixture();
    let (_, refs) = layer.entity(EntityKind::Collection, &key("C1")).unwrap();
    let fact = layer.core_fact(refs.core).unwrap();

    let mut expected = vec![
        term(&layer, VocabularyKind::DataType, "data:2044"),
        term(&layer, VocabularyKind::DataType, "data:3002"),
    ];
    expected.sort();
    assert_eq!(fact.data_types.as_slice(), expected.as_slice());
    assert_eq!(fact.data_type, None);
    assert_eq!(fact.file_formats.len(), 2);
    assert_eq!(fact.file_format, None);
}

#[test]
fn nested_collection_rolls_up_its_subsets() {
    let layer = derive_tables(extended_tables(), PipelineOptions::default());
    let c0 = layer.batch.ids.collections.lookup(&key("C0")).unwrap();
    let c1 = layer.batch.ids.collections.lookup(&key("C1")).unwrap();
    assert!(layer.closures.collections.contains(c0, c1));
    assert!(!layer.closures.collections.contains(c1, c0));
    assert_eq!(layer.closures.collections.len(), 4);

    let umbrella = describe(&layer, EntityKind::Collection, "C0");
    assert_eq!(rendered(&umbrella, "data_types"), ["data:2044", "data:3002"]);
    assert_eq!(rendered(&umbrella, "subject_roles"), ["cfde_subject_role:0"]);
    assert_eq!(rendered(&umbrella, "ncbi_taxons"), ["NCBI:txid9606"]);
    assert_eq!(rendered(&umbrella, "dccs"), [format!("{NS}::P1")]);
    assert_eq!(umbrella["is_bundle"], false);

    let inner = describe(&layer, EntityKind::Collection, "C1");
    assert_eq!(
        rendered(&inner, "data_types"),
        rendered(&umbrella, "data_types")
    );
}

#[test]
fn subject_role_taxonomy_reaches_subjects_and_linked_files() {
    let layer = derive_tables(extended_tables(), PipelineOptions::default());
    let subject = describe(&layer, EntityKind::Subject, "S1");
    assert_eq!(rendered(&subject, "subject_roles"), ["cfde_subject_role:0"]);
    assert_eq!(rendered(&subject, "ncbi_taxons"), ["NCBI:txid9606"]);

    // F3 reaches S1 only through file_describes_subject.
    let direct = describe(&layer, EntityKind::File, "F3");
    assert_eq!(direct["sex"], "cfde_subject_sex:2");
    assert_eq!(rendered(&direct, "subject_species"), ["NCBI:txid9606"]);
    assert_eq!(rendered(&direct, "subject_roles"), ["cfde_subject_role:0"]);
    assert_eq!(rendered(&direct, "anatomies"), Vec::<String>::new());
}

#[test]
fn bundle_collections_and_their_files_are_flagged() {
    let layer = derive_tables(extended_tables(), PipelineOptions::default());
    assert_eq!(describe(&layer, EntityKind::File, "F3")["is_bundle"], true);
    assert_eq!(describe(&layer, EntityKind::Collection, "C2")["is_bundle"], true);
    assert_eq!(describe(&layer, EntityKind::Collection, "C1")["is_bundle"], false);
    assert_eq!(describe(&layer, EntityKind::File, "F1")["is_bundle"], false);
}

#[test]
fn persistent_id_flag_is_shared_by_equal_files() {
    let layer = derive_tables(extended_tables(), PipelineOptions::default());
    let (_, f1) = layer.entity(EntityKind::File, &key("F1")).unwrap();
    let (_, f2) = layer.entity(EntityKind::File, &key("F2")).unwrap();
    let (_, f4) = layer.entity(EntityKind::File, &key("F4")).unwrap();
    assert_eq!(f2.core, f4.core);
    assert_ne!(f1.core, f2.core);
    assert!(layer.core_fact(f2.core).unwrap().has_persistent_id);
    assert!(!layer.core_fact(f1.core).unwrap().has_persistent_id);
}

#[test]
fn biosamples_in_different_namespaces_keep_separate_facts() {
    let mut tables = fixture_tables();
    let other = "tag:other.org,2024:";
    append(
        &mut tables,
        "biosample",
        "",
        &[format!("{other}\tB4\t{NS}\tP2\tUBERON:0000948\tOBI:0002117")],
    );
    let layer = derive_tables(tables, PipelineOptions::default());
    let (_, b2) = layer.entity(EntityKind::Biosample, &key("B2")).unwrap();
    let (_, b4) = layer
        .entity(EntityKind::Biosample, &EntityKey::new(other, "B4"))
        .unwrap();
    assert_ne!(b2.core, b4.core);

    let mut a = layer.describe_fact(b2.core).unwrap();
    let mut b = layer.describe_fact(b4.core).unwrap();
    assert_eq!(a["id_namespace"], NS);
    assert_eq!(b["id_namespace"], other);
    for field in ["nid", "digest", "id_namespace"] {
        a.as_object_mut().unwrap().remove(field);
        b.as_object_mut().unwrap().remove(field);
    }
    assert_eq!(a, b);
}

#[test]
fn rendered_keys_resolve_even_when_the_local_id_contains_separators() {
    let mut tables = fixture_tables();
    append(
        &mut tables,
        "biosample",
        "",
        &[format!("{NS}\tB::5\t{NS}\tP2\tUBERON:0000948\tOBI:0002117")],
    );
    let layer = derive_tables(tables, PipelineOptions::default());

    let rendered_key = format!("{NS}::B::5");
    let found = layer.find_entity(EntityKind::Biosample, &rendered_key).unwrap();
    assert_eq!(found, key("B::5"));
    assert_eq!(
        layer.find_entity(EntityKind::Biosample, &format!("{NS}::B2")).unwrap(),
        key("B2")
    );
    assert_matches!(
        layer.find_entity(EntityKind::Biosample, &format!("{NS}::B9")),
        Err(FactError::NotFound(_))
    );
    assert_matches!(
        layer.find_entity(EntityKind::Biosample, "B2"),
        Err(FactError::InvalidEntityKey(_))
    );
}

#[test]
fn identical_biosamples_share_one_core_fact() {
    let layer = derive_fixture();
    let (_, b1) = layer.entity(EntityKind::Biosample, &key("B1")).unwrap();
    let (_, b2) = layer.entity(EntityKind::Biosample, &key("B2")).unwrap();
    let (_, b3) = layer.entity(EntityKind::Biosample, &key("B3")).unwrap();
    assert_eq!(b2.core, b3.core);
    assert_ne!(b1.core, b2.core);
    assert_eq!(
        layer.core_facts.digest(b2.core),
        layer.core_facts.digest(b3.core)
    );
}

#[test]
fn every_entity_gets_exactly_one_assignment() {
    let layer = derive_fixture();
    for kind in EntityKind::ALL {
        assert_eq!(
            layer.assignments.of(kind).len(),
            layer.batch.entity_count(kind),
            "{kind}"
        );
        for refs in layer.assignments.of(kind) {
            assert!(layer.core_facts.get(refs.core).is_some());
            assert!(layer.gene_facts.get(refs.gene).is_some());
            assert!(layer.protein_facts.get(refs.protein).is_some());
            assert!(layer.pubchem_facts.get(refs.pubchem).is_some());
        }
    }
}

#[test]
fn reruns_produce_identical_facts() {
    let first = derive_fixture();
    let second = derive_fixture();
    assert_eq!(first.assignments, second.assignments);
    assert_eq!(first.core_facts.len(), second.core_facts.len());
    for (nid, fact) in first.core_facts.iter() {
        assert_eq!(second.core_facts.get(nid), Some(fact));
        assert_eq!(first.core_facts.digest(nid), second.core_facts.digest(nid));
    }
}

#[test]
fn sequential_and_parallel_runs_agree() {
    let sequential = derive_tables(
        fixture_tables(),
        PipelineOptions {
            parallel: false,
            ..PipelineOptions::default()
        },
    );
    let parallel = derive_tables(
        fixture_tables(),
        PipelineOptions {
            parallel: true,
            ..PipelineOptions::default()
        },
    );
    assert_eq!(sequential.assignments, parallel.assignments);
    assert_eq!(sequential.core_facts.len(), parallel.core_facts.len());
}

#[test]
fn row_order_does_not_change_fact_content() {
    let baseline = derive_fixture();
    let mut tables = fixture_tables();
    for name in ["file_in_collection", "anatomy", "data_type", "file_format"] {
        let reversed = reverse_rows(&tables[name]);
        tables.insert(name.to_string(), reversed);
    }
    let shuffled = derive_tables(tables, PipelineOptions::default());

    let collection = describe(&shuffled, EntityKind::Collection, "C1");
    assert_eq!(rendered(&collection, "data_types"), ["data:2044", "data:3002"]);
    assert_eq!(rendered(&collection, "file_formats"), ["format:1930", "format:3475"]);

    for kind in EntityKind::ALL {
        for local_id in ["F1", "F2", "B1", "B2", "S1", "C1"] {
            let key = key(local_id);
            let (Ok((_, a)), Ok((_, b))) =
                (baseline.entity(kind, &key), shuffled.entity(kind, &key))
            else {
                continue;
            };
            assert_eq!(
                baseline.describe_fact(a.core).unwrap(),
                shuffled.describe_fact(b.core).unwrap(),
                "{kind} {local_id}"
            );
        }
    }
}

#[test]
fn written_facts_are_byte_identical_across_row_orders() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let mut tables = fixture_tables();
    let baseline = derive_tables(tables.clone(), PipelineOptions::default());
    for name in ["data_type", "file_format", "anatomy", "file_in_collection"] {
        let reversed = reverse_rows(&tables[name]);
        tables.insert(name.to_string(), reversed);
    }
    let shuffled = derive_tables(tables, PipelineOptions::default());

    let mut written = Vec::new();
    for (name, layer) in [("a", &baseline), ("b", &shuffled)] {
        let store = OutputStore::new(root.join(name));
        store.write(layer, Vec::new(), &[]).unwrap();
        written.push(fs::read(store.table_path("core_fact.tsv")).unwrap());
    }
    assert_eq!(written[0], written[1]);
}

#[test]
fn dangling_reference_aborts_the_run() {
    let mut tables = fixture_tables();
    let broken = format!(
        "{}{NS}\tF1\t{NS}\tB9\n",
        tables["file_describes_biosample"]
    );
    tables.insert("file_describes_biosample".to_string(), broken);
    let submission = Submission::load(&Datapackage::from_tables("memory", tables)).unwrap();
    let err = Pipeline::default()
        .derive(&submission, &SilentSink)
        .unwrap_err();
    assert_matches!(
        err,
        FactError::ReferentialViolation { table, .. } if table == "file_describes_biosample"
    );
}

#[test]
fn unknown_closed_term_aborts_the_run() {
    let mut tables = fixture_tables();
    tables.insert(
        "anatomy".to_string(),
        "id\tname\nUBERON:0000948\theart\n".to_string(),
    );
    let submission = Submission::load(&Datapackage::from_tables("memory", tables)).unwrap();
    let err = Pipeline::default()
        .derive(&submission, &SilentSink)
        .unwrap_err();
    assert_matches!(err, FactError::UnknownTerm { vocabulary, .. } if vocabulary == "anatomy");
}

#[test]
fn project_cycle_is_rejected_unless_truncated() {
    let mut tables = fixture_tables();
    let cyclic = format!("{}{NS}\tP2\t{NS}\tP1\n", tables["project_in_project"]);
    tables.insert("project_in_project".to_string(), cyclic);

    let submission =
        Submission::load(&Datapackage::from_tables("memory", tables.clone())).unwrap();
    let err = Pipeline::default()
        .derive(&submission, &SilentSink)
        .unwrap_err();
    assert_matches!(err, FactError::ContainmentCycle { graph, .. } if graph == "project_in_project");

    let layer = derive_tables(
        tables,
        PipelineOptions {
            cycle_policy: CyclePolicy::Truncate,
            parallel: false,
        },
    );
    let p1 = project(&layer, "P1");
    let p2 = project(&layer, "P2");
    assert!(layer.closures.projects.contains(p1, p2));
    assert!(layer.closures.projects.contains(p2, p1));
    assert!(layer.closures.project_roots.is_empty());
}

#[test]
fn merged_sources_with_the_same_entity_are_rejected() {
    let pipeline = Pipeline::default();
    let submission = pipeline.load(&[fixture(), fixture()], &SilentSink).unwrap();
    assert_eq!(submission.sources.len(), 2);
    let err = pipeline.check(&submission, &SilentSink).unwrap_err();
    assert_matches!(err, FactError::DuplicateKey { .. });
}

#[test]
fn check_reports_counts_without_deriving() {
    let pipeline = Pipeline::default();
    let submission = pipeline.load(&[fixture()], &SilentSink).unwrap();
    let result = pipeline.check(&submission, &SilentSink).unwrap();
    assert_eq!(result.entities.files, 2);
    assert_eq!(result.entities.biosamples, 3);
    assert_eq!(result.entities.subjects, 1);
    assert_eq!(result.entities.collections, 1);
    assert_eq!(result.entities.projects, 2);
    assert_eq!(result.entities.dccs, 1);
    assert_eq!(result.project_in_project_transitive, 3);
    assert_eq!(result.collection_in_collection_transitive, 1);
    assert_eq!(result.project_roots, 1);
}

#[test]
fn describe_fact_renders_external_ids() {
    let layer = derive_fixture();
    let (_, refs) = layer.entity(EntityKind::File, &key("F1")).unwrap();
    let fact = layer.describe_fact(refs.core).unwrap();
    assert_eq!(fact["anatomy"], "UBERON:0002107");
    assert_eq!(fact["data_type"], "data:2044");
    assert_eq!(fact["mime_type"], "text/plain");
    assert_eq!(fact["dccs"][0], format!("{NS}::P1"));
    assert_eq!(
        fact["diseases"][0]["association_type"],
        "cfde_disease_association_type:1"
    );
    assert_eq!(fact["has_persistent_id"], false);

    let missing = layer.entity(EntityKind::File, &key("F9")).unwrap_err();
    assert_matches!(missing, FactError::NotFound(_));
}
