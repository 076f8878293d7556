use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use c2m2_facts::pipeline::{DerivedLayer, Pipeline, SilentSink};
use c2m2_facts::stats::{Dimension, StatsQuery, aggregate};
use c2m2_facts::store::{MANIFEST, OutputStore};
use c2m2_facts::table::Datapackage;
use flate2::Compression;
use flate2::write::GzEncoder;
use zip::write::SimpleFileOptions;

fn fixture() -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/hmp")
}

fn derive(source: &Utf8Path) -> DerivedLayer {
    let pipeline = Pipeline::default();
    let submission = pipeline.load(&[source.to_owned()], &SilentSink).unwrap();
    pipeline.derive(&submission, &SilentSink).unwrap()
}

fn utf8(path: &std::path::Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

fn fixture_files() -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = fs::read_dir(fixture())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "tsv"))
        .map(|path| {
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            (name, fs::read(&path).unwrap())
        })
        .collect();
    files.sort();
    files
}

#[test]
fn write_stages_tables_and_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path()).join("derived");
    let layer = derive(&fixture());
    let stats = vec![aggregate(
        &layer,
        &StatsQuery::new(vec![Dimension::Anatomy], false),
    )];

    let store = OutputStore::new(root.clone());
    let manifest = store.write(&layer, vec![fixture().to_string()], &stats).unwrap();

    assert!(root.join(MANIFEST).exists());
    assert_eq!(manifest.tables["core_fact.tsv"], layer.core_facts.len());
    assert_eq!(manifest.tables["file_fact.tsv"], 2);
    assert_eq!(manifest.tables["biosample_fact.tsv"], 3);
    assert_eq!(manifest.tables["project_in_project_transitive.tsv"], 3);
    assert_eq!(manifest.tables["project_root.tsv"], 1);
    assert!(manifest.tables.contains_key("core_fact_anatomies.tsv"));
    assert!(manifest.tables.contains_key("gene_fact.tsv"));
    assert!(manifest.tables.contains_key("stats_anatomy.tsv"));
    assert_eq!(store.read_manifest().unwrap(), manifest);

    let core = fs::read_to_string(root.join("core_fact.tsv")).unwrap();
    let header: Vec<&str> = core.lines().next().unwrap().split('\t').collect();
    assert_eq!(&header[..4], &["nid", "digest", "is_bundle", "has_persistent_id"]);
    assert!(header.contains(&"data_types"));

    let leftovers: Vec<_> = fs::read_dir(temp.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.starts_with(".c2m2-facts-"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn rerun_replaces_previous_output() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(temp.path()).join("derived");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("stale.tsv"), "old\n").unwrap();

    let layer = derive(&fixture());
    let store = OutputStore::new(root.clone());
    store.write(&layer, Vec::new(), &[]).unwrap();
    let first = fs::read_to_string(root.join("core_fact.tsv")).unwrap();
    store.write(&layer, Vec::new(), &[]).unwrap();
    let second = fs::read_to_string(root.join("core_fact.tsv")).unwrap();

    assert!(!root.join("stale.tsv").exists());
    assert_eq!(first, second);
}

#[test]
fn gzipped_tables_load_like_plain_ones() {
    let temp = tempfile::tempdir().unwrap();
    let dir = utf8(temp.path());
    for (name, bytes) in fixture_files() {
        let mut encoder = GzEncoder::new(
            fs::File::create(dir.join(format!("{name}.gz"))).unwrap(),
            Compression::default(),
        );
        encoder.write_all(&bytes).unwrap();
        encoder.finish().unwrap();
    }

    let plain = derive(&fixture());
    let gzipped = derive(&dir);
    assert_eq!(plain.assignments, gzipped.assignments);
    assert_eq!(plain.core_facts.len(), gzipped.core_facts.len());
}

#[test]
fn zipped_datapackage_loads_nested_tables() {
    let temp = tempfile::tempdir().unwrap();
    let archive = utf8(temp.path()).join("hmp.zip");
    let mut writer = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
    for (name, bytes) in fixture_files() {
        writer
            .start_file(format!("hmp/{name}"), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&bytes).unwrap();
    }
    writer.finish().unwrap();

    let package = Datapackage::open(&archive).unwrap();
    assert!(package.has_table("file"));
    assert!(package.has_table("project_in_project"));

    let plain = derive(&fixture());
    let zipped = derive(&archive);
    assert_eq!(plain.assignments, zipped.assignments);
}

#[test]
fn unsupported_source_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = utf8(temp.path()).join("file.tsv");
    fs::write(&path, "id\n").unwrap();
    assert!(Datapackage::open(&path).is_err());
}
