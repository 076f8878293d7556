use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use c2m2_facts::domain::{EntityKey, EntityKind};
use c2m2_facts::error::FactError;
use c2m2_facts::keywords::keywords;
use c2m2_facts::pipeline::{DerivedLayer, Pipeline, SilentSink};
use c2m2_facts::stats::{Dimension, StatRow, StatsQuery, aggregate};

const NS: &str = "tag:example.org,2024:";

fn derive_fixture() -> DerivedLayer {
    let source = Utf8PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/hmp");
    let pipeline = Pipeline::default();
    let submission = pipeline.load(&[source], &SilentSink).unwrap();
    pipeline.derive(&submission, &SilentSink).unwrap()
}

fn row<'a>(rows: &'a [StatRow], value: Option<&str>) -> &'a StatRow {
    rows.iter()
        .find(|row| row.values[0].as_deref() == value)
        .unwrap_or_else(|| panic!("no row for {value:?}"))
}

#[test]
fn keywords_collect_names_synonyms_and_dcc_labels() {
    let layer = derive_fixture();
    let blob = keywords(&layer, EntityKind::File, &EntityKey::new(NS, "F1")).unwrap();

    for expected in [
        "UBERON:0002107",
        "liver",
        "hepar",
        "kidney",
        "Homo sapiens",
        "type 2 diabetes mellitus",
        "T2D",
        "Root program",
        "Sequencing study",
        "EXC",
        "Example Consortium",
    ] {
        assert!(blob.keywords.iter().any(|k| k == expected), "{expected}");
    }
    let mut sorted = blob.keywords.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, blob.keywords);
    assert!(blob.text().contains("liver"));
}

#[test]
fn keywords_of_unknown_entity_fail() {
    let layer = derive_fixture();
    let err = keywords(&layer, EntityKind::Subject, &EntityKey::new(NS, "S9")).unwrap_err();
    assert_matches!(err, FactError::NotFound(_));
}

#[test]
fn stats_count_entities_per_dcc_and_anatomy() {
    let layer = derive_fixture();
    let result = aggregate(&layer, &StatsQuery::new(vec![Dimension::Anatomy], false));
    assert!(result.rows.iter().all(|row| row.dcc.as_deref() == Some("EXC")));

    let liver = row(&result.rows, Some("UBERON:0002107"));
    assert_eq!(liver.num_files, 1);
    assert_eq!(liver.num_biosamples, 1);
    assert_eq!(liver.num_subjects, 1);
    assert_eq!(liver.total_size_in_bytes, 100);

    let heart = row(&result.rows, Some("UBERON:0000948"));
    assert_eq!(heart.num_biosamples, 2);
    assert_eq!(heart.num_files, 0);

    let unannotated = row(&result.rows, None);
    assert_eq!(unannotated.num_files, 1);
    assert_eq!(unannotated.total_size_in_bytes, 50);
}

#[test]
fn slim_stats_map_terms_to_their_slims() {
    let layer = derive_fixture();
    let result = aggregate(&layer, &StatsQuery::new(vec![Dimension::Anatomy], true));
    assert!(result.use_slim);
    assert!(result.rows.iter().all(|row| row.values[0].as_deref() != Some("UBERON:0002107")));

    let kidney = row(&result.rows, Some("UBERON:0002113"));
    assert_eq!(kidney.num_files, 1);
    assert_eq!(kidney.num_subjects, 1);
    let heart = row(&result.rows, Some("UBERON:0000948"));
    assert_eq!(heart.num_biosamples, 2);
}

#[test]
fn multi_dimension_stats_use_the_cartesian_product() {
    let layer = derive_fixture();
    let result = aggregate(
        &layer,
        &StatsQuery::new(vec![Dimension::Anatomy, Dimension::Sex], false),
    );
    let with_sex = result
        .rows
        .iter()
        .find(|row| {
            row.values[0].as_deref() == Some("UBERON:0002107")
                && row.values[1].as_deref() == Some("cfde_subject_sex:2")
        })
        .unwrap();
    assert_eq!(with_sex.num_subjects, 1);
    assert_eq!(with_sex.num_files, 1);
    assert!(result.rows.iter().all(|row| row.values.len() == 2));
}
