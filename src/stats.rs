use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{EntityKind, Nid, VocabularyKind};
use crate::error::FactError;
use crate::fact::CoreFact;
use crate::pipeline::DerivedLayer;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Dimension {
    Anatomy,
    AssayType,
    AnalysisType,
    DataType,
    FileFormat,
    CompressionFormat,
    MimeType,
    Disease,
    Phenotype,
    Gene,
    Substance,
    NcbiTaxonomy,
    SubjectSpecies,
    Sex,
    Race,
    Ethnicity,
    SubjectGranularity,
    SubjectRole,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Anatomy => "anatomy",
            Dimension::AssayType => "assay_type",
            Dimension::AnalysisType => "analysis_type",
            Dimension::DataType => "data_type",
            Dimension::FileFormat => "file_format",
            Dimension::CompressionFormat => "compression_format",
            Dimension::MimeType => "mime_type",
            Dimension::Disease => "disease",
            Dimension::Phenotype => "phenotype",
            Dimension::Gene => "gene",
            Dimension::Substance => "substance",
            Dimension::NcbiTaxonomy => "ncbi_taxonomy",
            Dimension::SubjectSpecies => "subject_species",
            Dimension::Sex => "sex",
            Dimension::Race => "race",
            Dimension::Ethnicity => "ethnicity",
            Dimension::SubjectGranularity => "subject_granularity",
            Dimension::SubjectRole => "subject_role",
        }
    }

    pub fn vocabulary(self) -> VocabularyKind {
        match self {
            Dimension::Anatomy => VocabularyKind::Anatomy,
            Dimension::AssayType => VocabularyKind::AssayType,
            Dimension::AnalysisType => VocabularyKind::AnalysisType,
            Dimension::DataType => VocabularyKind::DataType,
            Dimension::FileFormat | Dimension::CompressionFormat => VocabularyKind::FileFormat,
            Dimension::MimeType => VocabularyKind::MimeType,
            Dimension::Disease => VocabularyKind::Disease,
            Dimension::Phenotype => VocabularyKind::Phenotype,
            Dimension::Gene => VocabularyKind::Gene,
            Dimension::Substance => VocabularyKind::Substance,
            Dimension::NcbiTaxonomy | Dimension::SubjectSpecies => VocabularyKind::NcbiTaxonomy,
            Dimension::Sex => VocabularyKind::Sex,
            Dimension::Race => VocabularyKind::Race,
            Dimension::Ethnicity => VocabularyKind::Ethnicity,
            Dimension::SubjectGranularity => VocabularyKind::SubjectGranularity,
            Dimension::SubjectRole => VocabularyKind::SubjectRole,
        }
    }

    fn values(self, fact: &CoreFact) -> Vec<Nid> {
        let set = match self {
            Dimension::Anatomy => &fact.anatomies,
            Dimension::AssayType => &fact.assay_types,
            Dimension::AnalysisType => &fact.analysis_types,
            Dimension::DataType => &fact.data_types,
            Dimension::FileFormat => &fact.file_formats,
            Dimension::CompressionFormat => &fact.compression_formats,
            Dimension::MimeType => &fact.mime_types,
            Dimension::Disease => return fact.diseases.iter().map(|d| d.term).collect(),
            Dimension::Phenotype => return fact.phenotypes.iter().map(|p| p.term).collect(),
            Dimension::Gene => &fact.genes,
            Dimension::Substance => &fact.substances,
            Dimension::NcbiTaxonomy => &fact.ncbi_taxons,
            Dimension::SubjectSpecies => &fact.subject_species,
            Dimension::Sex => &fact.sexes,
            Dimension::Race => &fact.races,
            Dimension::Ethnicity => &fact.ethnicities,
            Dimension::SubjectGranularity => &fact.subject_granularities,
            Dimension::SubjectRole => &fact.subject_roles,
        };
        set.as_slice().to_vec()
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = FactError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Dimension::value_variants()
            .iter()
            .copied()
            .find(|dimension| dimension.as_str() == value.trim())
            .ok_or_else(|| FactError::InvalidDimension(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsQuery {
    pub dimensions: Vec<Dimension>,
    pub use_slim: bool,
}

impl StatsQuery {
    pub fn new(dimensions: Vec<Dimension>, use_slim: bool) -> Self {
        Self {
            dimensions,
            use_slim,
        }
    }

    pub fn name(&self) -> String {
        let mut name = String::from("stats");
        for dimension in &self.dimensions {
            name.push('_');
            name.push_str(dimension.as_str());
        }
        if self.use_slim {
            name.push_str("_slim");
        }
        name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatRow {
    pub dcc: Option<String>,
    pub values: Vec<Option<String>>,
    pub num_files: u64,
    pub num_biosamples: u64,
    pub num_subjects: u64,
    pub total_size_in_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResult {
    pub dimensions: Vec<Dimension>,
    pub use_slim: bool,
    pub rows: Vec<StatRow>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    files: u64,
    biosamples: u64,
    subjects: u64,
    bytes: u64,
}

type GroupKey = (Option<Nid>, Vec<Option<Nid>>);

/// Counts files, biosamples and subjects (and file bytes) per DCC and facet combination.
///
/// An entity with several values in a facet contributes to every combination it spans;
/// an entity with none contributes to the empty value of that facet.
pub fn aggregate(layer: &DerivedLayer, query: &StatsQuery) -> StatsResult {
    let mut groups: BTreeMap<GroupKey, Counts> = BTreeMap::new();
    for kind in [EntityKind::File, EntityKind::Biosample, EntityKind::Subject] {
        for (index, refs) in layer.assignments.of(kind).iter().enumerate() {
            let Some(fact) = layer.core_facts.get(refs.core) else {
                continue;
            };
            let bytes = match kind {
                EntityKind::File => layer
                    .batch
                    .files
                    .get(index)
                    .and_then(|file| file.size_in_bytes)
                    .unwrap_or(0),
                _ => 0,
            };
            for key in combinations(layer, fact, query) {
                let counts = groups.entry(key).or_default();
                match kind {
                    EntityKind::File => {
                        counts.files += 1;
                        counts.bytes = counts.bytes.saturating_add(bytes);
                    }
                    EntityKind::Biosample => counts.biosamples += 1,
                    _ => counts.subjects += 1,
                }
            }
        }
    }

    let mut rows: Vec<StatRow> = groups
        .into_iter()
        .map(|((dcc, values), counts)| StatRow {
            dcc: dcc.map(|project| layer.dcc_label(project)),
            values: values
                .iter()
                .zip(&query.dimensions)
                .map(|(value, dimension)| {
                    value.map(|nid| layer.batch.vocab.term_id(dimension.vocabulary(), nid))
                })
                .collect(),
            num_files: counts.files,
            num_biosamples: counts.biosamples,
            num_subjects: counts.subjects,
            total_size_in_bytes: counts.bytes,
        })
        .collect();
    rows.sort_by(|a, b| (&a.dcc, &a.values).cmp(&(&b.dcc, &b.values)));

    StatsResult {
        dimensions: query.dimensions.clone(),
        use_slim: query.use_slim,
        rows,
    }
}

fn combinations(layer: &DerivedLayer, fact: &CoreFact, query: &StatsQuery) -> Vec<GroupKey> {
    let dccs: Vec<Option<Nid>> = if fact.dccs.is_empty() {
        vec![None]
    } else {
        fact.dccs.iter().copied().map(Some).collect()
    };
    let mut keys: Vec<GroupKey> = dccs.into_iter().map(|dcc| (dcc, Vec::new())).collect();

    for dimension in &query.dimensions {
        let mut values = dimension.values(fact);
        if query.use_slim {
            values = values
                .into_iter()
                .flat_map(|term| layer.batch.vocab.slim(dimension.vocabulary(), term))
                .collect();
            values.sort_unstable();
            values.dedup();
        }
        let options: Vec<Option<Nid>> = if values.is_empty() {
            vec![None]
        } else {
            values.into_iter().map(Some).collect()
        };
        keys = keys
            .into_iter()
            .flat_map(|(dcc, prefix)| {
                options.iter().map(move |value| {
                    let mut combined = prefix.clone();
                    combined.push(*value);
                    (dcc, combined)
                })
            })
            .collect();
    }
    keys
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;

    use super::*;
    use crate::pipeline::{Pipeline, SilentSink};
    use crate::submission::Submission;
    use crate::table::Datapackage;

    #[test]
    fn dimension_names_round_trip_through_parsing() {
        for dimension in Dimension::value_variants() {
            assert_eq!(dimension.as_str().parse::<Dimension>().unwrap(), *dimension);
        }
        assert_matches!("colour".parse::<Dimension>(), Err(FactError::InvalidDimension(_)));
    }

    #[test]
    fn query_names_are_stable() {
        let query = StatsQuery::new(vec![Dimension::Anatomy, Dimension::DataType], true);
        assert_eq!(query.name(), "stats_anatomy_data_type_slim");
    }

    #[test]
    fn byte_totals_saturate_instead_of_overflowing() {
        let max = u64::MAX;
        let tables: BTreeMap<String, String> = [
            ("project", "id_namespace\tlocal_id\nns\tP1\n".to_string()),
            (
                "file",
                format!(
                    "id_namespace\tlocal_id\tproject_id_namespace\tproject_local_id\tsize_in_bytes\n\
                     ns\tF1\tns\tP1\t{max}\nns\tF2\tns\tP1\t{max}\n"
                ),
            ),
        ]
        .into_iter()
        .map(|(name, content)| (name.to_string(), content))
        .collect();
        let submission = Submission::load(&Datapackage::from_tables("memory", tables)).unwrap();
        let layer = Pipeline::default().derive(&submission, &SilentSink).unwrap();

        let result = aggregate(&layer, &StatsQuery::new(vec![Dimension::Anatomy], false));
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].num_files, 2);
        assert_eq!(result.rows[0].total_size_in_bytes, u64::MAX);
    }
}
