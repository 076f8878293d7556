use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FactError;

static CURIE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*:\S+$").expect("static CURIE pattern")
});

/// Dense internal surrogate. Nids are scoped per entity kind or vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nid(u32);

impl Nid {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn from_index(index: usize) -> Result<Self, FactError> {
        u32::try_from(index)
            .map(Self)
            .map_err(|_| FactError::SurrogateOverflow(index))
    }

    pub fn range(len: usize) -> Result<Range<u32>, FactError> {
        let end = u32::try_from(len).map_err(|_| FactError::SurrogateOverflow(len))?;
        Ok(0..end)
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub id_namespace: String,
    pub local_id: String,
}

impl EntityKey {
    pub fn new(id_namespace: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            id_namespace: id_namespace.into(),
            local_id: local_id.into(),
        }
    }

    /// Every reading of `NAMESPACE::LOCAL_ID`, last separator first.
    ///
    /// Namespaces are tag URIs that usually end in ':' and local ids may contain
    /// `::` themselves, so a rendered key can split in more than one place.
    pub fn readings(value: &str) -> Vec<EntityKey> {
        let value = value.trim();
        let mut keys: Vec<EntityKey> = value
            .char_indices()
            .filter(|(at, _)| value[*at..].starts_with("::"))
            .filter_map(|(at, _)| {
                let (namespace, local_id) = (&value[..at], &value[at + 2..]);
                (!namespace.is_empty() && !local_id.is_empty())
                    .then(|| EntityKey::new(namespace, local_id))
            })
            .collect();
        keys.reverse();
        keys
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.id_namespace, self.local_id)
    }
}

impl FromStr for EntityKey {
    type Err = FactError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EntityKey::readings(value)
            .into_iter()
            .next()
            .ok_or_else(|| FactError::InvalidEntityKey(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    File,
    Biosample,
    Subject,
    Collection,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::File,
        EntityKind::Biosample,
        EntityKind::Subject,
        EntityKind::Collection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Biosample => "biosample",
            EntityKind::Subject => "subject",
            EntityKind::Collection => "collection",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularyKind {
    Anatomy,
    AnalysisType,
    AssayType,
    Compound,
    DataType,
    Disease,
    FileFormat,
    Gene,
    NcbiTaxonomy,
    Phenotype,
    Protein,
    Substance,
    Sex,
    Race,
    Ethnicity,
    SubjectGranularity,
    SubjectRole,
    DiseaseAssociationType,
    PhenotypeAssociationType,
    MimeType,
}

impl VocabularyKind {
    pub const ALL: [VocabularyKind; 20] = [
        VocabularyKind::Anatomy,
        VocabularyKind::AnalysisType,
        VocabularyKind::AssayType,
        VocabularyKind::Compound,
        VocabularyKind::DataType,
        VocabularyKind::Disease,
        VocabularyKind::FileFormat,
        VocabularyKind::Gene,
        VocabularyKind::NcbiTaxonomy,
        VocabularyKind::Phenotype,
        VocabularyKind::Protein,
        VocabularyKind::Substance,
        VocabularyKind::Sex,
        VocabularyKind::Race,
        VocabularyKind::Ethnicity,
        VocabularyKind::SubjectGranularity,
        VocabularyKind::SubjectRole,
        VocabularyKind::DiseaseAssociationType,
        VocabularyKind::PhenotypeAssociationType,
        VocabularyKind::MimeType,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            VocabularyKind::Anatomy => "anatomy",
            VocabularyKind::AnalysisType => "analysis_type",
            VocabularyKind::AssayType => "assay_type",
            VocabularyKind::Compound => "compound",
            VocabularyKind::DataType => "data_type",
            VocabularyKind::Disease => "disease",
            VocabularyKind::FileFormat => "file_format",
            VocabularyKind::Gene => "gene",
            VocabularyKind::NcbiTaxonomy => "ncbi_taxonomy",
            VocabularyKind::Phenotype => "phenotype",
            VocabularyKind::Protein => "protein",
            VocabularyKind::Substance => "substance",
            VocabularyKind::Sex => "sex",
            VocabularyKind::Race => "race",
            VocabularyKind::Ethnicity => "ethnicity",
            VocabularyKind::SubjectGranularity => "subject_granularity",
            VocabularyKind::SubjectRole => "subject_role",
            VocabularyKind::DiseaseAssociationType => "disease_association_type",
            VocabularyKind::PhenotypeAssociationType => "phenotype_association_type",
            VocabularyKind::MimeType => "mime_type",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table_name() == name)
    }

    /// Closed vocabularies must ship every referenced term in the batch.
    /// Open ones are enumerations that get registered on first reference.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            VocabularyKind::Sex
                | VocabularyKind::Race
                | VocabularyKind::Ethnicity
                | VocabularyKind::SubjectGranularity
                | VocabularyKind::SubjectRole
                | VocabularyKind::DiseaseAssociationType
                | VocabularyKind::PhenotypeAssociationType
                | VocabularyKind::MimeType
        )
    }
}

impl fmt::Display for VocabularyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermId(String);

impl TermId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accepts any non-empty id; used for open enumerations such as mime types.
    pub fn open(value: &str) -> Result<Self, FactError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(FactError::InvalidTermId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TermId {
    type Err = FactError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !CURIE.is_match(trimmed) {
            return Err(FactError::InvalidTermId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CyclePolicy {
    #[default]
    Reject,
    Truncate,
}
