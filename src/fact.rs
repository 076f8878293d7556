use std::hash::Hash;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::{Nid, VocabularyKind};
use crate::error::FactError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TermSet<T = Nid>(Vec<T>);

impl<T> Default for TermSet<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Ord> FromIterator<T> for TermSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut values: Vec<T> = iter.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        Self(values)
    }
}

impl<T: Ord> FromIterator<Option<T>> for TermSet<T> {
    fn from_iter<I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        iter.into_iter().flatten().collect()
    }
}

impl<T> TermSet<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Copy> TermSet<T> {
    /// The collapse-if-unambiguous rule: the only member of a singleton set, else `None`.
    pub fn single(&self) -> Option<T> {
        match self.0.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

impl<'a, T> IntoIterator for &'a TermSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Qualified {
    pub term: Nid,
    pub association_type: Option<Nid>,
}

/// The canonical, order-independent summary of one entity's reachable metadata.
/// Two entities share a row exactly when every field here is equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CoreFact {
    pub id_namespace: Option<Nid>,
    pub is_bundle: bool,
    pub has_persistent_id: bool,

    pub project: Option<Nid>,
    pub sex: Option<Nid>,
    pub ethnicity: Option<Nid>,
    pub subject_granularity: Option<Nid>,
    pub anatomy: Option<Nid>,
    pub assay_type: Option<Nid>,
    pub analysis_type: Option<Nid>,
    pub file_format: Option<Nid>,
    pub compression_format: Option<Nid>,
    pub data_type: Option<Nid>,
    pub mime_type: Option<Nid>,

    pub projects: TermSet,
    pub dccs: TermSet,
    pub phenotypes: TermSet<Qualified>,
    pub diseases: TermSet<Qualified>,
    pub substances: TermSet,
    pub genes: TermSet,
    pub sexes: TermSet,
    pub races: TermSet,
    pub ethnicities: TermSet,
    pub subject_roles: TermSet,
    pub subject_granularities: TermSet,
    pub subject_species: TermSet,
    pub ncbi_taxons: TermSet,
    pub anatomies: TermSet,
    pub assay_types: TermSet,
    pub analysis_types: TermSet,
    pub file_formats: TermSet,
    pub compression_formats: TermSet,
    pub data_types: TermSet,
    pub mime_types: TermSet,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactIdentity {
    pub id_namespace: Option<Nid>,
    pub is_bundle: bool,
    pub has_persistent_id: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactSets {
    pub projects: TermSet,
    pub dccs: TermSet,
    pub phenotypes: TermSet<Qualified>,
    pub diseases: TermSet<Qualified>,
    pub substances: TermSet,
    pub genes: TermSet,
    pub sexes: TermSet,
    pub races: TermSet,
    pub ethnicities: TermSet,
    pub subject_roles: TermSet,
    pub subject_granularities: TermSet,
    pub subject_species: TermSet,
    pub ncbi_taxons: TermSet,
    pub anatomies: TermSet,
    pub assay_types: TermSet,
    pub analysis_types: TermSet,
    pub file_formats: TermSet,
    pub compression_formats: TermSet,
    pub data_types: TermSet,
    pub mime_types: TermSet,
}

impl CoreFact {
    pub fn new(identity: FactIdentity, sets: FactSets) -> Self {
        Self {
            id_namespace: identity.id_namespace,
            is_bundle: identity.is_bundle,
            has_persistent_id: identity.has_persistent_id,
            project: sets.projects.single(),
            sex: sets.sexes.single(),
            ethnicity: sets.ethnicities.single(),
            subject_granularity: sets.subject_granularities.single(),
            anatomy: sets.anatomies.single(),
            assay_type: sets.assay_types.single(),
            analysis_type: sets.analysis_types.single(),
            file_format: sets.file_formats.single(),
            compression_format: sets.compression_formats.single(),
            data_type: sets.data_types.single(),
            mime_type: sets.mime_types.single(),
            projects: sets.projects,
            dccs: sets.dccs,
            phenotypes: sets.phenotypes,
            diseases: sets.diseases,
            substances: sets.substances,
            genes: sets.genes,
            sexes: sets.sexes,
            races: sets.races,
            ethnicities: sets.ethnicities,
            subject_roles: sets.subject_roles,
            subject_granularities: sets.subject_granularities,
            subject_species: sets.subject_species,
            ncbi_taxons: sets.ncbi_taxons,
            anatomies: sets.anatomies,
            assay_types: sets.assay_types,
            analysis_types: sets.analysis_types,
            file_formats: sets.file_formats,
            compression_formats: sets.compression_formats,
            data_types: sets.data_types,
            mime_types: sets.mime_types,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDomain {
    Namespace,
    Project,
    Term(VocabularyKind),
}

pub trait Render {
    fn render(&self, domain: FieldDomain, nid: Nid) -> String;
}

#[derive(Debug, Clone)]
pub struct SetField {
    pub name: &'static str,
    pub domain: FieldDomain,
    pub qualifier: Option<VocabularyKind>,
    pub entries: Vec<(Nid, Option<Nid>)>,
}

impl SetField {
    fn plain(name: &'static str, domain: FieldDomain, set: &TermSet) -> Self {
        Self {
            name,
            domain,
            qualifier: None,
            entries: set.iter().map(|nid| (*nid, None)).collect(),
        }
    }

    fn term(name: &'static str, kind: VocabularyKind, set: &TermSet) -> Self {
        Self::plain(name, FieldDomain::Term(kind), set)
    }

    fn qualified(
        name: &'static str,
        kind: VocabularyKind,
        qualifier: VocabularyKind,
        set: &TermSet<Qualified>,
    ) -> Self {
        Self {
            name,
            domain: FieldDomain::Term(kind),
            qualifier: Some(qualifier),
            entries: set
                .iter()
                .map(|entry| (entry.term, entry.association_type))
                .collect(),
        }
    }

    pub fn terms(&self) -> impl Iterator<Item = Nid> + '_ {
        self.entries.iter().map(|(term, _)| *term)
    }

    /// Entries as external ids, ordered by id rather than by nid.
    pub fn rendered(&self, render: &dyn Render) -> Vec<(String, Option<String>)> {
        let mut values: Vec<(String, Option<String>)> = self
            .entries
            .iter()
            .map(|(term, qualifier)| {
                let qualifier = self
                    .qualifier
                    .zip(*qualifier)
                    .map(|(kind, nid)| render.render(FieldDomain::Term(kind), nid));
                (render.render(self.domain, *term), qualifier)
            })
            .collect();
        values.sort();
        values.dedup();
        values
    }

    pub fn to_json(&self, render: &dyn Render) -> serde_json::Value {
        let values = self
            .rendered(render)
            .into_iter()
            .map(|(term, qualifier)| match self.qualifier {
                Some(_) => serde_json::json!([term, qualifier]),
                None => serde_json::json!(term),
            })
            .collect();
        serde_json::Value::Array(values)
    }
}

impl CoreFact {
    pub fn scalar_fields(&self) -> [(&'static str, FieldDomain, Option<Nid>); 12] {
        use VocabularyKind as V;
        [
            ("id_namespace", FieldDomain::Namespace, self.id_namespace),
            ("project", FieldDomain::Project, self.project),
            ("sex", FieldDomain::Term(V::Sex), self.sex),
            ("ethnicity", FieldDomain::Term(V::Ethnicity), self.ethnicity),
            (
                "subject_granularity",
                FieldDomain::Term(V::SubjectGranularity),
                self.subject_granularity,
            ),
            ("anatomy", FieldDomain::Term(V::Anatomy), self.anatomy),
            ("assay_type", FieldDomain::Term(V::AssayType), self.assay_type),
            ("analysis_type", FieldDomain::Term(V::AnalysisType), self.analysis_type),
            ("file_format", FieldDomain::Term(V::FileFormat), self.file_format),
            (
                "compression_format",
                FieldDomain::Term(V::FileFormat),
                self.compression_format,
            ),
            ("data_type", FieldDomain::Term(V::DataType), self.data_type),
            ("mime_type", FieldDomain::Term(V::MimeType), self.mime_type),
        ]
    }

    pub fn set_fields(&self) -> Vec<SetField> {
        use VocabularyKind as V;
        vec![
            SetField::plain("projects", FieldDomain::Project, &self.projects),
            SetField::plain("dccs", FieldDomain::Project, &self.dccs),
            SetField::qualified(
                "phenotypes",
                V::Phenotype,
                V::PhenotypeAssociationType,
                &self.phenotypes,
            ),
            SetField::qualified(
                "diseases",
                V::Disease,
                V::DiseaseAssociationType,
                &self.diseases,
            ),
            SetField::term("substances", V::Substance, &self.substances),
            SetField::term("genes", V::Gene, &self.genes),
            SetField::term("sexes", V::Sex, &self.sexes),
            SetField::term("races", V::Race, &self.races),
            SetField::term("ethnicities", V::Ethnicity, &self.ethnicities),
            SetField::term("subject_roles", V::SubjectRole, &self.subject_roles),
            SetField::term(
                "subject_granularities",
                V::SubjectGranularity,
                &self.subject_granularities,
            ),
            SetField::term("subject_species", V::NcbiTaxonomy, &self.subject_species),
            SetField::term("ncbi_taxons", V::NcbiTaxonomy, &self.ncbi_taxons),
            SetField::term("anatomies", V::Anatomy, &self.anatomies),
            SetField::term("assay_types", V::AssayType, &self.assay_types),
            SetField::term("analysis_types", V::AnalysisType, &self.analysis_types),
            SetField::term("file_formats", V::FileFormat, &self.file_formats),
            SetField::term(
                "compression_formats",
                V::FileFormat,
                &self.compression_formats,
            ),
            SetField::term("data_types", V::DataType, &self.data_types),
            SetField::term("mime_types", V::MimeType, &self.mime_types),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct GeneFact {
    pub genes: TermSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ProteinFact {
    pub proteins: TermSet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct PubchemFact {
    pub substances: TermSet,
    pub compounds: TermSet,
}

impl GeneFact {
    pub fn set_fields(&self) -> Vec<SetField> {
        vec![SetField::term("genes", VocabularyKind::Gene, &self.genes)]
    }
}

impl ProteinFact {
    pub fn set_fields(&self) -> Vec<SetField> {
        vec![SetField::term(
            "proteins",
            VocabularyKind::Protein,
            &self.proteins,
        )]
    }
}

impl PubchemFact {
    pub fn set_fields(&self) -> Vec<SetField> {
        vec![
            SetField::term("substances", VocabularyKind::Substance, &self.substances),
            SetField::term("compounds", VocabularyKind::Compound, &self.compounds),
        ]
    }
}

pub trait Fact: Clone + Default + Eq + Hash {
    const TABLE: &'static str;

    fn columns(&self) -> Vec<SetField>;

    fn flags(&self) -> Vec<(&'static str, bool)> {
        Vec::new()
    }

    fn scalars(&self) -> Vec<(&'static str, FieldDomain, Option<Nid>)> {
        Vec::new()
    }

    fn canonical(&self, render: &dyn Render) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (name, flag) in self.flags() {
            object.insert(name.to_string(), serde_json::json!(flag));
        }
        for (name, domain, value) in self.scalars() {
            let rendered = value.map(|nid| render.render(domain, nid));
            object.insert(name.to_string(), serde_json::json!(rendered));
        }
        for field in self.columns() {
            object.insert(field.name.to_string(), field.to_json(render));
        }
        serde_json::Value::Object(object)
    }

    /// SHA-256 over the canonical form, so it is stable across runs and row orders.
    fn digest(&self, render: &dyn Render) -> Result<String, FactError> {
        let bytes = serde_json::to_vec(&self.canonical(render))
            .map_err(|err| FactError::Serialization(format!("{}: {err}", Self::TABLE)))?;
        let hash = Sha256::digest(&bytes);
        Ok(hash.iter().map(|byte| format!("{byte:02x}")).collect())
    }
}

impl Fact for CoreFact {
    const TABLE: &'static str = "core_fact";

    fn columns(&self) -> Vec<SetField> {
        self.set_fields()
    }

    fn flags(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("is_bundle", self.is_bundle),
            ("has_persistent_id", self.has_persistent_id),
        ]
    }

    fn scalars(&self) -> Vec<(&'static str, FieldDomain, Option<Nid>)> {
        self.scalar_fields().to_vec()
    }
}

impl Fact for GeneFact {
    const TABLE: &'static str = "gene_fact";

    fn columns(&self) -> Vec<SetField> {
        self.set_fields()
    }
}

impl Fact for ProteinFact {
    const TABLE: &'static str = "protein_fact";

    fn columns(&self) -> Vec<SetField> {
        self.set_fields()
    }
}

impl Fact for PubchemFact {
    const TABLE: &'static str = "pubchem_fact";

    fn columns(&self) -> Vec<SetField> {
        self.set_fields()
    }
}
