use std::collections::{BTreeMap, HashMap};

use camino::Utf8PathBuf;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::domain::{EntityKey, EntityKind, VocabularyKind};
use crate::error::FactError;
use crate::table::Datapackage;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdNamespaceRow {
    pub id: String,
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DccRow {
    pub id: String,
    #[serde(default)]
    pub dcc_name: Option<String>,
    #[serde(default)]
    pub dcc_abbreviation: Option<String>,
    #[serde(default)]
    pub dcc_description: Option<String>,
    #[serde(default)]
    pub dcc_url: Option<String>,
    pub project_id_namespace: String,
    pub project_local_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProjectRow {
    pub id_namespace: String,
    pub local_id: String,
    #[serde(default)]
    pub persistent_id: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRow {
    pub id_namespace: String,
    pub local_id: String,
    pub project_id_namespace: String,
    pub project_local_id: String,
    #[serde(default)]
    pub persistent_id: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub size_in_bytes: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub uncompressed_size_in_bytes: Option<u64>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub compression_format: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub assay_type: Option<String>,
    #[serde(default)]
    pub analysis_type: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub bundle_collection_id_namespace: Option<String>,
    #[serde(default)]
    pub bundle_collection_local_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BiosampleRow {
    pub id_namespace: String,
    pub local_id: String,
    pub project_id_namespace: String,
    pub project_local_id: String,
    #[serde(default)]
    pub persistent_id: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub anatomy: Option<String>,
    #[serde(default)]
    pub assay_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubjectRow {
    pub id_namespace: String,
    pub local_id: String,
    pub project_id_namespace: String,
    pub project_local_id: String,
    #[serde(default)]
    pub persistent_id: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub ethnicity: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionRow {
    pub id_namespace: String,
    pub local_id: String,
    #[serde(default)]
    pub persistent_id: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TermRow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub synonyms: Option<String>,
    #[serde(default)]
    pub compound: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlimRow {
    pub original_term_id: String,
    pub slim_term_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProteinGeneRow {
    pub protein: String,
    pub gene: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkTable {
    ProjectInProject,
    CollectionInCollection,
    CollectionDefinedByProject,
    FileDescribesBiosample,
    FileDescribesSubject,
    BiosampleFromSubject,
    FileInCollection,
    BiosampleInCollection,
    SubjectInCollection,
}

impl LinkTable {
    pub const ALL: [LinkTable; 9] = [
        LinkTable::ProjectInProject,
        LinkTable::CollectionInCollection,
        LinkTable::CollectionDefinedByProject,
        LinkTable::FileDescribesBiosample,
        LinkTable::FileDescribesSubject,
        LinkTable::BiosampleFromSubject,
        LinkTable::FileInCollection,
        LinkTable::BiosampleInCollection,
        LinkTable::SubjectInCollection,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            LinkTable::ProjectInProject => "project_in_project",
            LinkTable::CollectionInCollection => "collection_in_collection",
            LinkTable::CollectionDefinedByProject => "collection_defined_by_project",
            LinkTable::FileDescribesBiosample => "file_describes_biosample",
            LinkTable::FileDescribesSubject => "file_describes_subject",
            LinkTable::BiosampleFromSubject => "biosample_from_subject",
            LinkTable::FileInCollection => "file_in_collection",
            LinkTable::BiosampleInCollection => "biosample_in_collection",
            LinkTable::SubjectInCollection => "subject_in_collection",
        }
    }

    pub fn prefixes(self) -> (&'static str, &'static str) {
        match self {
            LinkTable::ProjectInProject => ("parent_project", "child_project"),
            LinkTable::CollectionInCollection => ("superset_collection", "subset_collection"),
            LinkTable::CollectionDefinedByProject => ("collection", "project"),
            LinkTable::FileDescribesBiosample => ("file", "biosample"),
            LinkTable::FileDescribesSubject => ("file", "subject"),
            LinkTable::BiosampleFromSubject => ("biosample", "subject"),
            LinkTable::FileInCollection => ("file", "collection"),
            LinkTable::BiosampleInCollection => ("biosample", "collection"),
            LinkTable::SubjectInCollection => ("subject", "collection"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Association {
    SubjectRace,
    SubjectSpecies,
    SubjectDisease,
    SubjectPhenotype,
    SubjectSubstance,
    BiosampleDisease,
    BiosampleGene,
    BiosampleSubstance,
    CollectionAnatomy,
    CollectionCompound,
    CollectionDisease,
    CollectionGene,
    CollectionPhenotype,
    CollectionProtein,
    CollectionSubstance,
    CollectionTaxonomy,
}

impl Association {
    pub const ALL: [Association; 16] = [
        Association::SubjectRace,
        Association::SubjectSpecies,
        Association::SubjectDisease,
        Association::SubjectPhenotype,
        Association::SubjectSubstance,
        Association::BiosampleDisease,
        Association::BiosampleGene,
        Association::BiosampleSubstance,
        Association::CollectionAnatomy,
        Association::CollectionCompound,
        Association::CollectionDisease,
        Association::CollectionGene,
        Association::CollectionPhenotype,
        Association::CollectionProtein,
        Association::CollectionSubstance,
        Association::CollectionTaxonomy,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            Association::SubjectRace => "subject_race",
            Association::SubjectSpecies => "subject_species",
            Association::SubjectDisease => "subject_disease",
            Association::SubjectPhenotype => "subject_phenotype",
            Association::SubjectSubstance => "subject_substance",
            Association::BiosampleDisease => "biosample_disease",
            Association::BiosampleGene => "biosample_gene",
            Association::BiosampleSubstance => "biosample_substance",
            Association::CollectionAnatomy => "collection_anatomy",
            Association::CollectionCompound => "collection_compound",
            Association::CollectionDisease => "collection_disease",
            Association::CollectionGene => "collection_gene",
            Association::CollectionPhenotype => "collection_phenotype",
            Association::CollectionProtein => "collection_protein",
            Association::CollectionSubstance => "collection_substance",
            Association::CollectionTaxonomy => "collection_taxonomy",
        }
    }

    pub fn owner(self) -> EntityKind {
        match self {
            Association::SubjectRace
            | Association::SubjectSpecies
            | Association::SubjectDisease
            | Association::SubjectPhenotype
            | Association::SubjectSubstance => EntityKind::Subject,
            Association::BiosampleDisease
            | Association::BiosampleGene
            | Association::BiosampleSubstance => EntityKind::Biosample,
            _ => EntityKind::Collection,
        }
    }

    pub fn term_column(self) -> &'static str {
        match self {
            Association::SubjectRace => "race",
            Association::SubjectSpecies => "species",
            Association::SubjectDisease
            | Association::BiosampleDisease
            | Association::CollectionDisease => "disease",
            Association::SubjectPhenotype | Association::CollectionPhenotype => "phenotype",
            Association::SubjectSubstance
            | Association::BiosampleSubstance
            | Association::CollectionSubstance => "substance",
            Association::BiosampleGene | Association::CollectionGene => "gene",
            Association::CollectionAnatomy => "anatomy",
            Association::CollectionCompound => "compound",
            Association::CollectionProtein => "protein",
            Association::CollectionTaxonomy => "taxon",
        }
    }

    pub fn vocabulary(self) -> VocabularyKind {
        match self {
            Association::SubjectRace => VocabularyKind::Race,
            Association::SubjectSpecies | Association::CollectionTaxonomy => {
                VocabularyKind::NcbiTaxonomy
            }
            Association::SubjectDisease
            | Association::BiosampleDisease
            | Association::CollectionDisease => VocabularyKind::Disease,
            Association::SubjectPhenotype | Association::CollectionPhenotype => {
                VocabularyKind::Phenotype
            }
            Association::SubjectSubstance
            | Association::BiosampleSubstance
            | Association::CollectionSubstance => VocabularyKind::Substance,
            Association::BiosampleGene | Association::CollectionGene => VocabularyKind::Gene,
            Association::CollectionAnatomy => VocabularyKind::Anatomy,
            Association::CollectionCompound => VocabularyKind::Compound,
            Association::CollectionProtein => VocabularyKind::Protein,
        }
    }

    pub fn qualifier(self) -> Option<VocabularyKind> {
        match self {
            Association::SubjectDisease
            | Association::BiosampleDisease
            | Association::CollectionDisease => Some(VocabularyKind::DiseaseAssociationType),
            Association::SubjectPhenotype | Association::CollectionPhenotype => {
                Some(VocabularyKind::PhenotypeAssociationType)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub left: EntityKey,
    pub right: EntityKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermLink {
    pub entity: EntityKey,
    pub term: String,
    pub association_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleTaxonLink {
    pub subject: EntityKey,
    pub role: String,
    pub taxon: String,
}

/// Every C2M2 table of one or more merged datapackages, still keyed by external ids.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub sources: Vec<Utf8PathBuf>,
    pub id_namespaces: Vec<IdNamespaceRow>,
    pub dccs: Vec<DccRow>,
    pub projects: Vec<ProjectRow>,
    pub files: Vec<FileRow>,
    pub biosamples: Vec<BiosampleRow>,
    pub subjects: Vec<SubjectRow>,
    pub collections: Vec<CollectionRow>,
    pub links: BTreeMap<LinkTable, Vec<Link>>,
    pub associations: BTreeMap<Association, Vec<TermLink>>,
    pub subject_role_taxonomy: Vec<RoleTaxonLink>,
    pub terms: BTreeMap<VocabularyKind, Vec<TermRow>>,
    pub slims: BTreeMap<VocabularyKind, Vec<SlimRow>>,
    pub protein_gene: Vec<ProteinGeneRow>,
}

type RawRow = HashMap<String, Option<String>>;

const SLIM_TABLES: [VocabularyKind; 5] = [
    VocabularyKind::Anatomy,
    VocabularyKind::AssayType,
    VocabularyKind::DataType,
    VocabularyKind::Disease,
    VocabularyKind::FileFormat,
];

impl Submission {
    pub fn load(package: &Datapackage) -> Result<Self, FactError> {
        let mut submission = Submission {
            sources: vec![package.origin.clone()],
            id_namespaces: package.rows("id_namespace")?,
            dccs: package.rows("dcc")?,
            projects: package.rows("project")?,
            files: package.rows("file")?,
            biosamples: package.rows("biosample")?,
            subjects: package.rows("subject")?,
            collections: package.rows("collection")?,
            protein_gene: package.rows("protein_gene")?,
            ..Submission::default()
        };

        for table in LinkTable::ALL {
            let (left, right) = table.prefixes();
            let rows: Vec<RawRow> = package.rows(table.table_name())?;
            let links = rows
                .iter()
                .map(|row| {
                    Ok(Link {
                        left: compound_key(table.table_name(), row, left)?,
                        right: compound_key(table.table_name(), row, right)?,
                    })
                })
                .collect::<Result<Vec<_>, FactError>>()?;
            submission.links.insert(table, links);
        }

        for association in Association::ALL {
            let name = association.table_name();
            let prefix = association.owner().as_str();
            let rows: Vec<RawRow> = package.rows(name)?;
            let links = rows
                .iter()
                .map(|row| {
                    Ok(TermLink {
                        entity: compound_key(name, row, prefix)?,
                        term: required(name, row, association.term_column())?,
                        association_type: optional(row, "association_type"),
                    })
                })
                .collect::<Result<Vec<_>, FactError>>()?;
            submission.associations.insert(association, links);
        }

        let rows: Vec<RawRow> = package.rows("subject_role_taxonomy")?;
        submission.subject_role_taxonomy = rows
            .iter()
            .map(|row| {
                Ok(RoleTaxonLink {
                    subject: compound_key("subject_role_taxonomy", row, "subject")?,
                    role: required("subject_role_taxonomy", row, "role_id")?,
                    taxon: required("subject_role_taxonomy", row, "taxonomy_id")?,
                })
            })
            .collect::<Result<Vec<_>, FactError>>()?;

        for kind in VocabularyKind::ALL {
            if package.has_table(kind.table_name()) {
                submission
                    .terms
                    .insert(kind, package.rows(kind.table_name())?);
            }
        }
        for kind in SLIM_TABLES {
            let name = format!("{}_slim", kind.table_name());
            if package.has_table(&name) {
                submission.slims.insert(kind, package.rows(&name)?);
            }
        }

        for name in package.table_names() {
            if !is_known_table(name) {
                debug!(table = name, source = %package.origin, "ignoring unrecognised table");
            }
        }

        Ok(submission)
    }

    /// Appends another datapackage. Entity keys are checked for duplicates during
    /// resolution; vocabulary rows are deduplicated by term id there as well.
    pub fn merge(&mut self, other: Submission) {
        self.sources.extend(other.sources);
        self.id_namespaces.extend(other.id_namespaces);
        self.dccs.extend(other.dccs);
        self.projects.extend(other.projects);
        self.files.extend(other.files);
        self.biosamples.extend(other.biosamples);
        self.subjects.extend(other.subjects);
        self.collections.extend(other.collections);
        for (table, links) in other.links {
            self.links.entry(table).or_default().extend(links);
        }
        for (association, links) in other.associations {
            self.associations.entry(association).or_default().extend(links);
        }
        self.subject_role_taxonomy.extend(other.subject_role_taxonomy);
        for (kind, rows) in other.terms {
            self.terms.entry(kind).or_default().extend(rows);
        }
        for (kind, rows) in other.slims {
            self.slims.entry(kind).or_default().extend(rows);
        }
        self.protein_gene.extend(other.protein_gene);
    }

    pub fn links(&self, table: LinkTable) -> &[Link] {
        self.links.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn associations(&self, association: Association) -> &[TermLink] {
        self.associations
            .get(&association)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn is_known_table(name: &str) -> bool {
    const ENTITY_TABLES: [&str; 10] = [
        "id_namespace",
        "dcc",
        "project",
        "file",
        "biosample",
        "subject",
        "collection",
        "protein_gene",
        "subject_role_taxonomy",
        "c2m2_datapackage",
    ];
    ENTITY_TABLES.contains(&name)
        || LinkTable::ALL.iter().any(|t| t.table_name() == name)
        || Association::ALL.iter().any(|a| a.table_name() == name)
        || VocabularyKind::from_table_name(name).is_some()
        || name
            .strip_suffix("_slim")
            .and_then(VocabularyKind::from_table_name)
            .is_some()
}

fn compound_key(table: &str, row: &RawRow, prefix: &str) -> Result<EntityKey, FactError> {
    Ok(EntityKey::new(
        required(table, row, &format!("{prefix}_id_namespace"))?,
        required(table, row, &format!("{prefix}_local_id"))?,
    ))
}

fn required(table: &str, row: &RawRow, column: &str) -> Result<String, FactError> {
    match row.get(column) {
        Some(Some(value)) => Ok(value.clone()),
        Some(None) => Err(FactError::TableParse {
            table: table.to_string(),
            line: 0,
            message: format!("empty required column {column}"),
        }),
        None => Err(FactError::MissingColumn {
            table: table.to_string(),
            column: column.to_string(),
        }),
    }
}

fn optional(row: &RawRow, column: &str) -> Option<String> {
    row.get(column).cloned().flatten()
}

fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    value
        .map(|raw| raw.trim().parse::<u64>().map_err(serde::de::Error::custom))
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;

    use super::*;

    fn package(tables: &[(&str, &str)]) -> Datapackage {
        let tables = tables
            .iter()
            .map(|(name, content)| (name.to_string(), content.to_string()))
            .collect::<BTreeMap<_, _>>();
        Datapackage::from_tables("memory", tables)
    }

    #[test]
    fn load_links_and_associations() {
        let package = package(&[
            (
                "file_describes_biosample",
                "file_id_namespace\tfile_local_id\tbiosample_id_namespace\tbiosample_local_id\nns\tF1\tns\tB1\n",
            ),
            (
                "subject_disease",
                "subject_id_namespace\tsubject_local_id\tassociation_type\tdisease\nns\tS1\tcfde_disease_association_type:1\tDOID:162\n",
            ),
            (
                "file",
                "id_namespace\tlocal_id\tproject_id_namespace\tproject_local_id\tsize_in_bytes\nns\tF1\tns\tP1\t1024\n",
            ),
        ]);
        let submission = Submission::load(&package).unwrap();
        assert_eq!(submission.links(LinkTable::FileDescribesBiosample).len(), 1);
        let disease = &submission.associations(Association::SubjectDisease)[0];
        assert_eq!(disease.term, "DOID:162");
        assert_eq!(
            disease.association_type.as_deref(),
            Some("cfde_disease_association_type:1")
        );
        assert_eq!(submission.files[0].size_in_bytes, Some(1024));
        assert!(submission.links(LinkTable::ProjectInProject).is_empty());
    }

    #[test]
    fn missing_link_column_is_reported() {
        let package = package(&[(
            "project_in_project",
            "parent_project_id_namespace\tparent_project_local_id\nns\tP1\n",
        )]);
        let err = Submission::load(&package).unwrap_err();
        assert_matches!(err, FactError::MissingColumn { column, .. } if column == "child_project_id_namespace");
    }

    #[test]
    fn merge_concatenates_tables() {
        let a = package(&[("anatomy", "id\tname\nUBERON:0002107\tliver\n")]);
        let b = package(&[("anatomy", "id\tname\nUBERON:0000948\theart\n")]);
        let mut merged = Submission::load(&a).unwrap();
        merged.merge(Submission::load(&b).unwrap());
        assert_eq!(merged.sources.len(), 2);
        assert_eq!(merged.terms[&VocabularyKind::Anatomy].len(), 2);
    }
}
