use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::domain::{EntityKey, EntityKind, Nid, VocabularyKind};
use crate::error::FactError;
use crate::fact::{FieldDomain, Render};
use crate::ids::IdResolver;
use crate::submission::{Association, LinkTable, Submission};
use crate::vocab::Vocabularies;

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceRecord {
    pub id: String,
    pub abbreviation: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectRecord {
    pub key: EntityKey,
    pub namespace: Nid,
    pub abbreviation: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DccRecord {
    pub id: String,
    pub name: Option<String>,
    pub abbreviation: Option<String>,
    pub project: Nid,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub key: EntityKey,
    pub namespace: Nid,
    pub project: Nid,
    pub persistent_id: Option<String>,
    pub size_in_bytes: Option<u64>,
    pub filename: Option<String>,
    pub file_format: Option<Nid>,
    pub compression_format: Option<Nid>,
    pub data_type: Option<Nid>,
    pub assay_type: Option<Nid>,
    pub analysis_type: Option<Nid>,
    pub mime_type: Option<Nid>,
    pub bundle_collection: Option<Nid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BiosampleRecord {
    pub key: EntityKey,
    pub namespace: Nid,
    pub project: Nid,
    pub persistent_id: Option<String>,
    pub anatomy: Option<Nid>,
    pub assay_type: Option<Nid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectRecord {
    pub key: EntityKey,
    pub namespace: Nid,
    pub project: Nid,
    pub persistent_id: Option<String>,
    pub granularity: Option<Nid>,
    pub sex: Option<Nid>,
    pub ethnicity: Option<Nid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionRecord {
    pub key: EntityKey,
    pub namespace: Nid,
    pub persistent_id: Option<String>,
    pub abbreviation: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermAssociation {
    pub entity: Nid,
    pub term: Nid,
    pub qualifier: Option<Nid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleTaxon {
    pub subject: Nid,
    pub role: Nid,
    pub taxon: Nid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    Project,
    Entity(EntityKind),
}

pub fn link_sides(table: LinkTable) -> (LinkSide, LinkSide) {
    use LinkSide::{Entity, Project};
    match table {
        LinkTable::ProjectInProject => (Project, Project),
        LinkTable::CollectionInCollection => (
            Entity(EntityKind::Collection),
            Entity(EntityKind::Collection),
        ),
        LinkTable::CollectionDefinedByProject => (Entity(EntityKind::Collection), Project),
        LinkTable::FileDescribesBiosample => {
            (Entity(EntityKind::File), Entity(EntityKind::Biosample))
        }
        LinkTable::FileDescribesSubject => (Entity(EntityKind::File), Entity(EntityKind::Subject)),
        LinkTable::BiosampleFromSubject => {
            (Entity(EntityKind::Biosample), Entity(EntityKind::Subject))
        }
        LinkTable::FileInCollection => (Entity(EntityKind::File), Entity(EntityKind::Collection)),
        LinkTable::BiosampleInCollection => (
            Entity(EntityKind::Biosample),
            Entity(EntityKind::Collection),
        ),
        LinkTable::SubjectInCollection => (
            Entity(EntityKind::Subject),
            Entity(EntityKind::Collection),
        ),
    }
}

/// A validated batch where every reference has been resolved to a surrogate.
/// Record vectors are indexed by their nid.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub ids: IdResolver,
    pub vocab: Vocabularies,
    pub namespaces: Vec<NamespaceRecord>,
    pub projects: Vec<ProjectRecord>,
    pub dccs: Vec<DccRecord>,
    pub files: Vec<FileRecord>,
    pub biosamples: Vec<BiosampleRecord>,
    pub subjects: Vec<SubjectRecord>,
    pub collections: Vec<CollectionRecord>,
    links: BTreeMap<LinkTable, Vec<(Nid, Nid)>>,
    associations: BTreeMap<Association, Vec<TermAssociation>>,
    pub subject_role_taxonomy: Vec<RoleTaxon>,
}

impl Batch {
    /// Resolves every external key of `submission`. Any dangling reference aborts the batch.
    pub fn resolve(submission: &Submission) -> Result<Self, FactError> {
        let mut batch = Batch {
            vocab: Vocabularies::build(
                &submission.terms,
                &submission.slims,
                &submission.protein_gene,
            )?,
            ..Batch::default()
        };

        for row in &submission.id_namespaces {
            let (_, fresh) = batch.ids.namespaces.assign(row.id.clone())?;
            if fresh {
                batch.namespaces.push(NamespaceRecord {
                    id: row.id.clone(),
                    abbreviation: row.abbreviation.clone(),
                    name: row.name.clone(),
                });
            }
        }

        for row in &submission.projects {
            let key = EntityKey::new(&row.id_namespace, &row.local_id);
            batch.ids.projects.assign_unique("project", key.clone())?;
            let namespace = batch.namespace(&row.id_namespace)?;
            batch.projects.push(ProjectRecord {
                key,
                namespace,
                abbreviation: row.abbreviation.clone(),
                name: row.name.clone(),
                description: row.description.clone(),
            });
        }

        for row in &submission.dccs {
            if batch.dccs.iter().any(|dcc| dcc.id == row.id) {
                continue;
            }
            let project = batch.ids.resolve_project(
                "dcc",
                "project",
                &EntityKey::new(&row.project_id_namespace, &row.project_local_id),
            )?;
            batch.dccs.push(DccRecord {
                id: row.id.clone(),
                name: row.dcc_name.clone(),
                abbreviation: row.dcc_abbreviation.clone(),
                project,
            });
        }

        // Register every entity before resolving any cross-entity reference.
        for row in &submission.files {
            batch
                .ids
                .files
                .assign_unique("file", EntityKey::new(&row.id_namespace, &row.local_id))?;
        }
        for row in &submission.biosamples {
            batch.ids.biosamples.assign_unique(
                "biosample",
                EntityKey::new(&row.id_namespace, &row.local_id),
            )?;
        }
        for row in &submission.subjects {
            batch
                .ids
                .subjects
                .assign_unique("subject", EntityKey::new(&row.id_namespace, &row.local_id))?;
        }
        for row in &submission.collections {
            batch.ids.collections.assign_unique(
                "collection",
                EntityKey::new(&row.id_namespace, &row.local_id),
            )?;
        }

        batch.resolve_files(submission)?;
        batch.resolve_biosamples(submission)?;
        batch.resolve_subjects(submission)?;
        for row in &submission.collections {
            let namespace = batch.namespace(&row.id_namespace)?;
            batch.collections.push(CollectionRecord {
                key: EntityKey::new(&row.id_namespace, &row.local_id),
                namespace,
                persistent_id: non_empty(&row.persistent_id),
                abbreviation: row.abbreviation.clone(),
                name: row.name.clone(),
            });
        }

        batch.resolve_links(submission)?;
        batch.resolve_associations(submission)?;

        for link in &submission.subject_role_taxonomy {
            let subject = batch.ids.resolve_entity(
                EntityKind::Subject,
                "subject_role_taxonomy",
                "subject",
                &link.subject,
            )?;
            let role = batch.vocab.resolve(VocabularyKind::SubjectRole, &link.role)?;
            let taxon = batch
                .vocab
                .resolve(VocabularyKind::NcbiTaxonomy, &link.taxon)?;
            batch.subject_role_taxonomy.push(RoleTaxon {
                subject,
                role,
                taxon,
            });
        }

        debug!(
            files = batch.files.len(),
            biosamples = batch.biosamples.len(),
            subjects = batch.subjects.len(),
            collections = batch.collections.len(),
            projects = batch.projects.len(),
            "resolved batch"
        );
        Ok(batch)
    }

    fn namespace(&mut self, id: &str) -> Result<Nid, FactError> {
        let nid = self.ids.namespace(id)?;
        if nid.index() == self.namespaces.len() {
            self.namespaces.push(NamespaceRecord {
                id: id.to_string(),
                abbreviation: None,
                name: None,
            });
        }
        Ok(nid)
    }

    fn resolve_files(&mut self, submission: &Submission) -> Result<(), FactError> {
        for row in &submission.files {
            let project = self.ids.resolve_project(
                "file",
                "project",
                &EntityKey::new(&row.project_id_namespace, &row.project_local_id),
            )?;
            let bundle_collection = match (
                &row.bundle_collection_id_namespace,
                &row.bundle_collection_local_id,
            ) {
                (Some(namespace), Some(local_id)) => Some(self.ids.resolve_entity(
                    EntityKind::Collection,
                    "file",
                    "bundle_collection",
                    &EntityKey::new(namespace, local_id),
                )?),
                _ => None,
            };
            let namespace = self.namespace(&row.id_namespace)?;
            let vocab = &mut self.vocab;
            let record = FileRecord {
                key: EntityKey::new(&row.id_namespace, &row.local_id),
                namespace,
                project,
                persistent_id: non_empty(&row.persistent_id),
                size_in_bytes: row.size_in_bytes,
                filename: row.filename.clone(),
                file_format: vocab
                    .resolve_opt(VocabularyKind::FileFormat, row.file_format.as_deref())?,
                compression_format: vocab.resolve_opt(
                    VocabularyKind::FileFormat,
                    row.compression_format.as_deref(),
                )?,
                data_type: vocab.resolve_opt(VocabularyKind::DataType, row.data_type.as_deref())?,
                assay_type: vocab
                    .resolve_opt(VocabularyKind::AssayType, row.assay_type.as_deref())?,
                analysis_type: vocab
                    .resolve_opt(VocabularyKind::AnalysisType, row.analysis_type.as_deref())?,
                mime_type: vocab.resolve_opt(VocabularyKind::MimeType, row.mime_type.as_deref())?,
                bundle_collection,
            };
            self.files.push(record);
        }
        Ok(())
    }

    fn resolve_biosamples(&mut self, submission: &Submission) -> Result<(), FactError> {
        for row in &submission.biosamples {
            let project = self.ids.resolve_project(
                "biosample",
                "project",
                &EntityKey::new(&row.project_id_namespace, &row.project_local_id),
            )?;
            let anatomy = self
                .vocab
                .resolve_opt(VocabularyKind::Anatomy, row.anatomy.as_deref())?;
            let assay_type = self
                .vocab
                .resolve_opt(VocabularyKind::AssayType, row.assay_type.as_deref())?;
            let namespace = self.namespace(&row.id_namespace)?;
            self.biosamples.push(BiosampleRecord {
                key: EntityKey::new(&row.id_namespace, &row.local_id),
                namespace,
                project,
                persistent_id: non_empty(&row.persistent_id),
                anatomy,
                assay_type,
            });
        }
        Ok(())
    }

    fn resolve_subjects(&mut self, submission: &Submission) -> Result<(), FactError> {
        for row in &submission.subjects {
            let project = self.ids.resolve_project(
                "subject",
                "project",
                &EntityKey::new(&row.project_id_namespace, &row.project_local_id),
            )?;
            let granularity = self
                .vocab
                .resolve_opt(VocabularyKind::SubjectGranularity, row.granularity.as_deref())?;
            let sex = self
                .vocab
                .resolve_opt(VocabularyKind::Sex, row.sex.as_deref())?;
            let ethnicity = self
                .vocab
                .resolve_opt(VocabularyKind::Ethnicity, row.ethnicity.as_deref())?;
            let namespace = self.namespace(&row.id_namespace)?;
            self.subjects.push(SubjectRecord {
                key: EntityKey::new(&row.id_namespace, &row.local_id),
                namespace,
                project,
                persistent_id: non_empty(&row.persistent_id),
                granularity,
                sex,
                ethnicity,
            });
        }
        Ok(())
    }

    fn resolve_links(&mut self, submission: &Submission) -> Result<(), FactError> {
        for table in LinkTable::ALL {
            let (left_side, right_side) = link_sides(table);
            let (left_column, right_column) = table.prefixes();
            let mut pairs = Vec::with_capacity(submission.links(table).len());
            for link in submission.links(table) {
                let left = self.resolve_side(left_side, table, left_column, &link.left)?;
                let right = self.resolve_side(right_side, table, right_column, &link.right)?;
                pairs.push((left, right));
            }
            pairs.sort_unstable();
            pairs.dedup();
            self.links.insert(table, pairs);
        }
        Ok(())
    }

    fn resolve_side(
        &self,
        side: LinkSide,
        table: LinkTable,
        column: &str,
        key: &EntityKey,
    ) -> Result<Nid, FactError> {
        match side {
            LinkSide::Project => self.ids.resolve_project(table.table_name(), column, key),
            LinkSide::Entity(kind) => {
                self.ids
                    .resolve_entity(kind, table.table_name(), column, key)
            }
        }
    }

    fn resolve_associations(&mut self, submission: &Submission) -> Result<(), FactError> {
        for association in Association::ALL {
            let mut rows = Vec::with_capacity(submission.associations(association).len());
            for link in submission.associations(association) {
                let entity = self.ids.resolve_entity(
                    association.owner(),
                    association.table_name(),
                    association.owner().as_str(),
                    &link.entity,
                )?;
                let term = self.vocab.resolve(association.vocabulary(), &link.term)?;
                let qualifier = match association.qualifier() {
                    Some(kind) => self
                        .vocab
                        .resolve_opt(kind, link.association_type.as_deref())?,
                    None => None,
                };
                rows.push(TermAssociation {
                    entity,
                    term,
                    qualifier,
                });
            }
            self.associations.insert(association, rows);
        }
        Ok(())
    }

    pub fn links(&self, table: LinkTable) -> &[(Nid, Nid)] {
        self.links.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn associations(&self, association: Association) -> &[TermAssociation] {
        self.associations
            .get(&association)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn entity_count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::File => self.files.len(),
            EntityKind::Biosample => self.biosamples.len(),
            EntityKind::Subject => self.subjects.len(),
            EntityKind::Collection => self.collections.len(),
        }
    }

    pub fn adjacency(&self, table: LinkTable, reverse: bool) -> Vec<Vec<Nid>> {
        let (left_side, right_side) = link_sides(table);
        let from_side = if reverse { right_side } else { left_side };
        let mut adjacency = vec![Vec::new(); self.side_len(from_side)];
        for &(left, right) in self.links(table) {
            let (from, to) = if reverse { (right, left) } else { (left, right) };
            if let Some(targets) = adjacency.get_mut(from.index()) {
                targets.push(to);
            }
        }
        adjacency
    }

    fn side_len(&self, side: LinkSide) -> usize {
        match side {
            LinkSide::Project => self.projects.len(),
            LinkSide::Entity(kind) => self.entity_count(kind),
        }
    }

    pub fn entity_key(&self, kind: EntityKind, nid: Nid) -> Option<&EntityKey> {
        self.ids.entities(kind).key(nid)
    }

    pub fn project_key(&self, nid: Nid) -> Option<&EntityKey> {
        self.ids.projects.key(nid)
    }
}

impl Render for Batch {
    fn render(&self, domain: FieldDomain, nid: Nid) -> String {
        let key = match domain {
            FieldDomain::Namespace => self.ids.namespaces.key(nid).cloned(),
            FieldDomain::Project => self.project_key(nid).map(ToString::to_string),
            FieldDomain::Term(kind) => return self.vocab.term_id(kind, nid),
        };
        key.unwrap_or_else(|| format!("#{nid}"))
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
