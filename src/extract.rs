use rayon::prelude::*;
use tracing::debug;

use crate::batch::Batch;
use crate::closure::TransitiveClosure;
use crate::domain::{EntityKind, Nid};
use crate::error::FactError;
use crate::fact::{
    CoreFact, FactIdentity, FactSets, GeneFact, ProteinFact, PubchemFact, Qualified, TermSet,
};
use crate::submission::{Association, LinkTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    FileToBiosample,
    FileToSubject,
    BiosampleToSubject,
    BiosampleToFile,
    SubjectToBiosample,
    SubjectToFile,
}

impl Hop {
    pub const ALL: [Hop; 6] = [
        Hop::FileToBiosample,
        Hop::FileToSubject,
        Hop::BiosampleToSubject,
        Hop::BiosampleToFile,
        Hop::SubjectToBiosample,
        Hop::SubjectToFile,
    ];

    fn link(self) -> (LinkTable, bool) {
        match self {
            Hop::FileToBiosample => (LinkTable::FileDescribesBiosample, false),
            Hop::FileToSubject => (LinkTable::FileDescribesSubject, false),
            Hop::BiosampleToSubject => (LinkTable::BiosampleFromSubject, false),
            Hop::BiosampleToFile => (LinkTable::FileDescribesBiosample, true),
            Hop::SubjectToBiosample => (LinkTable::BiosampleFromSubject, true),
            Hop::SubjectToFile => (LinkTable::FileDescribesSubject, true),
        }
    }

    pub fn target(self) -> EntityKind {
        match self {
            Hop::FileToBiosample | Hop::SubjectToBiosample => EntityKind::Biosample,
            Hop::FileToSubject | Hop::BiosampleToSubject => EntityKind::Subject,
            Hop::BiosampleToFile | Hop::SubjectToFile => EntityKind::File,
        }
    }
}

const FILE_PATHS: &[&[Hop]] = &[
    &[],
    &[Hop::FileToBiosample],
    &[Hop::FileToBiosample, Hop::BiosampleToSubject],
    &[Hop::FileToSubject],
];
const BIOSAMPLE_PATHS: &[&[Hop]] = &[&[], &[Hop::BiosampleToSubject], &[Hop::BiosampleToFile]];
const SUBJECT_PATHS: &[&[Hop]] = &[
    &[],
    &[Hop::SubjectToBiosample],
    &[Hop::SubjectToBiosample, Hop::BiosampleToFile],
    &[Hop::SubjectToFile],
];
// Collections aggregate their members instead of walking links.
const COLLECTION_PATHS: &[&[Hop]] = &[&[]];

/// Join paths from an entity of `kind` to the entities whose attributes it gathers.
/// The empty path is the entity itself. Paths reaching the same entity are unioned.
pub fn join_paths(kind: EntityKind) -> &'static [&'static [Hop]] {
    match kind {
        EntityKind::File => FILE_PATHS,
        EntityKind::Biosample => BIOSAMPLE_PATHS,
        EntityKind::Subject => SUBJECT_PATHS,
        EntityKind::Collection => COLLECTION_PATHS,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Attributes {
    pub projects: Vec<Nid>,
    pub phenotypes: Vec<Qualified>,
    pub diseases: Vec<Qualified>,
    pub substances: Vec<Nid>,
    pub genes: Vec<Nid>,
    pub proteins: Vec<Nid>,
    pub compounds: Vec<Nid>,
    pub sexes: Vec<Nid>,
    pub races: Vec<Nid>,
    pub ethnicities: Vec<Nid>,
    pub subject_roles: Vec<Nid>,
    pub subject_granularities: Vec<Nid>,
    pub subject_species: Vec<Nid>,
    pub ncbi_taxons: Vec<Nid>,
    pub anatomies: Vec<Nid>,
    pub assay_types: Vec<Nid>,
    pub analysis_types: Vec<Nid>,
    pub file_formats: Vec<Nid>,
    pub compression_formats: Vec<Nid>,
    pub data_types: Vec<Nid>,
    pub mime_types: Vec<Nid>,
}

impl Attributes {
    fn absorb(&mut self, other: &Attributes) {
        self.phenotypes.extend_from_slice(&other.phenotypes);
        self.diseases.extend_from_slice(&other.diseases);
        self.substances.extend_from_slice(&other.substances);
        self.genes.extend_from_slice(&other.genes);
        self.proteins.extend_from_slice(&other.proteins);
        self.compounds.extend_from_slice(&other.compounds);
        self.sexes.extend_from_slice(&other.sexes);
        self.races.extend_from_slice(&other.races);
        self.ethnicities.extend_from_slice(&other.ethnicities);
        self.subject_roles.extend_from_slice(&other.subject_roles);
        self.subject_granularities
            .extend_from_slice(&other.subject_granularities);
        self.subject_species.extend_from_slice(&other.subject_species);
        self.ncbi_taxons.extend_from_slice(&other.ncbi_taxons);
        self.anatomies.extend_from_slice(&other.anatomies);
        self.assay_types.extend_from_slice(&other.assay_types);
        self.analysis_types.extend_from_slice(&other.analysis_types);
        self.file_formats.extend_from_slice(&other.file_formats);
        self.compression_formats
            .extend_from_slice(&other.compression_formats);
        self.data_types.extend_from_slice(&other.data_types);
        self.mime_types.extend_from_slice(&other.mime_types);
    }

    fn absorb_with_projects(&mut self, other: &Attributes) {
        self.projects.extend_from_slice(&other.projects);
        self.absorb(other);
    }

    fn into_sets(self, dccs: TermSet) -> FactSets {
        FactSets {
            projects: self.projects.into_iter().collect(),
            dccs,
            phenotypes: self.phenotypes.into_iter().collect(),
            diseases: self.diseases.into_iter().collect(),
            substances: self.substances.into_iter().collect(),
            genes: self.genes.into_iter().collect(),
            sexes: self.sexes.into_iter().collect(),
            races: self.races.into_iter().collect(),
            ethnicities: self.ethnicities.into_iter().collect(),
            subject_roles: self.subject_roles.into_iter().collect(),
            subject_granularities: self.subject_granularities.into_iter().collect(),
            subject_species: self.subject_species.into_iter().collect(),
            ncbi_taxons: self.ncbi_taxons.into_iter().collect(),
            anatomies: self.anatomies.into_iter().collect(),
            assay_types: self.assay_types.into_iter().collect(),
            analysis_types: self.analysis_types.into_iter().collect(),
            file_formats: self.file_formats.into_iter().collect(),
            compression_formats: self.compression_formats.into_iter().collect(),
            data_types: self.data_types.into_iter().collect(),
            mime_types: self.mime_types.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub core: CoreFact,
    pub gene: GeneFact,
    pub protein: ProteinFact,
    pub pubchem: PubchemFact,
}

#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub files: Vec<Candidate>,
    pub biosamples: Vec<Candidate>,
    pub subjects: Vec<Candidate>,
    pub collections: Vec<Candidate>,
}

impl Candidates {
    pub fn of(&self, kind: EntityKind) -> &[Candidate] {
        match kind {
            EntityKind::File => &self.files,
            EntityKind::Biosample => &self.biosamples,
            EntityKind::Subject => &self.subjects,
            EntityKind::Collection => &self.collections,
        }
    }
}

pub struct Extractor<'a> {
    batch: &'a Batch,
    projects: &'a TransitiveClosure,
    collections: &'a TransitiveClosure,
    dcc_projects: Vec<bool>,
    hops: Vec<Vec<Vec<Nid>>>,
    file_level: Vec<Attributes>,
    biosample_level: Vec<Attributes>,
    subject_level: Vec<Attributes>,
    collection_level: Vec<Attributes>,
    collection_members: [Vec<Vec<Nid>>; 3],
    bundles: Vec<bool>,
}

impl<'a> Extractor<'a> {
    /// `roots` stand in for DCC projects when the batch carries no `dcc` rows.
    pub fn new(
        batch: &'a Batch,
        projects: &'a TransitiveClosure,
        collections: &'a TransitiveClosure,
        roots: &[Nid],
    ) -> Self {
        let mut dcc_projects = vec![false; batch.projects.len()];
        let dcc_sources: Vec<Nid> = if batch.dccs.is_empty() {
            roots.to_vec()
        } else {
            batch.dccs.iter().map(|dcc| dcc.project).collect()
        };
        for project in dcc_sources {
            if let Some(flag) = dcc_projects.get_mut(project.index()) {
                *flag = true;
            }
        }

        let hops = Hop::ALL
            .iter()
            .map(|hop| {
                let (table, reverse) = hop.link();
                batch.adjacency(table, reverse)
            })
            .collect();

        let mut bundles = vec![false; batch.collections.len()];
        for collection in batch.files.iter().filter_map(|file| file.bundle_collection) {
            if let Some(flag) = bundles.get_mut(collection.index()) {
                *flag = true;
            }
        }

        Self {
            batch,
            projects,
            collections,
            dcc_projects,
            hops,
            file_level: file_level(batch),
            biosample_level: biosample_level(batch),
            subject_level: subject_level(batch),
            collection_level: collection_level(batch),
            collection_members: [
                batch.adjacency(LinkTable::FileInCollection, true),
                batch.adjacency(LinkTable::BiosampleInCollection, true),
                batch.adjacency(LinkTable::SubjectInCollection, true),
            ],
            bundles,
        }
    }

    fn level(&self, kind: EntityKind) -> &[Attributes] {
        match kind {
            EntityKind::File => &self.file_level,
            EntityKind::Biosample => &self.biosample_level,
            EntityKind::Subject => &self.subject_level,
            EntityKind::Collection => &self.collection_level,
        }
    }

    fn walk(&self, origin: Nid, path: &[Hop]) -> Vec<Nid> {
        let mut frontier = vec![origin];
        for hop in path {
            let adjacency = &self.hops[*hop as usize];
            let mut next: Vec<Nid> = frontier
                .iter()
                .filter_map(|nid| adjacency.get(nid.index()))
                .flatten()
                .copied()
                .collect();
            next.sort_unstable();
            next.dedup();
            frontier = next;
        }
        frontier
    }

    pub fn gather(&self, kind: EntityKind, nid: Nid) -> Attributes {
        let mut gathered = Attributes::default();
        for path in join_paths(kind) {
            let end = path.last().map_or(kind, |hop| hop.target());
            let level = self.level(end);
            for reached in self.walk(nid, path) {
                if let Some(attributes) = level.get(reached.index()) {
                    gathered.absorb(attributes);
                }
            }
        }
        if let Some(project) = self.own_project(kind, nid) {
            gathered.projects.push(project);
        }
        gathered
    }

    fn own_project(&self, kind: EntityKind, nid: Nid) -> Option<Nid> {
        let index = nid.index();
        match kind {
            EntityKind::File => self.batch.files.get(index).map(|r| r.project),
            EntityKind::Biosample => self.batch.biosamples.get(index).map(|r| r.project),
            EntityKind::Subject => self.batch.subjects.get(index).map(|r| r.project),
            EntityKind::Collection => None,
        }
    }

    fn identity(&self, kind: EntityKind, nid: Nid) -> FactIdentity {
        let index = nid.index();
        let (namespace, persistent_id, is_bundle) = match kind {
            EntityKind::File => {
                let record = self.batch.files.get(index);
                (
                    record.map(|r| r.namespace),
                    record.is_some_and(|r| r.persistent_id.is_some()),
                    record.is_some_and(|r| r.bundle_collection.is_some()),
                )
            }
            EntityKind::Biosample => {
                let record = self.batch.biosamples.get(index);
                (
                    record.map(|r| r.namespace),
                    record.is_some_and(|r| r.persistent_id.is_some()),
                    false,
                )
            }
            EntityKind::Subject => {
                let record = self.batch.subjects.get(index);
                (
                    record.map(|r| r.namespace),
                    record.is_some_and(|r| r.persistent_id.is_some()),
                    false,
                )
            }
            EntityKind::Collection => {
                let record = self.batch.collections.get(index);
                (
                    record.map(|r| r.namespace),
                    record.is_some_and(|r| r.persistent_id.is_some()),
                    self.bundles.get(index).copied().unwrap_or(false),
                )
            }
        };
        FactIdentity {
            id_namespace: namespace,
            is_bundle,
            has_persistent_id: persistent_id,
        }
    }

    fn dccs(&self, projects: &[Nid]) -> TermSet {
        projects
            .iter()
            .flat_map(|project| self.projects.leaders_of(*project))
            .copied()
            .filter(|leader| self.dcc_projects.get(leader.index()).copied().unwrap_or(false))
            .collect()
    }

    pub fn finish(&self, identity: FactIdentity, mut attributes: Attributes) -> Candidate {
        let vocab = &self.batch.vocab;
        let mut proteins = std::mem::take(&mut attributes.proteins);
        for gene in &attributes.genes {
            proteins.extend_from_slice(vocab.proteins_of_gene(*gene));
        }
        let mut compounds = std::mem::take(&mut attributes.compounds);
        compounds.extend(
            attributes
                .substances
                .iter()
                .filter_map(|substance| vocab.compound_of(*substance)),
        );

        let dccs = self.dccs(&attributes.projects);
        let sets = attributes.into_sets(dccs);
        let gene = GeneFact {
            genes: sets.genes.clone(),
        };
        let protein = ProteinFact {
            proteins: proteins.into_iter().collect(),
        };
        let pubchem = PubchemFact {
            substances: sets.substances.clone(),
            compounds: compounds.into_iter().collect(),
        };
        Candidate {
            core: CoreFact::new(identity, sets),
            gene,
            protein,
            pubchem,
        }
    }

    pub fn extract(&self, kind: EntityKind, nid: Nid) -> Candidate {
        let gathered = self.gather(kind, nid);
        self.finish(self.identity(kind, nid), gathered)
    }

    pub fn extract_collection(&self, nid: Nid, members: &Gathered) -> Candidate {
        let mut attributes = Attributes::default();
        for collection in self.collections.members_of(nid) {
            if let Some(own) = self.collection_level.get(collection.index()) {
                attributes.absorb_with_projects(own);
            }
            for (position, kind) in [EntityKind::File, EntityKind::Biosample, EntityKind::Subject]
                .into_iter()
                .enumerate()
            {
                let Some(direct) = self.collection_members[position].get(collection.index()) else {
                    continue;
                };
                let gathered = members.of(kind);
                for member in direct {
                    if let Some(member) = gathered.get(member.index()) {
                        attributes.absorb_with_projects(member);
                    }
                }
            }
        }
        self.finish(self.identity(EntityKind::Collection, nid), attributes)
    }

    fn gather_kind(&self, kind: EntityKind, parallel: bool) -> Result<Vec<Attributes>, FactError> {
        let nids = Nid::range(self.batch.entity_count(kind))?;
        Ok(if parallel {
            nids.into_par_iter()
                .map(|index| self.gather(kind, Nid::new(index)))
                .collect()
        } else {
            nids.map(|index| self.gather(kind, Nid::new(index))).collect()
        })
    }

    pub fn gather_all(&self, parallel: bool) -> Result<Gathered, FactError> {
        let (files, (biosamples, subjects)) = if parallel {
            rayon::join(
                || self.gather_kind(EntityKind::File, true),
                || {
                    rayon::join(
                        || self.gather_kind(EntityKind::Biosample, true),
                        || self.gather_kind(EntityKind::Subject, true),
                    )
                },
            )
        } else {
            (
                self.gather_kind(EntityKind::File, false),
                (
                    self.gather_kind(EntityKind::Biosample, false),
                    self.gather_kind(EntityKind::Subject, false),
                ),
            )
        };
        Ok(Gathered {
            files: files?,
            biosamples: biosamples?,
            subjects: subjects?,
        })
    }

    fn finish_kind(
        &self,
        kind: EntityKind,
        attributes: &[Attributes],
        parallel: bool,
    ) -> Result<Vec<Candidate>, FactError> {
        let nids = Nid::range(attributes.len())?;
        let build = |(attributes, index): (&Attributes, u32)| {
            self.finish(self.identity(kind, Nid::new(index)), attributes.clone())
        };
        Ok(if parallel {
            attributes.par_iter().zip(nids).map(build).collect()
        } else {
            attributes.iter().zip(nids).map(build).collect()
        })
    }

    /// Computes candidates for every entity. The result depends only on the batch,
    /// never on scheduling.
    pub fn extract_all(&self, parallel: bool) -> Result<Candidates, FactError> {
        let gathered = self.gather_all(parallel)?;

        let nids = Nid::range(self.batch.collections.len())?;
        let collections: Vec<Candidate> = if parallel {
            nids.into_par_iter()
                .map(|index| self.extract_collection(Nid::new(index), &gathered))
                .collect()
        } else {
            nids.map(|index| self.extract_collection(Nid::new(index), &gathered))
                .collect()
        };

        let candidates = Candidates {
            files: self.finish_kind(EntityKind::File, &gathered.files, parallel)?,
            biosamples: self.finish_kind(EntityKind::Biosample, &gathered.biosamples, parallel)?,
            subjects: self.finish_kind(EntityKind::Subject, &gathered.subjects, parallel)?,
            collections,
        };
        debug!(
            files = candidates.files.len(),
            biosamples = candidates.biosamples.len(),
            subjects = candidates.subjects.len(),
            collections = candidates.collections.len(),
            "extracted fact candidates"
        );
        Ok(candidates)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gathered {
    pub files: Vec<Attributes>,
    pub biosamples: Vec<Attributes>,
    pub subjects: Vec<Attributes>,
}

impl Gathered {
    pub fn of(&self, kind: EntityKind) -> &[Attributes] {
        match kind {
            EntityKind::File => &self.files,
            EntityKind::Biosample => &self.biosamples,
            EntityKind::Subject => &self.subjects,
            EntityKind::Collection => &[],
        }
    }
}

fn file_level(batch: &Batch) -> Vec<Attributes> {
    batch
        .files
        .iter()
        .map(|file| Attributes {
            file_formats: file.file_format.into_iter().collect(),
            compression_formats: file.compression_format.into_iter().collect(),
            data_types: file.data_type.into_iter().collect(),
            assay_types: file.assay_type.into_iter().collect(),
            analysis_types: file.analysis_type.into_iter().collect(),
            mime_types: file.mime_type.into_iter().collect(),
            ..Attributes::default()
        })
        .collect()
}

fn biosample_level(batch: &Batch) -> Vec<Attributes> {
    let mut level: Vec<Attributes> = batch
        .biosamples
        .iter()
        .map(|biosample| Attributes {
            anatomies: biosample.anatomy.into_iter().collect(),
            assay_types: biosample.assay_type.into_iter().collect(),
            ..Attributes::default()
        })
        .collect();
    for row in batch.associations(Association::BiosampleDisease) {
        if let Some(attributes) = level.get_mut(row.entity.index()) {
            attributes.diseases.push(qualified(row.term, row.qualifier));
        }
    }
    for row in batch.associations(Association::BiosampleGene) {
        if let Some(attributes) = level.get_mut(row.entity.index()) {
            attributes.genes.push(row.term);
        }
    }
    for row in batch.associations(Association::BiosampleSubstance) {
        if let Some(attributes) = level.get_mut(row.entity.index()) {
            attributes.substances.push(row.term);
        }
    }
    level
}

fn subject_level(batch: &Batch) -> Vec<Attributes> {
    let mut level: Vec<Attributes> = batch
        .subjects
        .iter()
        .map(|subject| Attributes {
            sexes: subject.sex.into_iter().collect(),
            ethnicities: subject.ethnicity.into_iter().collect(),
            subject_granularities: subject.granularity.into_iter().collect(),
            ..Attributes::default()
        })
        .collect();
    for association in [
        Association::SubjectRace,
        Association::SubjectSpecies,
        Association::SubjectDisease,
        Association::SubjectPhenotype,
        Association::SubjectSubstance,
    ] {
        for row in batch.associations(association) {
            let Some(attributes) = level.get_mut(row.entity.index()) else {
                continue;
            };
            match association {
                Association::SubjectRace => attributes.races.push(row.term),
                Association::SubjectSpecies => attributes.subject_species.push(row.term),
                Association::SubjectDisease => {
                    attributes.diseases.push(qualified(row.term, row.qualifier));
                }
                Association::SubjectPhenotype => {
                    attributes.phenotypes.push(qualified(row.term, row.qualifier));
                }
                _ => attributes.substances.push(row.term),
            }
        }
    }
    for row in &batch.subject_role_taxonomy {
        if let Some(attributes) = level.get_mut(row.subject.index()) {
            attributes.subject_roles.push(row.role);
            attributes.ncbi_taxons.push(row.taxon);
        }
    }
    level
}

fn collection_level(batch: &Batch) -> Vec<Attributes> {
    let mut level = vec![Attributes::default(); batch.collections.len()];
    for &(collection, project) in batch.links(LinkTable::CollectionDefinedByProject) {
        if let Some(attributes) = level.get_mut(collection.index()) {
            attributes.projects.push(project);
        }
    }
    for association in Association::ALL {
        if association.owner() != EntityKind::Collection {
            continue;
        }
        for row in batch.associations(association) {
            let Some(attributes) = level.get_mut(row.entity.index()) else {
                continue;
            };
            let term = row.term;
            match association {
                Association::CollectionAnatomy => attributes.anatomies.push(term),
                Association::CollectionCompound => attributes.compounds.push(term),
                Association::CollectionDisease => {
                    attributes.diseases.push(qualified(term, row.qualifier));
                }
                Association::CollectionGene => attributes.genes.push(term),
                Association::CollectionPhenotype => {
                    attributes.phenotypes.push(qualified(term, row.qualifier));
                }
                Association::CollectionProtein => attributes.proteins.push(term),
                Association::CollectionSubstance => attributes.substances.push(term),
                _ => attributes.ncbi_taxons.push(term),
            }
        }
    }
    level
}

fn qualified(term: Nid, association_type: Option<Nid>) -> Qualified {
    Qualified {
        term,
        association_type,
    }
}
