use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::batch::Batch;
use crate::closure::{TransitiveClosure, roots};
use crate::domain::{CyclePolicy, EntityKey, EntityKind, Nid};
use crate::error::FactError;
use crate::extract::{Candidate, Extractor};
use crate::fact::{CoreFact, FieldDomain, GeneFact, ProteinFact, PubchemFact, Render};
use crate::intern::FactStore;
use crate::submission::{LinkTable, Submission};
use crate::table::Datapackage;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub cycle_policy: CyclePolicy,
    pub parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FactRefs {
    pub core: Nid,
    pub gene: Nid,
    pub protein: Nid,
    pub pubchem: Nid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignments {
    pub files: Vec<FactRefs>,
    pub biosamples: Vec<FactRefs>,
    pub subjects: Vec<FactRefs>,
    pub collections: Vec<FactRefs>,
}

impl Assignments {
    pub fn of(&self, kind: EntityKind) -> &[FactRefs] {
        match kind {
            EntityKind::File => &self.files,
            EntityKind::Biosample => &self.biosamples,
            EntityKind::Subject => &self.subjects,
            EntityKind::Collection => &self.collections,
        }
    }

    fn of_mut(&mut self, kind: EntityKind) -> &mut Vec<FactRefs> {
        match kind {
            EntityKind::File => &mut self.files,
            EntityKind::Biosample => &mut self.biosamples,
            EntityKind::Subject => &mut self.subjects,
            EntityKind::Collection => &mut self.collections,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Closures {
    pub projects: TransitiveClosure,
    pub collections: TransitiveClosure,
    pub project_roots: Vec<Nid>,
}

/// The fully derived analytical layer of one run. Disposable: a rerun over the
/// same batch rebuilds it identically.
#[derive(Debug, Clone, Default)]
pub struct DerivedLayer {
    pub batch: Batch,
    pub closures: Closures,
    pub core_facts: FactStore<CoreFact>,
    pub gene_facts: FactStore<GeneFact>,
    pub protein_facts: FactStore<ProteinFact>,
    pub pubchem_facts: FactStore<PubchemFact>,
    pub assignments: Assignments,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityCounts {
    pub files: usize,
    pub biosamples: usize,
    pub subjects: usize,
    pub collections: usize,
    pub projects: usize,
    pub dccs: usize,
}

impl EntityCounts {
    fn of(batch: &Batch) -> Self {
        Self {
            files: batch.files.len(),
            biosamples: batch.biosamples.len(),
            subjects: batch.subjects.len(),
            collections: batch.collections.len(),
            projects: batch.projects.len(),
            dccs: batch.dccs.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub sources: Vec<String>,
    pub entities: EntityCounts,
    pub project_in_project_transitive: usize,
    pub collection_in_collection_transitive: usize,
    pub project_roots: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub sources: Vec<String>,
    pub entities: EntityCounts,
    pub core_facts: usize,
    pub gene_facts: usize,
    pub protein_facts: usize,
    pub pubchem_facts: usize,
    pub project_in_project_transitive: usize,
    pub collection_in_collection_transitive: usize,
    pub project_roots: usize,
    pub output: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    pub fn load(
        &self,
        sources: &[Utf8PathBuf],
        sink: &dyn ProgressSink,
    ) -> Result<Submission, FactError> {
        if sources.is_empty() {
            return Err(FactError::NoSources);
        }
        let mut merged: Option<Submission> = None;
        for source in sources {
            let start = Instant::now();
            let package = Datapackage::open(source)?;
            let submission = Submission::load(&package)?;
            sink.event(ProgressEvent {
                message: format!("phase=Load; {source}"),
                elapsed: Some(start.elapsed()),
            });
            info!(
                source = %source,
                tables = package.table_names().count(),
                "loaded datapackage"
            );
            match merged.as_mut() {
                Some(all) => all.merge(submission),
                None => merged = Some(submission),
            }
        }
        merged.ok_or(FactError::NoSources)
    }

    fn resolve(
        &self,
        submission: &Submission,
        sink: &dyn ProgressSink,
    ) -> Result<(Batch, Closures), FactError> {
        let start = Instant::now();
        let batch = Batch::resolve(submission)?;
        sink.event(ProgressEvent {
            message: "phase=Resolve; identifiers resolved".to_string(),
            elapsed: Some(start.elapsed()),
        });

        let start = Instant::now();
        let closures = self.closures(&batch)?;
        sink.event(ProgressEvent {
            message: "phase=Closure; containment closures computed".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok((batch, closures))
    }

    pub fn closures(&self, batch: &Batch) -> Result<Closures, FactError> {
        let project_edges = batch.links(LinkTable::ProjectInProject);
        let projects = TransitiveClosure::compute(
            LinkTable::ProjectInProject.table_name(),
            batch.projects.len(),
            project_edges,
            self.options.cycle_policy,
            |nid| describe(batch.project_key(nid), nid),
        )?;
        let collections = TransitiveClosure::compute(
            LinkTable::CollectionInCollection.table_name(),
            batch.collections.len(),
            batch.links(LinkTable::CollectionInCollection),
            self.options.cycle_policy,
            |nid| describe(batch.entity_key(EntityKind::Collection, nid), nid),
        )?;
        let project_roots = roots(batch.projects.len(), project_edges);
        info!(
            project_pairs = projects.len(),
            collection_pairs = collections.len(),
            roots = project_roots.len(),
            "computed containment closures"
        );
        Ok(Closures {
            projects,
            collections,
            project_roots,
        })
    }

    pub fn check(
        &self,
        submission: &Submission,
        sink: &dyn ProgressSink,
    ) -> Result<CheckResult, FactError> {
        let (batch, closures) = self.resolve(submission, sink)?;
        Ok(CheckResult {
            sources: source_names(submission),
            entities: EntityCounts::of(&batch),
            project_in_project_transitive: closures.projects.len(),
            collection_in_collection_transitive: closures.collections.len(),
            project_roots: closures.project_roots.len(),
        })
    }

    /// Derives the full fact layer. Any referential violation aborts the run.
    pub fn derive(
        &self,
        submission: &Submission,
        sink: &dyn ProgressSink,
    ) -> Result<DerivedLayer, FactError> {
        let (batch, closures) = self.resolve(submission, sink)?;

        let start = Instant::now();
        let candidates = {
            let extractor = Extractor::new(
                &batch,
                &closures.projects,
                &closures.collections,
                &closures.project_roots,
            );
            extractor.extract_all(self.options.parallel)?
        };
        sink.event(ProgressEvent {
            message: "phase=Extract; fact candidates computed".to_string(),
            elapsed: Some(start.elapsed()),
        });

        let start = Instant::now();
        let mut layer = DerivedLayer {
            batch,
            closures,
            ..DerivedLayer::default()
        };
        let ordered = [
            (EntityKind::File, candidates.files),
            (EntityKind::Biosample, candidates.biosamples),
            (EntityKind::Subject, candidates.subjects),
            (EntityKind::Collection, candidates.collections),
        ];
        for (kind, list) in ordered {
            for candidate in list {
                let refs = layer.intern(candidate)?;
                layer.assignments.of_mut(kind).push(refs);
            }
        }
        sink.event(ProgressEvent {
            message: "phase=Intern; facts deduplicated".to_string(),
            elapsed: Some(start.elapsed()),
        });
        info!(
            core_facts = layer.core_facts.len(),
            gene_facts = layer.gene_facts.len(),
            protein_facts = layer.protein_facts.len(),
            pubchem_facts = layer.pubchem_facts.len(),
            "interned facts"
        );
        Ok(layer)
    }
}

impl DerivedLayer {
    fn intern(&mut self, candidate: Candidate) -> Result<FactRefs, FactError> {
        let batch = &self.batch;
        Ok(FactRefs {
            core: self.core_facts.intern(candidate.core, batch)?,
            gene: self.gene_facts.intern(candidate.gene, batch)?,
            protein: self.protein_facts.intern(candidate.protein, batch)?,
            pubchem: self.pubchem_facts.intern(candidate.pubchem, batch)?,
        })
    }

    pub fn refs(&self, kind: EntityKind, nid: Nid) -> Option<FactRefs> {
        self.assignments.of(kind).get(nid.index()).copied()
    }

    pub fn entity(&self, kind: EntityKind, key: &EntityKey) -> Result<(Nid, FactRefs), FactError> {
        let nid = self
            .batch
            .ids
            .entities(kind)
            .lookup(key)
            .ok_or_else(|| FactError::NotFound(format!("{kind} {key}")))?;
        let refs = self
            .refs(kind, nid)
            .ok_or_else(|| FactError::NotFound(format!("fact of {kind} {key}")))?;
        Ok((nid, refs))
    }

    /// Resolves a rendered `NAMESPACE::LOCAL_ID`, trying every reading of an ambiguous key.
    pub fn find_entity(&self, kind: EntityKind, raw: &str) -> Result<EntityKey, FactError> {
        let readings = EntityKey::readings(raw);
        if readings.is_empty() {
            return Err(FactError::InvalidEntityKey(raw.to_string()));
        }
        let index = self.batch.ids.entities(kind);
        readings
            .into_iter()
            .find(|key| index.lookup(key).is_some())
            .ok_or_else(|| FactError::NotFound(format!("{kind} {}", raw.trim())))
    }

    pub fn core_fact(&self, nid: Nid) -> Result<&CoreFact, FactError> {
        self.core_facts
            .get(nid)
            .ok_or_else(|| FactError::NotFound(format!("core fact {nid}")))
    }

    pub fn render(&self, domain: FieldDomain, nid: Nid) -> String {
        self.batch.render(domain, nid)
    }

    pub fn dcc_label(&self, project: Nid) -> String {
        self.batch
            .dccs
            .iter()
            .find(|dcc| dcc.project == project)
            .and_then(|dcc| dcc.abbreviation.clone().or_else(|| dcc.name.clone()))
            .unwrap_or_else(|| self.render(FieldDomain::Project, project))
    }

    pub fn describe_fact(&self, nid: Nid) -> Result<serde_json::Value, FactError> {
        let fact = self.core_fact(nid)?;
        let mut object = serde_json::Map::new();
        object.insert("nid".to_string(), serde_json::json!(nid));
        object.insert(
            "digest".to_string(),
            serde_json::json!(self.core_facts.digest(nid)),
        );
        object.insert("is_bundle".to_string(), serde_json::json!(fact.is_bundle));
        object.insert(
            "has_persistent_id".to_string(),
            serde_json::json!(fact.has_persistent_id),
        );
        for (name, domain, value) in fact.scalar_fields() {
            let rendered = value.map(|nid| self.render(domain, nid));
            object.insert(name.to_string(), serde_json::json!(rendered));
        }
        for field in fact.set_fields() {
            let values: Vec<serde_json::Value> = field
                .rendered(&self.batch)
                .into_iter()
                .map(|(term, qualifier)| match field.qualifier {
                    Some(_) => serde_json::json!({
                        "term": term,
                        "association_type": qualifier,
                    }),
                    None => serde_json::json!(term),
                })
                .collect();
            object.insert(field.name.to_string(), serde_json::Value::Array(values));
        }
        Ok(serde_json::Value::Object(object))
    }

    pub fn summary(&self, sources: Vec<String>, output: Option<String>) -> RunResult {
        RunResult {
            sources,
            entities: EntityCounts::of(&self.batch),
            core_facts: self.core_facts.len(),
            gene_facts: self.gene_facts.len(),
            protein_facts: self.protein_facts.len(),
            pubchem_facts: self.pubchem_facts.len(),
            project_in_project_transitive: self.closures.projects.len(),
            collection_in_collection_transitive: self.closures.collections.len(),
            project_roots: self.closures.project_roots.len(),
            output,
        }
    }
}

pub fn source_names(submission: &Submission) -> Vec<String> {
    submission.sources.iter().map(|path| path.to_string()).collect()
}

fn describe(key: Option<&EntityKey>, nid: Nid) -> String {
    key.map(ToString::to_string)
        .unwrap_or_else(|| format!("#{nid}"))
}
