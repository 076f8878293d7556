use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::{debug, info};

use crate::closure::TransitiveClosure;
use crate::domain::{EntityKey, EntityKind, Nid};
use crate::error::FactError;
use crate::fact::{CoreFact, Fact, SetField};
use crate::intern::FactStore;
use crate::pipeline::DerivedLayer;
use crate::stats::{StatsQuery, StatsResult};

pub const MANIFEST: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub generator: String,
    pub created_at: String,
    pub sources: Vec<String>,
    pub tables: BTreeMap<String, usize>,
}

/// Output directory of the derived layer. A run is staged in a sibling temporary
/// directory and renamed into place once every table is written.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn table_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    pub fn write(
        &self,
        layer: &DerivedLayer,
        sources: Vec<String>,
        stats: &[StatsResult],
    ) -> Result<Manifest, FactError> {
        let parent = match self.root.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };
        fs::create_dir_all(parent.as_std_path()).map_err(fs_error)?;
        let staging = Builder::new()
            .prefix(".c2m2-facts-")
            .tempdir_in(parent.as_std_path())
            .map_err(fs_error)?;
        let staging_path = Utf8PathBuf::from_path_buf(staging.path().to_path_buf())
            .map_err(|_| FactError::Filesystem("invalid staging directory".to_string()))?;

        let mut tables = BTreeMap::new();
        write_core_facts(&staging_path, layer, &mut tables)?;
        write_satellite(&staging_path, &layer.gene_facts, layer, &mut tables)?;
        write_satellite(&staging_path, &layer.protein_facts, layer, &mut tables)?;
        write_satellite(&staging_path, &layer.pubchem_facts, layer, &mut tables)?;
        for kind in EntityKind::ALL {
            write_assignments(&staging_path, layer, kind, &mut tables)?;
        }
        write_closure(
            &staging_path,
            "project_in_project_transitive.tsv",
            &layer.closures.projects,
            |nid| layer.batch.project_key(nid),
            &mut tables,
        )?;
        write_closure(
            &staging_path,
            "collection_in_collection_transitive.tsv",
            &layer.closures.collections,
            |nid| layer.batch.entity_key(EntityKind::Collection, nid),
            &mut tables,
        )?;
        let mut roots = TsvWriter::create(&staging_path, "project_root.tsv")?;
        roots.header(&["project_id_namespace", "project_local_id"])?;
        for root in &layer.closures.project_roots {
            if let Some(key) = layer.batch.project_key(*root) {
                roots.row(&[key.id_namespace.as_str(), key.local_id.as_str()])?;
            }
        }
        roots.finish(&mut tables)?;
        for result in stats {
            write_stats(&staging_path, result, &mut tables)?;
        }

        let manifest = Manifest {
            generator: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            created_at: chrono::Utc::now().to_rfc3339(),
            sources,
            tables,
        };
        let content = serde_json::to_vec_pretty(&manifest)
            .map_err(|err| FactError::Serialization(err.to_string()))?;
        fs::write(staging_path.join(MANIFEST).as_std_path(), content).map_err(fs_error)?;

        let staged = staging.keep();
        atomic_rename_dir(&staged, self.root.as_std_path()).map_err(fs_error)?;
        info!(output = %self.root, tables = manifest.tables.len(), "wrote derived layer");
        Ok(manifest)
    }

    pub fn read_manifest(&self) -> Result<Manifest, FactError> {
        let path = self.table_path(MANIFEST);
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| FactError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content).map_err(|err| FactError::Serialization(err.to_string()))
    }
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

fn fs_error(err: io::Error) -> FactError {
    FactError::Filesystem(err.to_string())
}

struct TsvWriter {
    name: String,
    out: BufWriter<fs::File>,
    rows: usize,
}

impl TsvWriter {
    fn create(dir: &Utf8Path, name: &str) -> Result<Self, FactError> {
        let file = fs::File::create(dir.join(name).as_std_path()).map_err(fs_error)?;
        Ok(Self {
            name: name.to_string(),
            out: BufWriter::new(file),
            rows: 0,
        })
    }

    fn header(&mut self, columns: &[&str]) -> Result<(), FactError> {
        self.line(columns.iter().copied())
    }

    fn row<S: AsRef<str>>(&mut self, cells: &[S]) -> Result<(), FactError> {
        self.rows += 1;
        self.line(cells.iter().map(AsRef::as_ref))
    }

    fn line<'a>(&mut self, cells: impl Iterator<Item = &'a str>) -> Result<(), FactError> {
        let line = cells.map(escape).collect::<Vec<_>>().join("\t");
        writeln!(self.out, "{line}").map_err(fs_error)
    }

    fn finish(mut self, tables: &mut BTreeMap<String, usize>) -> Result<(), FactError> {
        self.out.flush().map_err(fs_error)?;
        debug!(table = %self.name, rows = self.rows, "wrote table");
        tables.insert(self.name, self.rows);
        Ok(())
    }
}

fn escape(cell: &str) -> String {
    cell.replace(['\t', '\n', '\r'], " ")
}

fn render_set(layer: &DerivedLayer, field: &SetField) -> Result<String, FactError> {
    serde_json::to_string(&field.to_json(&layer.batch))
        .map_err(|err| FactError::Serialization(err.to_string()))
}

fn write_core_facts(
    dir: &Utf8Path,
    layer: &DerivedLayer,
    tables: &mut BTreeMap<String, usize>,
) -> Result<(), FactError> {
    let sample = CoreFact::default();
    let mut header = vec!["nid", "digest", "is_bundle", "has_persistent_id"];
    header.extend(sample.scalar_fields().iter().map(|(name, _, _)| *name));
    let set_names: Vec<&'static str> = sample.set_fields().iter().map(|f| f.name).collect();
    header.extend(set_names.iter().copied());

    let mut main = TsvWriter::create(dir, "core_fact.tsv")?;
    main.header(&header)?;
    let mut flattened = Vec::with_capacity(set_names.len());
    for field in sample.set_fields() {
        let mut writer = TsvWriter::create(dir, &format!("core_fact_{}.tsv", field.name))?;
        match field.qualifier {
            Some(_) => writer.header(&["core_fact", "value", "association_type"])?,
            None => writer.header(&["core_fact", "value"])?,
        }
        flattened.push(writer);
    }

    for (nid, fact) in layer.core_facts.iter() {
        let mut cells = vec![
            nid.to_string(),
            layer.core_facts.digest(nid).unwrap_or_default().to_string(),
            fact.is_bundle.to_string(),
            fact.has_persistent_id.to_string(),
        ];
        for (_, domain, value) in fact.scalar_fields() {
            cells.push(value.map(|v| layer.render(domain, v)).unwrap_or_default());
        }
        for (field, writer) in fact.set_fields().iter().zip(flattened.iter_mut()) {
            cells.push(render_set(layer, field)?);
            for (value, qualifier) in field.rendered(&layer.batch) {
                match field.qualifier {
                    Some(_) => {
                        writer.row(&[nid.to_string(), value, qualifier.unwrap_or_default()])?
                    }
                    None => writer.row(&[nid.to_string(), value])?,
                }
            }
        }
        main.row(&cells)?;
    }

    main.finish(tables)?;
    for writer in flattened {
        writer.finish(tables)?;
    }
    Ok(())
}

fn write_satellite<F: Fact>(
    dir: &Utf8Path,
    store: &FactStore<F>,
    layer: &DerivedLayer,
    tables: &mut BTreeMap<String, usize>,
) -> Result<(), FactError> {
    let mut writer = TsvWriter::create(dir, &format!("{}.tsv", F::TABLE))?;
    let mut header = vec!["nid", "digest"];
    header.extend(F::default().columns().iter().map(|f| f.name));
    writer.header(&header)?;
    for (nid, fact) in store.iter() {
        let mut cells = vec![
            nid.to_string(),
            store.digest(nid).unwrap_or_default().to_string(),
        ];
        for field in &fact.columns() {
            cells.push(render_set(layer, field)?);
        }
        writer.row(&cells)?;
    }
    writer.finish(tables)
}

fn write_assignments(
    dir: &Utf8Path,
    layer: &DerivedLayer,
    kind: EntityKind,
    tables: &mut BTreeMap<String, usize>,
) -> Result<(), FactError> {
    let mut writer = TsvWriter::create(dir, &format!("{kind}_fact.tsv"))?;
    writer.header(&[
        "id_namespace",
        "local_id",
        "core_fact",
        "gene_fact",
        "protein_fact",
        "pubchem_fact",
    ])?;
    for (refs, nid) in layer.assignments.of(kind).iter().zip((0u32..).map(Nid::new)) {
        let Some(key) = layer.batch.entity_key(kind, nid) else {
            continue;
        };
        writer.row(&[
            key.id_namespace.clone(),
            key.local_id.clone(),
            refs.core.to_string(),
            refs.gene.to_string(),
            refs.protein.to_string(),
            refs.pubchem.to_string(),
        ])?;
    }
    writer.finish(tables)
}

fn write_closure<'a>(
    dir: &Utf8Path,
    name: &str,
    closure: &TransitiveClosure,
    key: impl Fn(Nid) -> Option<&'a EntityKey>,
    tables: &mut BTreeMap<String, usize>,
) -> Result<(), FactError> {
    let mut writer = TsvWriter::create(dir, name)?;
    writer.header(&[
        "leader_id_namespace",
        "leader_local_id",
        "member_id_namespace",
        "member_local_id",
    ])?;
    for (leader, member) in closure.pairs() {
        if let (Some(leader), Some(member)) = (key(leader), key(member)) {
            writer.row(&[
                leader.id_namespace.as_str(),
                leader.local_id.as_str(),
                member.id_namespace.as_str(),
                member.local_id.as_str(),
            ])?;
        }
    }
    writer.finish(tables)
}

fn write_stats(
    dir: &Utf8Path,
    result: &StatsResult,
    tables: &mut BTreeMap<String, usize>,
) -> Result<(), FactError> {
    let query = StatsQuery::new(result.dimensions.clone(), result.use_slim);
    let mut writer = TsvWriter::create(dir, &format!("{}.tsv", query.name()))?;
    let mut header = vec!["dcc"];
    header.extend(result.dimensions.iter().map(|d| d.as_str()));
    header.extend([
        "num_files",
        "num_biosamples",
        "num_subjects",
        "total_size_in_bytes",
    ]);
    writer.header(&header)?;
    for row in &result.rows {
        let mut cells = vec![row.dcc.clone().unwrap_or_default()];
        cells.extend(row.values.iter().map(|v| v.clone().unwrap_or_default()));
        cells.extend([
            row.num_files.to_string(),
            row.num_biosamples.to_string(),
            row.num_subjects.to_string(),
            row.total_size_in_bytes.to_string(),
        ]);
        writer.row(&cells)?;
    }
    writer.finish(tables)
}
