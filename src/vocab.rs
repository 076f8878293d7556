use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::domain::{Nid, TermId, VocabularyKind};
use crate::error::FactError;
use crate::ids::KeyIndex;
use crate::submission::{ProteinGeneRow, SlimRow, TermRow};

#[derive(Debug, Clone, Serialize)]
pub struct Term {
    pub id: TermId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub synonyms: Vec<String>,
}

impl Term {
    fn bare(id: TermId) -> Self {
        Self {
            id,
            name: None,
            description: None,
            synonyms: Vec::new(),
        }
    }

    fn from_row(id: TermId, row: &TermRow) -> Self {
        Self {
            id,
            name: row.name.clone(),
            description: row.description.clone(),
            synonyms: parse_synonyms(row.synonyms.as_deref()),
        }
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TermTable {
    kind: VocabularyKind,
    closed: bool,
    index: KeyIndex<TermId>,
    terms: Vec<Term>,
}

impl TermTable {
    pub fn new(kind: VocabularyKind, supplied: bool) -> Self {
        Self {
            kind,
            closed: supplied || !kind.is_open(),
            index: KeyIndex::new(),
            terms: Vec::new(),
        }
    }

    pub fn kind(&self) -> VocabularyKind {
        self.kind
    }

    fn parse_id(&self, raw: &str) -> Result<TermId, FactError> {
        if self.kind.is_open() {
            TermId::open(raw)
        } else {
            raw.parse()
        }
    }

    fn add(&mut self, row: &TermRow) -> Result<Nid, FactError> {
        let id = self.parse_id(&row.id)?;
        let (nid, fresh) = self.index.assign(id.clone())?;
        if fresh {
            self.terms.push(Term::from_row(id, row));
        }
        Ok(nid)
    }

    /// Resolves a term reference. Closed vocabularies reject unknown ids,
    /// open ones register them on first use.
    pub fn resolve(&mut self, raw: &str) -> Result<Nid, FactError> {
        let id = self.parse_id(raw)?;
        if let Some(nid) = self.index.lookup(&id) {
            return Ok(nid);
        }
        if self.closed {
            return Err(FactError::UnknownTerm {
                vocabulary: self.kind.table_name().to_string(),
                id: id.to_string(),
            });
        }
        let (nid, _) = self.index.assign(id.clone())?;
        self.terms.push(Term::bare(id));
        Ok(nid)
    }

    pub fn lookup(&self, raw: &str) -> Option<Nid> {
        let id = self.parse_id(raw).ok()?;
        self.index.lookup(&id)
    }

    pub fn term(&self, nid: Nid) -> Option<&Term> {
        self.terms.get(nid.index())
    }

    pub fn id(&self, nid: Nid) -> Option<&TermId> {
        self.index.key(nid)
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlimMap {
    targets: HashMap<Nid, Vec<Nid>>,
}

impl SlimMap {
    pub fn map(&self, term: Nid) -> Vec<Nid> {
        match self.targets.get(&term) {
            Some(targets) => targets.clone(),
            None => vec![term],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Vocabularies {
    tables: BTreeMap<VocabularyKind, TermTable>,
    slims: BTreeMap<VocabularyKind, SlimMap>,
    substance_compound: HashMap<Nid, Nid>,
    gene_proteins: HashMap<Nid, Vec<Nid>>,
}

impl Vocabularies {
    pub fn build(
        terms: &BTreeMap<VocabularyKind, Vec<TermRow>>,
        slims: &BTreeMap<VocabularyKind, Vec<SlimRow>>,
        protein_gene: &[ProteinGeneRow],
    ) -> Result<Self, FactError> {
        let mut vocab = Vocabularies::default();
        for kind in VocabularyKind::ALL {
            let rows = terms.get(&kind);
            let mut table = TermTable::new(kind, rows.is_some());
            for row in rows.into_iter().flatten() {
                table.add(row)?;
            }
            vocab.tables.insert(kind, table);
        }

        if let Some(rows) = terms.get(&VocabularyKind::Substance) {
            for row in rows {
                let Some(compound) = row.compound.as_deref() else {
                    continue;
                };
                let substance = vocab.resolve(VocabularyKind::Substance, &row.id)?;
                let compound = vocab.resolve(VocabularyKind::Compound, compound)?;
                vocab.substance_compound.entry(substance).or_insert(compound);
            }
        }

        for (kind, rows) in slims {
            let mut map = SlimMap::default();
            for row in rows {
                let original = vocab.resolve(*kind, &row.original_term_id)?;
                let slim = vocab.resolve(*kind, &row.slim_term_id)?;
                let targets = map.targets.entry(original).or_default();
                if !targets.contains(&slim) {
                    targets.push(slim);
                    targets.sort_unstable();
                }
            }
            vocab.slims.insert(*kind, map);
        }

        for row in protein_gene {
            let protein = vocab.resolve(VocabularyKind::Protein, &row.protein)?;
            let gene = vocab.resolve(VocabularyKind::Gene, &row.gene)?;
            let proteins = vocab.gene_proteins.entry(gene).or_default();
            if !proteins.contains(&protein) {
                proteins.push(protein);
            }
        }

        Ok(vocab)
    }

    pub fn table(&self, kind: VocabularyKind) -> Option<&TermTable> {
        self.tables.get(&kind)
    }

    pub fn resolve(&mut self, kind: VocabularyKind, raw: &str) -> Result<Nid, FactError> {
        self.tables
            .entry(kind)
            .or_insert_with(|| TermTable::new(kind, false))
            .resolve(raw)
    }

    pub fn resolve_opt(
        &mut self,
        kind: VocabularyKind,
        raw: Option<&str>,
    ) -> Result<Option<Nid>, FactError> {
        raw.map(|raw| self.resolve(kind, raw)).transpose()
    }

    pub fn lookup(&self, kind: VocabularyKind, raw: &str) -> Option<Nid> {
        self.tables.get(&kind).and_then(|table| table.lookup(raw))
    }

    pub fn term(&self, kind: VocabularyKind, nid: Nid) -> Option<&Term> {
        self.tables.get(&kind).and_then(|table| table.term(nid))
    }

    pub fn term_id(&self, kind: VocabularyKind, nid: Nid) -> String {
        self.term(kind, nid)
            .map(|term| term.id.to_string())
            .unwrap_or_else(|| format!("#{nid}"))
    }

    pub fn slim(&self, kind: VocabularyKind, term: Nid) -> Vec<Nid> {
        match self.slims.get(&kind) {
            Some(map) => map.map(term),
            None => vec![term],
        }
    }

    pub fn compound_of(&self, substance: Nid) -> Option<Nid> {
        self.substance_compound.get(&substance).copied()
    }

    pub fn proteins_of_gene(&self, gene: Nid) -> &[Nid] {
        self.gene_proteins
            .get(&gene)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Synonyms arrive either as a JSON array or as a `|`-separated list.
pub fn parse_synonyms(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Vec::new();
    };
    if raw.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<String>>(raw) {
            return values;
        }
    }
    raw.split('|')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn row(id: &str, name: &str) -> TermRow {
        TermRow {
            id: id.to_string(),
            name: Some(name.to_string()),
            description: None,
            synonyms: None,
            compound: None,
        }
    }

    #[test]
    fn closed_vocabulary_rejects_unknown_terms() {
        let mut terms = BTreeMap::new();
        terms.insert(VocabularyKind::Anatomy, vec![row("UBERON:0002107", "liver")]);
        let mut vocab = Vocabularies::build(&terms, &BTreeMap::new(), &[]).unwrap();
        assert!(vocab.resolve(VocabularyKind::Anatomy, "UBERON:0002107").is_ok());
        assert_matches!(
            vocab.resolve(VocabularyKind::Anatomy, "UBERON:0000948"),
            Err(FactError::UnknownTerm { vocabulary, .. }) if vocabulary == "anatomy"
        );
    }

    #[test]
    fn open_vocabulary_registers_on_first_use() {
        let mut vocab = Vocabularies::build(&BTreeMap::new(), &BTreeMap::new(), &[]).unwrap();
        let first = vocab.resolve(VocabularyKind::MimeType, "text/plain").unwrap();
        let again = vocab.resolve(VocabularyKind::MimeType, "text/plain").unwrap();
        assert_eq!(first, again);
        assert_eq!(vocab.term_id(VocabularyKind::MimeType, first), "text/plain");
    }

    #[test]
    fn repeated_term_rows_keep_first_definition() {
        let mut terms = BTreeMap::new();
        terms.insert(
            VocabularyKind::Anatomy,
            vec![row("UBERON:0002107", "liver"), row("UBERON:0002107", "other")],
        );
        let vocab = Vocabularies::build(&terms, &BTreeMap::new(), &[]).unwrap();
        let table = vocab.table(VocabularyKind::Anatomy).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.terms()[0].label(), "liver");
    }

    #[test]
    fn slim_defaults_to_identity() {
        let mut terms = BTreeMap::new();
        terms.insert(
            VocabularyKind::Anatomy,
            vec![
                row("UBERON:0001114", "right lobe of liver"),
                row("UBERON:0002107", "liver"),
                row("UBERON:0000948", "heart"),
            ],
        );
        let mut slims = BTreeMap::new();
        slims.insert(
            VocabularyKind::Anatomy,
            vec![SlimRow {
                original_term_id: "UBERON:0001114".to_string(),
                slim_term_id: "UBERON:0002107".to_string(),
            }],
        );
        let vocab = Vocabularies::build(&terms, &slims, &[]).unwrap();
        let lobe = vocab.lookup(VocabularyKind::Anatomy, "UBERON:0001114").unwrap();
        let liver = vocab.lookup(VocabularyKind::Anatomy, "UBERON:0002107").unwrap();
        let heart = vocab.lookup(VocabularyKind::Anatomy, "UBERON:0000948").unwrap();
        assert_eq!(vocab.slim(VocabularyKind::Anatomy, lobe), vec![liver]);
        assert_eq!(vocab.slim(VocabularyKind::Anatomy, heart), vec![heart]);
    }

    #[test]
    fn synonyms_accept_json_and_pipes() {
        assert_eq!(
            parse_synonyms(Some(r#"["hepar","jecur"]"#)),
            vec!["hepar".to_string(), "jecur".to_string()]
        );
        assert_eq!(
            parse_synonyms(Some("hepar| jecur")),
            vec!["hepar".to_string(), "jecur".to_string()]
        );
        assert!(parse_synonyms(Some("  ")).is_empty());
    }
}
