use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::{EntityKey, EntityKind, Nid, VocabularyKind};
use crate::error::FactError;
use crate::fact::{Fact, FieldDomain, SetField};
use crate::pipeline::DerivedLayer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordBlob {
    pub kind: EntityKind,
    pub id: String,
    pub keywords: Vec<String>,
}

impl KeywordBlob {
    pub fn text(&self) -> String {
        self.keywords.join(" ")
    }
}

/// Builds the keyword blob of an entity from its core and satellite facts.
///
/// Every referenced term contributes its id, name and synonyms, plus the names of
/// its slim terms. Projects and DCCs contribute their names and abbreviations.
pub fn keywords(
    layer: &DerivedLayer,
    kind: EntityKind,
    key: &EntityKey,
) -> Result<KeywordBlob, FactError> {
    let (_, refs) = layer.entity(kind, key)?;
    let mut fields: Vec<SetField> = layer.core_fact(refs.core)?.columns();
    if let Some(fact) = layer.gene_facts.get(refs.gene) {
        fields.extend(fact.columns());
    }
    if let Some(fact) = layer.protein_facts.get(refs.protein) {
        fields.extend(fact.columns());
    }
    if let Some(fact) = layer.pubchem_facts.get(refs.pubchem) {
        fields.extend(fact.columns());
    }

    let mut words = BTreeSet::new();
    for field in &fields {
        for term in field.terms() {
            match field.domain {
                FieldDomain::Term(vocabulary) => add_term(layer, vocabulary, term, &mut words),
                FieldDomain::Project => add_project(layer, term, &mut words),
                FieldDomain::Namespace => {}
            }
        }
    }

    Ok(KeywordBlob {
        kind,
        id: key.to_string(),
        keywords: words.into_iter().collect(),
    })
}

fn add_term(layer: &DerivedLayer, vocabulary: VocabularyKind, term: Nid, words: &mut BTreeSet<String>) {
    let vocab = &layer.batch.vocab;
    let Some(entry) = vocab.term(vocabulary, term) else {
        return;
    };
    words.insert(entry.id.to_string());
    insert(words, entry.name.as_deref());
    for synonym in &entry.synonyms {
        insert(words, Some(synonym));
    }
    for slim in vocab.slim(vocabulary, term) {
        if slim != term {
            insert(words, vocab.term(vocabulary, slim).and_then(|t| t.name.as_deref()));
        }
    }
}

fn add_project(layer: &DerivedLayer, project: Nid, words: &mut BTreeSet<String>) {
    if let Some(record) = layer.batch.projects.get(project.index()) {
        insert(words, record.name.as_deref());
        insert(words, record.abbreviation.as_deref());
    }
    for dcc in layer.batch.dccs.iter().filter(|dcc| dcc.project == project) {
        insert(words, dcc.name.as_deref());
        insert(words, dcc.abbreviation.as_deref());
    }
}

fn insert(words: &mut BTreeSet<String>, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
        words.insert(value.to_string());
    }
}
