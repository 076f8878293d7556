use std::collections::HashMap;

use crate::domain::Nid;
use crate::error::FactError;
use crate::fact::{Fact, Render};

/// Get-or-create table keyed by full structural equality of the fact.
///
/// Interning is the single write-serialisation point of a run: callers feed
/// candidates in entity order, so fact nids are deterministic for a given batch.
#[derive(Debug, Clone)]
pub struct FactStore<F> {
    facts: Vec<F>,
    digests: Vec<String>,
    index: HashMap<F, Nid>,
    by_digest: HashMap<String, Nid>,
}

impl<F> Default for FactStore<F> {
    fn default() -> Self {
        Self {
            facts: Vec::new(),
            digests: Vec::new(),
            index: HashMap::new(),
            by_digest: HashMap::new(),
        }
    }
}

impl<F: Fact> FactStore<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, fact: F, render: &dyn Render) -> Result<Nid, FactError> {
        if let Some(nid) = self.index.get(&fact) {
            return Ok(*nid);
        }
        let digest = fact.digest(render)?;
        if let Some(existing) = self.by_digest.get(&digest) {
            // Equal digests with unequal content would break the unique content-hash index.
            return Err(FactError::Serialization(format!(
                "{} digest collision with fact {existing}",
                F::TABLE
            )));
        }
        let nid = Nid::from_index(self.facts.len())?;
        self.index.insert(fact.clone(), nid);
        self.by_digest.insert(digest.clone(), nid);
        self.facts.push(fact);
        self.digests.push(digest);
        Ok(nid)
    }

    pub fn lookup(&self, fact: &F) -> Option<Nid> {
        self.index.get(fact).copied()
    }

    pub fn by_digest(&self, digest: &str) -> Option<Nid> {
        self.by_digest.get(digest).copied()
    }

    pub fn get(&self, nid: Nid) -> Option<&F> {
        self.facts.get(nid.index())
    }

    pub fn digest(&self, nid: Nid) -> Option<&str> {
        self.digests.get(nid.index()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Nid, &F)> + '_ {
        self.facts
            .iter()
            .zip(0u32..)
            .map(|(fact, index)| (Nid::new(index), fact))
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}
