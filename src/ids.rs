use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use crate::domain::{EntityKey, EntityKind, Nid};
use crate::error::FactError;

/// Bijection between external keys and dense surrogates, assigned in first-seen order.
#[derive(Debug, Clone)]
pub struct KeyIndex<K> {
    keys: Vec<K>,
    index: HashMap<K, Nid>,
}

impl<K> Default for KeyIndex<K> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Clone + Eq + Hash + Display> KeyIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, key: K) -> Result<(Nid, bool), FactError> {
        if let Some(nid) = self.index.get(&key) {
            return Ok((*nid, false));
        }
        let nid = Nid::from_index(self.keys.len())?;
        self.index.insert(key.clone(), nid);
        self.keys.push(key);
        Ok((nid, true))
    }

    pub fn assign_unique(&mut self, table: &str, key: K) -> Result<Nid, FactError> {
        let rendered = key.to_string();
        match self.assign(key)? {
            (nid, true) => Ok(nid),
            (_, false) => Err(FactError::DuplicateKey {
                table: table.to_string(),
                key: rendered,
            }),
        }
    }

    pub fn lookup(&self, key: &K) -> Option<Nid> {
        self.index.get(key).copied()
    }

    pub fn resolve(&self, table: &str, column: &str, key: &K) -> Result<Nid, FactError> {
        self.lookup(key)
            .ok_or_else(|| FactError::referential(table, column, key))
    }

    pub fn key(&self, nid: Nid) -> Option<&K> {
        self.keys.get(nid.index())
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdResolver {
    pub namespaces: KeyIndex<String>,
    pub projects: KeyIndex<EntityKey>,
    pub files: KeyIndex<EntityKey>,
    pub biosamples: KeyIndex<EntityKey>,
    pub subjects: KeyIndex<EntityKey>,
    pub collections: KeyIndex<EntityKey>,
}

impl IdResolver {
    pub fn entities(&self, kind: EntityKind) -> &KeyIndex<EntityKey> {
        match kind {
            EntityKind::File => &self.files,
            EntityKind::Biosample => &self.biosamples,
            EntityKind::Subject => &self.subjects,
            EntityKind::Collection => &self.collections,
        }
    }

    pub fn entities_mut(&mut self, kind: EntityKind) -> &mut KeyIndex<EntityKey> {
        match kind {
            EntityKind::File => &mut self.files,
            EntityKind::Biosample => &mut self.biosamples,
            EntityKind::Subject => &mut self.subjects,
            EntityKind::Collection => &mut self.collections,
        }
    }

    /// Namespaces are registered implicitly when no `id_namespace` row was submitted.
    pub fn namespace(&mut self, id: &str) -> Result<Nid, FactError> {
        Ok(self.namespaces.assign(id.to_string())?.0)
    }

    pub fn resolve_entity(
        &self,
        kind: EntityKind,
        table: &str,
        column: &str,
        key: &EntityKey,
    ) -> Result<Nid, FactError> {
        self.entities(kind).resolve(table, column, key)
    }

    pub fn resolve_project(
        &self,
        table: &str,
        column: &str,
        key: &EntityKey,
    ) -> Result<Nid, FactError> {
        self.projects.resolve(table, column, key)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn assign_is_stable_and_dense() {
        let mut index = KeyIndex::new();
        let (a, fresh_a) = index.assign(EntityKey::new("ns", "A")).unwrap();
        let (b, fresh_b) = index.assign(EntityKey::new("ns", "B")).unwrap();
        let (again, fresh_again) = index.assign(EntityKey::new("ns", "A")).unwrap();
        assert!(fresh_a && fresh_b && !fresh_again);
        assert_eq!(a, again);
        assert_eq!((a.get(), b.get()), (0, 1));
        assert_eq!(index.key(b), Some(&EntityKey::new("ns", "B")));
    }

    #[test]
    fn same_local_id_in_different_namespaces_is_distinct() {
        let mut index = KeyIndex::new();
        let a = index.assign(EntityKey::new("ns1", "X")).unwrap().0;
        let b = index.assign(EntityKey::new("ns2", "X")).unwrap().0;
        assert_ne!(a, b);
    }

    #[test]
    fn duplicate_and_missing_keys_are_errors() {
        let mut index = KeyIndex::new();
        index.assign_unique("file", EntityKey::new("ns", "F1")).unwrap();
        assert_matches!(
            index.assign_unique("file", EntityKey::new("ns", "F1")),
            Err(FactError::DuplicateKey { .. })
        );
        assert_matches!(
            index.resolve("file_describes_biosample", "file", &EntityKey::new("ns", "F9")),
            Err(FactError::ReferentialViolation { key, .. }) if key == "ns::F9"
        );
    }
}
