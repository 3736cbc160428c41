//! In-memory adapter with snapshot transactions. Used by tests and embedders without a database.

use crate::error::HelperError;
use crate::model::{Identifier, Linkage, Model};
use crate::store::{Persistence, RelatedSet};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },
    #[error("{kind} '{id}' already exists")]
    Duplicate { kind: String, id: String },
}

/// type -> id -> record
pub type Tables = BTreeMap<String, BTreeMap<String, Model>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
}

/// A working copy of the tables plus the writer lock; writes land on commit.
pub struct MemoryTx {
    tables: Tables,
    _writer: OwnedMutexGuard<()>,
}

fn read_tables(store: &MemoryStore) -> Tables {
    match store.tables.read() {
        Ok(t) => t.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Inserts outside any transaction (fixtures).
    pub fn seed(&self, model: Model) {
        let mut tables = match self.tables.write() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables
            .entry(model.kind.clone())
            .or_default()
            .insert(model.id.clone(), model);
    }

    /// Committed state of one record.
    pub fn get(&self, kind: &str, id: &str) -> Option<Model> {
        read_tables(self).get(kind).and_then(|t| t.get(id)).cloned()
    }

    /// Committed state of one table, ordered by id.
    pub fn all(&self, kind: &str) -> Vec<Model> {
        read_tables(self)
            .get(kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, HelperError> {
        let writer = self.writer.clone().lock_owned().await;
        Ok(MemoryTx {
            tables: read_tables(self),
            _writer: writer,
        })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), HelperError> {
        let mut tables = match self.tables.write() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        *tables = tx.tables;
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), HelperError> {
        drop(tx);
        Ok(())
    }
}

impl MemoryTx {
    pub fn get(&self, kind: &str, id: &str) -> Option<&Model> {
        self.tables.get(kind).and_then(|t| t.get(id))
    }

    /// The record, or `MemoryError::NotFound`.
    pub fn fetch(&self, kind: &str, id: &str) -> Result<&Model, MemoryError> {
        self.get(kind, id).ok_or_else(|| MemoryError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        })
    }

    pub fn fetch_mut(&mut self, kind: &str, id: &str) -> Result<&mut Model, MemoryError> {
        self.tables
            .get_mut(kind)
            .and_then(|t| t.get_mut(id))
            .ok_or_else(|| MemoryError::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            })
    }

    pub fn all(&self, kind: &str) -> Vec<Model> {
        self.tables
            .get(kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Inserts a new record; an existing id is a `Duplicate`.
    pub fn insert(&mut self, model: Model) -> Result<(), MemoryError> {
        let table = self.tables.entry(model.kind.clone()).or_default();
        if table.contains_key(&model.id) {
            return Err(MemoryError::Duplicate {
                kind: model.kind,
                id: model.id,
            });
        }
        table.insert(model.id.clone(), model);
        Ok(())
    }

    pub fn remove(&mut self, kind: &str, id: &str) -> Result<Model, MemoryError> {
        self.tables
            .get_mut(kind)
            .and_then(|t| t.remove(id))
            .ok_or_else(|| MemoryError::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            })
    }

    /// Next numeric id for `kind` (max + 1).
    pub fn next_id(&self, kind: &str) -> String {
        let max = self
            .tables
            .get(kind)
            .map(|t| t.keys().filter_map(|k| k.parse::<u64>().ok()).max().unwrap_or(0))
            .unwrap_or(0);
        (max + 1).to_string()
    }
}

/// A to-many relationship stored as linkage on the parent record.
#[derive(Clone, Debug)]
pub struct MemoryJoinSet {
    parent: Identifier,
    rel: String,
}

impl MemoryJoinSet {
    pub fn new(parent: Identifier, rel: &str) -> Self {
        MemoryJoinSet {
            parent,
            rel: rel.to_string(),
        }
    }

    fn members_mut<'a>(&self, tx: &'a mut MemoryTx) -> Result<&'a mut Vec<Identifier>, MemoryError> {
        let parent = tx.fetch_mut(&self.parent.kind, &self.parent.id)?;
        let rel = parent.relationships.entry(self.rel.clone()).or_default();
        if !matches!(rel.data, Some(Linkage::Many(_))) {
            rel.data = Some(Linkage::Many(Vec::new()));
        }
        match &mut rel.data {
            Some(Linkage::Many(ids)) => Ok(ids),
            _ => Err(MemoryError::NotFound {
                kind: self.parent.kind.clone(),
                id: format!("{}/{}", self.parent.id, self.rel),
            }),
        }
    }
}

#[async_trait]
impl RelatedSet<MemoryTx> for MemoryJoinSet {
    async fn lock(&self, tx: &mut MemoryTx) -> Result<(), HelperError> {
        // The writer lock is held for the whole transaction.
        tx.fetch(&self.parent.kind, &self.parent.id)?;
        Ok(())
    }

    async fn current(&self, tx: &mut MemoryTx) -> Result<BTreeSet<Identifier>, HelperError> {
        let parent = tx.fetch(&self.parent.kind, &self.parent.id)?;
        Ok(match parent.linkage(&self.rel) {
            Some(Linkage::Many(ids)) => ids.iter().cloned().collect(),
            _ => BTreeSet::new(),
        })
    }

    async fn add(&self, tx: &mut MemoryTx, member: &Identifier) -> Result<(), HelperError> {
        tx.fetch(&member.kind, &member.id)?;
        let ids = self.members_mut(tx)?;
        if !ids.contains(member) {
            ids.push(member.clone());
        }
        Ok(())
    }

    async fn remove(&self, tx: &mut MemoryTx, member: &Identifier) -> Result<(), HelperError> {
        let ids = self.members_mut(tx)?;
        ids.retain(|id| id != member);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = MemoryStore::new();
        store.seed(Model::new("tags", "1"));

        let mut tx = store.begin().await.unwrap();
        tx.insert(Model::new("tags", "2")).unwrap();
        store.rollback(tx).await.unwrap();
        assert!(store.get("tags", "2").is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert(Model::new("tags", "2")).unwrap();
        store.commit(tx).await.unwrap();
        assert!(store.get("tags", "2").is_some());
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = MemoryStore::new();
        store.seed(Model::new("tags", "1"));
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.insert(Model::new("tags", "1")),
            Err(MemoryError::Duplicate { .. })
        ));
        assert_eq!(tx.next_id("tags"), "2");
    }

    #[tokio::test]
    async fn join_set_requires_existing_members() {
        let store = MemoryStore::new();
        store.seed(Model::new("posts", "p"));
        store.seed(Model::new("tags", "1"));
        let set = MemoryJoinSet::new(Identifier::new("posts", "p"), "tags");

        let mut tx = store.begin().await.unwrap();
        set.lock(&mut tx).await.unwrap();
        set.add(&mut tx, &Identifier::new("tags", "1")).await.unwrap();
        let err = set.add(&mut tx, &Identifier::new("tags", "9")).await.unwrap_err();
        assert!(err.is::<MemoryError>());
        assert_eq!(set.current(&mut tx).await.unwrap().len(), 1);
        store.commit(tx).await.unwrap();

        let post = store.get("posts", "p").unwrap();
        assert_eq!(post.linkage("tags"), Some(&Linkage::Many(vec![Identifier::new("tags", "1")])));
    }
}
