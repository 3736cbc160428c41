//! Persistence boundary: transactions and relationship sets.

pub mod memory;
pub mod pg;

use crate::error::HelperError;
use crate::model::Identifier;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

pub use memory::{MemoryError, MemoryJoinSet, MemoryStore, MemoryTx};
pub use pg::{configure_exceptions, ensure_database_exists, PgJoinSet, PgStore};

/// Transaction source. Every mutating request and all of its sideloads share one `Tx`.
#[async_trait]
pub trait Persistence: Clone + Send + Sync + 'static {
    type Tx: Send + 'static;

    async fn begin(&self) -> Result<Self::Tx, HelperError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), HelperError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), HelperError>;
}

/// Ambient transaction slot of one request; empty outside a transaction.
pub type Session<P> = Arc<tokio::sync::Mutex<Option<<P as Persistence>::Tx>>>;

pub fn new_session<P: Persistence>() -> Session<P> {
    Arc::new(tokio::sync::Mutex::new(None))
}

/// The members of one to-many relationship of one parent row.
#[async_trait]
pub trait RelatedSet<Tx: Send>: Send + Sync {
    /// Locks the parent row for the rest of the transaction. Fails if the parent is gone.
    async fn lock(&self, tx: &mut Tx) -> Result<(), HelperError>;
    async fn current(&self, tx: &mut Tx) -> Result<BTreeSet<Identifier>, HelperError>;
    /// Fails with the store's not-found error when `member` does not exist.
    async fn add(&self, tx: &mut Tx, member: &Identifier) -> Result<(), HelperError>;
    async fn remove(&self, tx: &mut Tx, member: &Identifier) -> Result<(), HelperError>;
}
