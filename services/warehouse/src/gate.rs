//! Mutual exclusion between refreshes and reads.
//!
//! A refresh deletes and regenerates every dimension, so surrogate ids held
//! by an in-flight read would dangle. The gate serializes refreshes, keeps
//! reads out while one runs, and numbers each committed refresh.
//!
//! Exclusion only covers callers sharing one gate, i.e. one process. An
//! `etl refresh` run from the CLI against the same Postgres database as a
//! running api is not fenced off from that api's reads; trigger refreshes
//! through `POST /etl/refresh` when the api is serving.

use crate::error::{Result, WarehouseError};
use crate::store::Warehouse;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

#[derive(Debug, Default)]
struct Generation {
    committed: u64,
    /// Set while a refresh is open and left set if it is dropped without
    /// committing.
    dirty: bool,
}

pub struct RefreshGate<W: ?Sized> {
    state: RwLock<Generation>,
    warehouse: Arc<W>,
}

impl<W: Warehouse + ?Sized> RefreshGate<W> {
    pub fn new(warehouse: Arc<W>) -> Self {
        Self {
            state: RwLock::new(Generation::default()),
            warehouse,
        }
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Shared access pinned to the last committed generation. Fails while
    /// the store holds the remains of an aborted refresh.
    pub async fn read(&self) -> Result<ReadAccess<'_, W>> {
        let guard = self.state.read().await;
        if guard.dirty {
            return Err(WarehouseError::RefreshIncomplete);
        }
        Ok(ReadAccess {
            guard,
            warehouse: &self.warehouse,
        })
    }

    /// Exclusive access for one refresh. Waits for running reads and any
    /// other refresh to finish.
    pub async fn refresh(&self) -> RefreshAccess<'_, W> {
        let mut guard = self.state.write().await;
        guard.dirty = true;
        RefreshAccess {
            guard,
            warehouse: &self.warehouse,
            committed: false,
        }
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.committed
    }
}

pub struct ReadAccess<'a, W: ?Sized> {
    guard: RwLockReadGuard<'a, Generation>,
    warehouse: &'a W,
}

impl<W: ?Sized> ReadAccess<'_, W> {
    pub fn warehouse(&self) -> &W {
        self.warehouse
    }

    pub fn generation(&self) -> u64 {
        self.guard.committed
    }
}

pub struct RefreshAccess<'a, W: ?Sized> {
    guard: RwLockWriteGuard<'a, Generation>,
    warehouse: &'a W,
    committed: bool,
}

impl<W: ?Sized> RefreshAccess<'_, W> {
    pub fn warehouse(&self) -> &W {
        self.warehouse
    }

    /// Mark the refresh complete and return the new generation.
    pub fn commit(mut self) -> u64 {
        self.guard.committed += 1;
        self.guard.dirty = false;
        self.committed = true;
        self.guard.committed
    }
}

impl<W: ?Sized> Drop for RefreshAccess<'_, W> {
    fn drop(&mut self) {
        if !self.committed {
            warn!(
                generation = self.guard.committed,
                "refresh aborted; reads blocked until the next successful refresh"
            );
        }
    }
}
