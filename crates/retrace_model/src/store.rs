//! Storage collaborator interface for traces.
//!
//! Durable persistence lives outside this workspace; the replay core only
//! needs fetch and idempotent upsert. The in-memory implementation backs
//! tests and embedded use.

use crate::trace::Trace;
use retrace_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// Storage collaborator the replay core reads and writes traces through.
///
/// Fetch and persistence are the only blocking boundaries in the core;
/// implementations may be backed by anything from a process-local map to
/// a SQL store.
pub trait TraceStore: Send + Sync {
    /// Fetch a trace by id
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no trace has that id
    fn get_trace(&self, id: &str) -> CoreResult<Trace>;

    /// Persist a trace, replacing any existing trace with the same id
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Storage` if the write fails
    fn save_trace(&self, trace: &Trace) -> CoreResult<()>;
}

/// In-memory trace store
pub struct MemoryTraceStore {
    traces: RwLock<HashMap<String, Trace>>,
}

impl MemoryTraceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            traces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of traces held
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned
    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.read().expect("trace store lock poisoned").len()
    }

    /// Whether the store holds no traces
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryTraceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceStore for MemoryTraceStore {
    fn get_trace(&self, id: &str) -> CoreResult<Trace> {
        let traces = self.traces.read().map_err(|_| CoreError::Storage {
            reason: "trace store lock poisoned".to_string(),
        })?;
        traces.get(id).cloned().ok_or_else(|| CoreError::NotFound {
            kind: "Trace".to_string(),
            id: id.to_string(),
        })
    }

    fn save_trace(&self, trace: &Trace) -> CoreResult<()> {
        let mut traces = self.traces.write().map_err(|_| CoreError::Storage {
            reason: "trace store lock poisoned".to_string(),
        })?;
        traces.insert(trace.id.clone(), trace.clone());
        Ok(())
    }
}
