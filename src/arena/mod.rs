//! # Tensor Resource Arena
//!
//! Scoped ownership for intermediate tensors. Every tensor registered while a
//! scope is open belongs to the innermost scope and is dropped when that
//! scope ends, unless it was returned out of the scope or explicitly kept.
//!
//! The scope stack is an explicit value owned by the caller, so independent
//! arenas never observe each other's scopes.
//!
//! ```ignore
//! let mut arena = TensorArena::<B>::new();
//! let image = arena.scoped(|arena| {
//!     let raw = arena.track(decode::<B>(&bytes, &device)?);
//!     let resized = resize_nearest(arena.get::<3, Int>(raw)?, 64)?;
//!     Ok(arena.track(resized))
//! })?;
//! // `raw` is disposed, `image` is still alive
//! ```

mod scope;

pub use scope::{ArenaStats, Retained, ScopeReport};

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use burn::tensor::backend::Backend;
use burn::tensor::{BasicOps, Tensor};
use tracing::{debug, warn};

use crate::error::{ArenaError, Result};

/// Handle to a tensor owned by a [`TensorArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry {
    value: Box<dyn Any>,
    elements: usize,
    kept: bool,
}

/// Explicit scope stack plus a registry of live tensors.
pub struct TensorArena<B: Backend> {
    entries: HashMap<TensorId, Entry>,
    /// Open scopes, innermost last. Each lists the ids registered to it.
    scopes: Vec<Vec<TensorId>>,
    /// Tensors that outlived every scope (kept, or tracked with no scope open).
    root: Vec<TensorId>,
    next_id: u64,
    _backend: PhantomData<B>,
}

impl<B: Backend> TensorArena<B> {
    /// Create an arena with no open scope.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            scopes: Vec::new(),
            root: Vec::new(),
            next_id: 0,
            _backend: PhantomData,
        }
    }

    /// Open a new disposal scope.
    pub fn start_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Number of currently open scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Register a tensor with the innermost open scope.
    pub fn track<const D: usize, K>(&mut self, tensor: Tensor<B, D, K>) -> TensorId
    where
        K: BasicOps<B> + 'static,
    {
        let id = TensorId(self.next_id);
        self.next_id += 1;

        let elements = tensor.shape().num_elements();
        self.entries.insert(
            id,
            Entry {
                value: Box::new(tensor),
                elements,
                kept: false,
            },
        );

        match self.scopes.last_mut() {
            Some(scope) => scope.push(id),
            None => self.root.push(id),
        }
        id
    }

    /// Exempt a tensor from every scope disposal. It moves to the root pool
    /// when its scope ends and is freed only by [`Self::dispose`] or
    /// [`Self::dispose_variables`].
    pub fn keep(&mut self, id: TensorId) -> std::result::Result<TensorId, ArenaError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(ArenaError::UnknownTensor(id))?;
        entry.kept = true;
        Ok(id)
    }

    /// Clone the handle of a live tensor.
    pub fn get<const D: usize, K>(
        &self,
        id: TensorId,
    ) -> std::result::Result<Tensor<B, D, K>, ArenaError>
    where
        K: BasicOps<B> + 'static,
    {
        let entry = self.entries.get(&id).ok_or(ArenaError::UnknownTensor(id))?;
        entry
            .value
            .downcast_ref::<Tensor<B, D, K>>()
            .cloned()
            .ok_or(ArenaError::KindMismatch(id))
    }

    /// Remove a tensor from the arena and hand its ownership to the caller.
    pub fn take<const D: usize, K>(
        &mut self,
        id: TensorId,
    ) -> std::result::Result<Tensor<B, D, K>, ArenaError>
    where
        K: BasicOps<B> + 'static,
    {
        let entry = self.entries.get(&id).ok_or(ArenaError::UnknownTensor(id))?;
        if !entry.value.is::<Tensor<B, D, K>>() {
            return Err(ArenaError::KindMismatch(id));
        }
        let entry = self
            .entries
            .remove(&id)
            .ok_or(ArenaError::UnknownTensor(id))?;
        self.forget(id);
        entry
            .value
            .downcast::<Tensor<B, D, K>>()
            .map(|tensor| *tensor)
            .map_err(|_| ArenaError::KindMismatch(id))
    }

    /// Whether the id still refers to a live tensor.
    pub fn contains(&self, id: TensorId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Drop a single tensor immediately.
    pub fn dispose(&mut self, id: TensorId) -> std::result::Result<(), ArenaError> {
        self.entries
            .remove(&id)
            .ok_or(ArenaError::UnknownTensor(id))?;
        self.forget(id);
        Ok(())
    }

    /// Drop `id` from the scope lists and the root pool.
    fn forget(&mut self, id: TensorId) {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|scope| scope.contains(&id)) {
            scope.retain(|other| *other != id);
        } else {
            self.root.retain(|other| *other != id);
        }
    }

    /// Close the innermost scope, disposing everything registered to it that
    /// was not kept.
    pub fn end_scope(&mut self) -> std::result::Result<ScopeReport, ArenaError> {
        self.end_scope_retaining(&[])
    }

    /// Close the innermost scope. Tensors listed in `retained` survive and are
    /// handed to the parent scope (or the root pool at the outermost level).
    ///
    /// The scope is closed even when `retained` names an id that is no longer
    /// live; that id is reported as [`ArenaError::UnknownTensor`] afterwards.
    pub fn end_scope_retaining(
        &mut self,
        retained: &[TensorId],
    ) -> std::result::Result<ScopeReport, ArenaError> {
        let Some(registered) = self.scopes.pop() else {
            return Err(ArenaError::NoOpenScope);
        };
        let missing = retained.iter().find(|id| !self.entries.contains_key(id)).copied();
        let mut report = ScopeReport::default();

        for id in registered {
            let Some(entry) = self.entries.get(&id) else {
                // already taken or disposed explicitly
                continue;
            };
            if retained.contains(&id) {
                report.retained += 1;
                match self.scopes.last_mut() {
                    Some(parent) => parent.push(id),
                    None => self.root.push(id),
                }
            } else if entry.kept {
                report.kept += 1;
                self.root.push(id);
            } else if let Some(entry) = self.entries.remove(&id) {
                report.disposed += 1;
                report.disposed_elements += entry.elements;
            }
        }

        debug!(
            depth = self.scopes.len(),
            disposed = report.disposed,
            retained = report.retained,
            kept = report.kept,
            "arena scope closed"
        );
        match missing {
            Some(id) => Err(ArenaError::UnknownTensor(id)),
            None => Ok(report),
        }
    }

    /// Run `f` inside a fresh scope. Ids named by the return value survive;
    /// everything else registered inside is disposed, on the error path too.
    pub fn scoped<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
        R: Retained,
    {
        self.start_scope();
        let depth = self.scopes.len();
        let outcome = f(self);

        if self.scopes.len() < depth {
            // the closure closed this scope (and possibly outer ones) itself
            return Err(ArenaError::ScopeClosedByClosure {
                expected: depth,
                found: self.scopes.len(),
            }
            .into());
        }
        while self.scopes.len() > depth {
            warn!("closure left an inner arena scope open; closing it");
            self.end_scope()?;
        }

        match outcome {
            Ok(value) => {
                self.end_scope_retaining(&value.retained_ids())?;
                Ok(value)
            }
            Err(err) => {
                self.end_scope()?;
                Err(err)
            }
        }
    }

    /// Free every tensor in the root pool, i.e. everything that outlived all
    /// scopes. Intended for teardown between independent runs.
    pub fn dispose_variables(&mut self) -> usize {
        let mut disposed = 0;
        for id in self.root.drain(..) {
            if self.entries.remove(&id).is_some() {
                disposed += 1;
            }
        }
        debug!(disposed, "arena variables disposed");
        disposed
    }

    /// Current bookkeeping counters.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            depth: self.scopes.len(),
            live_tensors: self.entries.len(),
            live_elements: self.entries.values().map(|e| e.elements).sum(),
            root_tensors: self
                .root
                .iter()
                .filter(|id| self.entries.contains_key(id))
                .count(),
        }
    }
}

impl<B: Backend> Default for TensorArena<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> fmt::Debug for TensorArena<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorArena")
            .field("stats", &self.stats())
            .finish()
    }
}
