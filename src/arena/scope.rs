//! Scope bookkeeping types.

use super::TensorId;

/// Outcome of closing a scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeReport {
    /// Tensors dropped.
    pub disposed: usize,
    /// Elements held by the dropped tensors.
    pub disposed_elements: usize,
    /// Tensors returned out of the scope.
    pub retained: usize,
    /// Tensors flagged with `keep`.
    pub kept: usize,
}

/// Snapshot of an arena's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Open scopes.
    pub depth: usize,
    /// Tensors currently owned by the arena.
    pub live_tensors: usize,
    /// Elements held by those tensors.
    pub live_elements: usize,
    /// Live tensors that outlived every scope.
    pub root_tensors: usize,
}

/// Values returned out of a scope that name the tensors they keep alive.
pub trait Retained {
    fn retained_ids(&self) -> Vec<TensorId>;
}

impl Retained for () {
    fn retained_ids(&self) -> Vec<TensorId> {
        Vec::new()
    }
}

impl Retained for TensorId {
    fn retained_ids(&self) -> Vec<TensorId> {
        vec![*self]
    }
}

impl Retained for Option<TensorId> {
    fn retained_ids(&self) -> Vec<TensorId> {
        self.iter().copied().collect()
    }
}

impl Retained for Vec<TensorId> {
    fn retained_ids(&self) -> Vec<TensorId> {
        self.clone()
    }
}

impl<const N: usize> Retained for [TensorId; N] {
    fn retained_ids(&self) -> Vec<TensorId> {
        self.to_vec()
    }
}

impl<A: Retained, C: Retained> Retained for (A, C) {
    fn retained_ids(&self) -> Vec<TensorId> {
        let mut ids = self.0.retained_ids();
        ids.extend(self.1.retained_ids());
        ids
    }
}
