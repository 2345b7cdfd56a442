//! Association between platform breakpoints and the backend breakpoints
//! installed for them on one target.
//!
//! Every platform breakpoint known to the target has exactly one record, which
//! is either `Pending` (install requested, nothing confirmed by the backend) or
//! `Bound` to one backend breakpoint. The reverse index only ever holds bound
//! records. The map is not synchronised itself: the manager keeps it behind a
//! single mutex so that check-then-act sequences stay atomic.
use std::collections::{BTreeMap, HashMap};

use crate::{
    backend::{BackendBreakpoint, BackendId},
    types::{BreakpointId, PlatformBreakpoint},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Pending,
    Bound(BackendBreakpoint),
}

#[derive(Debug, Clone)]
struct Record {
    /// The breakpoint as last pushed to the backend.
    breakpoint: PlatformBreakpoint,
    binding: Binding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The record moved from `Pending` to `Bound`.
    Bound,
    AlreadyBound,
    /// The platform breakpoint is bound to a different backend breakpoint.
    BoundElsewhere(BackendId),
    /// The backend breakpoint belongs to a different platform breakpoint.
    BackendTaken(BreakpointId),
    NotRegistered,
}

#[derive(Debug, Default)]
pub struct BreakpointMap {
    records: BTreeMap<BreakpointId, Record>,
    by_backend: HashMap<BackendId, BreakpointId>,
    // backend modifications that arrived before their platform breakpoint was known
    stashed: HashMap<BackendId, BackendBreakpoint>,
    // breakpoint whose create call has not returned yet
    installing: Option<BreakpointId>,
}

impl BreakpointMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a new `Pending` record was inserted.
    pub fn register(&mut self, breakpoint: PlatformBreakpoint) -> bool {
        if self.records.contains_key(&breakpoint.id) {
            return false;
        }
        self.records.insert(
            breakpoint.id,
            Record {
                breakpoint,
                binding: Binding::Pending,
            },
        );
        true
    }

    pub fn bind(&mut self, id: BreakpointId, backend: BackendBreakpoint) -> BindOutcome {
        if let Some(owner) = self.by_backend.get(&backend.id) {
            if *owner != id {
                return BindOutcome::BackendTaken(*owner);
            }
        }

        let Some(record) = self.records.get_mut(&id) else {
            return BindOutcome::NotRegistered;
        };

        match &record.binding {
            Binding::Bound(existing) if existing.id == backend.id => {
                return BindOutcome::AlreadyBound
            }
            Binding::Bound(existing) => return BindOutcome::BoundElsewhere(existing.id),
            Binding::Pending => {}
        }

        self.by_backend.insert(backend.id, id);
        record.binding = Binding::Bound(backend);
        BindOutcome::Bound
    }

    /// Registers and binds in one step, for breakpoints the backend created on
    /// its own.
    pub fn register_bound(
        &mut self,
        breakpoint: PlatformBreakpoint,
        backend: BackendBreakpoint,
    ) -> BindOutcome {
        let id = breakpoint.id;
        self.register(breakpoint);
        self.bind(id, backend)
    }

    pub fn backend(&self, id: BreakpointId) -> Option<&BackendBreakpoint> {
        match &self.records.get(&id)?.binding {
            Binding::Bound(backend) => Some(backend),
            Binding::Pending => None,
        }
    }

    /// Direct reverse lookup, without structural matching.
    pub fn platform_id(&self, backend: BackendId) -> Option<BreakpointId> {
        self.by_backend.get(&backend).copied()
    }

    /// The current view of a bound backend breakpoint.
    pub fn bound_backend(&self, backend: BackendId) -> Option<&BackendBreakpoint> {
        self.platform_id(backend).and_then(|id| self.backend(id))
    }

    pub fn mark_installing(&mut self, id: BreakpointId) {
        self.installing = Some(id);
    }

    pub fn finish_installing(&mut self, id: BreakpointId) {
        if self.installing == Some(id) {
            self.installing = None;
        }
    }

    /// Reverse lookup falling back to structural matching against pending
    /// breakpoints. A backend announcing a breakpoint can race the bind of the
    /// request that created it. The breakpoint whose create call is in flight
    /// is preferred, otherwise the first match in id order wins.
    pub fn lookup_platform(
        &self,
        backend: &BackendBreakpoint,
        matches: impl Fn(&PlatformBreakpoint, &BackendBreakpoint) -> bool,
    ) -> Option<BreakpointId> {
        if let Some(id) = self.platform_id(backend.id) {
            return Some(id);
        }

        if let Some(id) = self.installing {
            if let Some(record) = self.records.get(&id) {
                if record.binding == Binding::Pending && matches(&record.breakpoint, backend) {
                    return Some(id);
                }
            }
        }

        let mut candidates = self
            .records
            .iter()
            .filter(|(_, record)| record.binding == Binding::Pending)
            .filter(|(_, record)| matches(&record.breakpoint, backend))
            .map(|(id, _)| *id);
        let first = candidates.next();
        if first.is_some() && candidates.next().is_some() {
            tracing::debug!(backend = %backend.id, "several pending breakpoints match, using the first");
        }
        first
    }

    /// Drops the record bound to `backend`, returning its platform breakpoint.
    pub fn unbind(&mut self, backend: BackendId) -> Option<BreakpointId> {
        let id = self.by_backend.remove(&backend)?;
        self.records.remove(&id);
        Some(id)
    }

    /// Drops a record whatever its state, returning the backend breakpoint it
    /// was bound to.
    pub fn deregister(&mut self, id: BreakpointId) -> Option<Binding> {
        let record = self.records.remove(&id)?;
        if let Binding::Bound(backend) = &record.binding {
            self.by_backend.remove(&backend.id);
        }
        Some(record.binding)
    }

    pub fn is_registered(&self, id: BreakpointId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn is_pending(&self, id: BreakpointId) -> bool {
        matches!(
            self.records.get(&id),
            Some(Record {
                binding: Binding::Pending,
                ..
            })
        )
    }

    pub fn breakpoint(&self, id: BreakpointId) -> Option<&PlatformBreakpoint> {
        self.records.get(&id).map(|record| &record.breakpoint)
    }

    /// Replaces the recorded platform breakpoint, keeping its binding.
    pub fn update_breakpoint(&mut self, breakpoint: PlatformBreakpoint) -> bool {
        match self.records.get_mut(&breakpoint.id) {
            Some(record) => {
                record.breakpoint = breakpoint;
                true
            }
            None => false,
        }
    }

    /// Replaces the bound backend breakpoint with a newer view of it.
    pub fn update_backend(&mut self, backend: BackendBreakpoint) -> bool {
        let Some(id) = self.platform_id(backend.id) else {
            return false;
        };
        match self.records.get_mut(&id) {
            Some(record) => {
                record.binding = Binding::Bound(backend);
                true
            }
            None => false,
        }
    }

    /// Moves a bound line breakpoint, on both sides of the association.
    /// Returns the platform breakpoint and its previous line.
    pub fn relocate(&mut self, backend: BackendId, line: u32) -> Option<(BreakpointId, u32)> {
        let id = self.platform_id(backend)?;
        let record = self.records.get_mut(&id)?;
        let previous = record.breakpoint.set_line_number(line)?;
        if let Binding::Bound(bound) = &mut record.binding {
            if let crate::backend::BackendLocation::Line { line: bound_line, .. } =
                &mut bound.location
            {
                *bound_line = line;
            }
        }
        Some((id, previous))
    }

    pub fn platform_breakpoints(&self) -> Vec<BreakpointId> {
        self.records.keys().copied().collect()
    }

    pub fn bound(&self) -> impl Iterator<Item = (&PlatformBreakpoint, &BackendBreakpoint)> {
        self.records
            .values()
            .filter_map(|record| match &record.binding {
                Binding::Bound(backend) => Some((&record.breakpoint, backend)),
                Binding::Pending => None,
            })
    }

    pub fn stash(&mut self, backend: BackendBreakpoint) {
        self.stashed.insert(backend.id, backend);
    }

    pub fn take_stashed(&mut self, backend: BackendId) -> Option<BackendBreakpoint> {
        self.stashed.remove(&backend)
    }

    /// Empties the map, returning every record's platform id and binding.
    pub fn clear(&mut self) -> Vec<(BreakpointId, Binding)> {
        self.by_backend.clear();
        self.stashed.clear();
        self.installing = None;
        std::mem::take(&mut self.records)
            .into_iter()
            .map(|(id, record)| (id, record.binding))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
