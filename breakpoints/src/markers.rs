//! Problem markers: the reporting side channel for breakpoints that could not
//! be installed as requested.
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::BreakpointId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProblemKind {
    Unresolved,
    Moved,
    UnsupportedTracepoint,
    /// Reported by the backend, with its own classification.
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub breakpoint: BreakpointId,
    pub kind: ProblemKind,
    pub description: String,
    pub severity: Severity,
}

impl Problem {
    pub fn unresolved(breakpoint: BreakpointId, description: impl Into<String>) -> Self {
        Self {
            breakpoint,
            kind: ProblemKind::Unresolved,
            description: description.into(),
            severity: Severity::Warning,
        }
    }

    pub fn moved(breakpoint: BreakpointId, from: u32, to: u32) -> Self {
        Self {
            breakpoint,
            kind: ProblemKind::Moved,
            description: format!("breakpoint moved from line {from} to line {to}"),
            severity: Severity::Info,
        }
    }

    pub fn unsupported_tracepoint(breakpoint: BreakpointId) -> Self {
        Self {
            breakpoint,
            kind: ProblemKind::UnsupportedTracepoint,
            description: "tracepoints are not supported by this debugger".to_string(),
            severity: Severity::Error,
        }
    }
}

/// Problem markers are keyed by breakpoint and kind; reporting the same pair
/// again replaces the previous marker.
pub trait ProblemMarkers: Send + Sync {
    fn report(&self, problem: Problem);

    fn clear(&self, breakpoint: BreakpointId, kind: &ProblemKind);

    fn clear_all(&self, breakpoint: BreakpointId);
}

#[derive(Default)]
pub struct ProblemLog {
    problems: Mutex<BTreeMap<(BreakpointId, ProblemKind), Problem>>,
}

impl ProblemLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn problems_for(&self, breakpoint: BreakpointId) -> Vec<Problem> {
        self.lock()
            .range((breakpoint, ProblemKind::Unresolved)..)
            .take_while(|((id, _), _)| *id == breakpoint)
            .map(|(_, problem)| problem.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Problem> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(BreakpointId, ProblemKind), Problem>> {
        self.problems.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProblemMarkers for ProblemLog {
    fn report(&self, problem: Problem) {
        tracing::debug!(breakpoint = problem.breakpoint, kind = ?problem.kind, description = %problem.description, "reporting breakpoint problem");
        self.lock()
            .insert((problem.breakpoint, problem.kind.clone()), problem);
    }

    fn clear(&self, breakpoint: BreakpointId, kind: &ProblemKind) {
        self.lock().remove(&(breakpoint, kind.clone()));
    }

    fn clear_all(&self, breakpoint: BreakpointId) {
        self.lock().retain(|(id, _), _| *id != breakpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reporting_replaces_by_kind() {
        let log = ProblemLog::new();
        log.report(Problem::unresolved(1, "no such file"));
        log.report(Problem::unresolved(1, "no symbol"));
        log.report(Problem::moved(1, 3, 4));
        log.report(Problem::unresolved(2, "other"));

        let problems = log.problems_for(1);
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].description, "no symbol");
        assert_eq!(problems[1].description, "breakpoint moved from line 3 to line 4");
    }

    #[test]
    fn clearing() {
        let log = ProblemLog::new();
        log.report(Problem::unresolved(1, "no such file"));
        log.report(Problem::moved(1, 3, 4));
        log.report(Problem::unsupported_tracepoint(2));

        log.clear(1, &ProblemKind::Unresolved);
        assert_eq!(log.problems_for(1).len(), 1);

        log.clear_all(1);
        assert!(log.problems_for(1).is_empty());
        assert_eq!(log.all().len(), 1);
    }
}
