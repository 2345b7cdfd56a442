use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
};

use crate::backend::{BackendBreakpoint, BackendLocation};

pub type BreakpointId = u64;

/// The debug model breakpoints belong to unless configured otherwise.
pub const DEFAULT_MODEL_ID: &str = "cdi";

/// Identifies one debug target (one live debug session).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the breakpoint manager knows about the target it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub id: TargetId,
    pub project: Option<String>,
    pub referenced_projects: Vec<String>,
    pub executable: Option<PathBuf>,
}

impl TargetInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: TargetId::new(id),
            project: None,
            referenced_projects: Vec::new(),
            executable: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRange {
    pub memory_space: String,
    pub start: u64,
    pub length: u64,
}

// Serialize/Deserialize are required for persisting
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BreakpointKind {
    Line {
        source: PathBuf,
        line: u32,
    },
    Function {
        source: Option<PathBuf>,
        function: String,
    },
    Address {
        address: String,
        module: Option<PathBuf>,
    },
    Watchpoint {
        expression: String,
        read: bool,
        write: bool,
        #[serde(default)]
        memory: Option<MemoryRange>,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        event_type: String,
        argument: String,
    },
    #[serde(rename_all = "camelCase")]
    Tracepoint {
        source: PathBuf,
        line: u32,
        pass_count: u32,
    },
}

/// Which targets a breakpoint is restricted to, and which threads it is
/// restricted to on each of them. No targets means every target.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExtension {
    #[serde(default)]
    pub targets: BTreeSet<TargetId>,
    #[serde(default)]
    pub threads: BTreeMap<TargetId, Vec<String>>,
}

impl FilterExtension {
    pub fn allows(&self, target: &TargetId) -> bool {
        self.targets.is_empty() || self.targets.contains(target)
    }

    pub fn threads_for(&self, target: &TargetId) -> &[String] {
        self.threads.get(target).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn set_threads(&mut self, target: TargetId, threads: Vec<String>) {
        if threads.is_empty() {
            self.threads.remove(&target);
        } else {
            self.threads.insert(target, threads);
        }
    }
}

/// The user-facing breakpoint, as held by the persisted breakpoint store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformBreakpoint {
    pub id: BreakpointId,
    pub model_id: String,
    #[serde(flatten)]
    pub kind: BreakpointKind,
    pub enabled: bool,
    #[serde(default)]
    pub ignore_count: u32,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub hardware: bool,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub filters: FilterExtension,
    /// Targets the breakpoint is currently installed on.
    #[serde(skip)]
    pub installed_on: BTreeSet<TargetId>,
}

impl PlatformBreakpoint {
    pub fn new(model_id: impl Into<String>, kind: BreakpointKind) -> Self {
        Self {
            id: 0,
            model_id: model_id.into(),
            kind,
            enabled: true,
            ignore_count: 0,
            condition: String::new(),
            hardware: false,
            project: None,
            filters: FilterExtension::default(),
            installed_on: BTreeSet::new(),
        }
    }

    pub fn line(model_id: impl Into<String>, source: impl Into<PathBuf>, line: u32) -> Self {
        Self::new(
            model_id,
            BreakpointKind::Line {
                source: source.into(),
                line,
            },
        )
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>, ignore_count: u32) -> Self {
        self.condition = condition.into();
        self.ignore_count = ignore_count;
        self
    }

    /// Mirrors a breakpoint the backend created on its own.
    pub fn from_backend(
        id: BreakpointId,
        model_id: impl Into<String>,
        backend: &BackendBreakpoint,
        target: &TargetInfo,
    ) -> Self {
        let kind = match &backend.location {
            BackendLocation::Line { file, line } if backend.tracepoint => {
                BreakpointKind::Tracepoint {
                    source: file.clone(),
                    line: *line,
                    pass_count: backend.pass_count,
                }
            }
            BackendLocation::Line { file, line } => BreakpointKind::Line {
                source: file.clone(),
                line: *line,
            },
            BackendLocation::Function { file, function } => BreakpointKind::Function {
                source: file.clone(),
                function: function.clone(),
            },
            BackendLocation::Address { address } => BreakpointKind::Address {
                address: format!("{address:#x}"),
                module: target.executable.clone(),
            },
            BackendLocation::Watchpoint {
                expression,
                read,
                write,
                memory,
            } => BreakpointKind::Watchpoint {
                expression: expression.clone(),
                read: *read,
                write: *write,
                memory: memory.clone(),
            },
            BackendLocation::Event {
                event_type,
                argument,
            } => BreakpointKind::Event {
                event_type: event_type.clone(),
                argument: argument.clone(),
            },
        };

        let mut breakpoint = Self::new(model_id, kind);
        breakpoint.id = id;
        breakpoint.enabled = backend.enabled;
        breakpoint.ignore_count = backend.condition.ignore_count;
        breakpoint.condition = backend.condition.expression.clone();
        breakpoint.hardware = backend.hardware;
        breakpoint
            .filters
            .set_threads(target.id.clone(), backend.condition.thread_ids.clone());
        breakpoint
    }

    pub fn source_handle(&self) -> Option<&Path> {
        match &self.kind {
            BreakpointKind::Line { source, .. } | BreakpointKind::Tracepoint { source, .. } => {
                Some(source)
            }
            BreakpointKind::Function { source, .. } => source.as_deref(),
            _ => None,
        }
    }

    pub fn install_count(&self) -> usize {
        self.installed_on.len()
    }

    pub fn pass_count(&self) -> u32 {
        match &self.kind {
            BreakpointKind::Tracepoint { pass_count, .. } => *pass_count,
            _ => 0,
        }
    }

    pub fn line_number(&self) -> Option<u32> {
        match &self.kind {
            BreakpointKind::Line { line, .. } | BreakpointKind::Tracepoint { line, .. } => {
                Some(*line)
            }
            _ => None,
        }
    }

    /// Returns the previous line, or `None` for breakpoints without one.
    pub fn set_line_number(&mut self, new_line: u32) -> Option<u32> {
        match &mut self.kind {
            BreakpointKind::Line { line, .. } | BreakpointKind::Tracepoint { line, .. } => {
                Some(std::mem::replace(line, new_line))
            }
            _ => None,
        }
    }

    pub fn is_tracepoint(&self) -> bool {
        matches!(self.kind, BreakpointKind::Tracepoint { .. })
    }

    /// The backend cannot restrict watchpoints to threads.
    pub fn supports_thread_filters(&self) -> bool {
        !matches!(self.kind, BreakpointKind::Watchpoint { .. })
    }
}

/// Parses a hexadecimal (`0x` prefixed) or decimal address.
pub fn parse_address(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{parse_address, BreakpointKind, PlatformBreakpoint, TargetId};
    use crate::backend::{BackendBreakpoint, BackendId, BackendLocation, Condition};

    #[test]
    fn addresses() {
        assert_eq!(parse_address("0x10"), Some(16));
        assert_eq!(parse_address("0X1f"), Some(31));
        assert_eq!(parse_address("42"), Some(42));
        assert_eq!(parse_address("main"), None);
    }

    #[test]
    fn moving_a_line_breakpoint() {
        let mut b = PlatformBreakpoint::line("cdi", "/src/main.c", 10);
        assert_eq!(b.set_line_number(12), Some(10));
        assert_eq!(b.line_number(), Some(12));

        let mut f = PlatformBreakpoint::new(
            "cdi",
            BreakpointKind::Function {
                source: None,
                function: "main".to_string(),
            },
        );
        assert_eq!(f.set_line_number(3), None);
    }

    #[test]
    fn thread_filters_are_per_target() {
        let mut b = PlatformBreakpoint::line("cdi", PathBuf::from("/src/main.c"), 1);
        let target = TargetId::new("t1");
        b.filters.set_threads(target.clone(), vec!["1".to_string()]);
        assert_eq!(b.filters.threads_for(&target), ["1".to_string()]);
        assert!(b.filters.threads_for(&TargetId::new("t2")).is_empty());

        b.filters.set_threads(target.clone(), Vec::new());
        assert!(b.filters.threads.is_empty());
    }

    #[test]
    fn persisted_format() {
        let b = PlatformBreakpoint::line("cdi", "/src/main.c", 7).with_condition("x > 1", 2);
        let value = serde_json::to_value(&b).unwrap();
        assert_eq!(value["kind"], "line");
        assert_eq!(value["line"], 7);
        assert_eq!(value["ignoreCount"], 2);
        assert!(value.get("installedOn").is_none());

        let decoded: PlatformBreakpoint = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, b);
    }

    #[test]
    fn target_filters() {
        let mut b = PlatformBreakpoint::line("cdi", "/src/main.c", 1);
        assert!(b.filters.allows(&TargetId::new("t1")));

        b.filters.targets.insert(TargetId::new("t1"));
        assert!(b.filters.allows(&TargetId::new("t1")));
        assert!(!b.filters.allows(&TargetId::new("t2")));
    }

    #[test]
    fn mirrored_tracepoints_keep_their_pass_count() {
        let backend = BackendBreakpoint {
            id: BackendId(3),
            location: BackendLocation::Line {
                file: PathBuf::from("/src/main.c"),
                line: 8,
            },
            enabled: true,
            condition: Condition::default(),
            temporary: false,
            hardware: false,
            tracepoint: true,
            pass_count: 5,
        };
        let b = PlatformBreakpoint::from_backend(9, "cdi", &backend, &super::TargetInfo::new("t1"));
        assert_eq!(
            b.kind,
            BreakpointKind::Tracepoint {
                source: PathBuf::from("/src/main.c"),
                line: 8,
                pass_count: 5,
            }
        );
        assert_eq!(b.pass_count(), 5);
    }
}
