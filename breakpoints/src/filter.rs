//! Pure decisions about platform breakpoints: whether one belongs on a target,
//! what the backend should be asked for, and whether a backend breakpoint is
//! the one it asked for.
use std::path::{Path, PathBuf};

use crate::{
    backend::{BackendBreakpoint, BackendError, BackendLocation, Condition},
    locator::SourceLocator,
    types::{parse_address, BreakpointKind, PlatformBreakpoint, TargetInfo},
    utils::same_file,
};

pub fn applies_to_target(
    breakpoint: &PlatformBreakpoint,
    target: &TargetInfo,
    locator: &dyn SourceLocator,
) -> bool {
    if !breakpoint.filters.allows(&target.id) {
        return false;
    }

    if let BreakpointKind::Address { module, .. } = &breakpoint.kind {
        return match (module, &target.executable) {
            // no symbol information recorded, so it may belong anywhere
            (None, _) => true,
            (Some(module), Some(executable)) => same_file(module, executable),
            (Some(_), None) => false,
        };
    }

    if let Some(project) = &breakpoint.project {
        return target.project.as_ref() == Some(project)
            || target.referenced_projects.contains(project)
            || locator.contains_project(project);
    }

    if let Some(source) = breakpoint.source_handle() {
        return locator.find_source_element(source).is_some();
    }

    true
}

pub fn backend_condition(breakpoint: &PlatformBreakpoint, target: &TargetInfo) -> Condition {
    let thread_ids = if breakpoint.supports_thread_filters() {
        breakpoint.filters.threads_for(&target.id).to_vec()
    } else {
        Vec::new()
    };

    Condition {
        ignore_count: breakpoint.ignore_count,
        expression: breakpoint.condition.clone(),
        thread_ids,
    }
}

/// The file the debugger should be given for a source handle.
pub fn debugger_path(handle: &Path, locator: &dyn SourceLocator) -> PathBuf {
    locator
        .find_source_element(handle)
        .unwrap_or_else(|| crate::utils::normalise_path(handle).into_owned())
}

pub fn backend_location(
    breakpoint: &PlatformBreakpoint,
    locator: &dyn SourceLocator,
) -> Result<BackendLocation, BackendError> {
    let location = match &breakpoint.kind {
        BreakpointKind::Line { source, line } | BreakpointKind::Tracepoint { source, line, .. } => {
            BackendLocation::Line {
                file: debugger_path(source, locator),
                line: *line,
            }
        }
        BreakpointKind::Function { source, function } => BackendLocation::Function {
            file: source.as_deref().map(|source| debugger_path(source, locator)),
            function: function.clone(),
        },
        BreakpointKind::Address { address, .. } => BackendLocation::Address {
            address: parse_address(address).ok_or_else(|| {
                BackendError::Unresolved(format!("invalid address '{address}'"))
            })?,
        },
        BreakpointKind::Watchpoint {
            expression,
            read,
            write,
            memory,
        } => BackendLocation::Watchpoint {
            expression: expression.clone(),
            read: *read,
            write: *write,
            memory: memory.clone(),
        },
        BreakpointKind::Event {
            event_type,
            argument,
        } => BackendLocation::Event {
            event_type: event_type.clone(),
            argument: argument.clone(),
        },
    };
    Ok(location)
}

pub fn structural_match(
    breakpoint: &PlatformBreakpoint,
    backend: &BackendBreakpoint,
    locator: &dyn SourceLocator,
) -> bool {
    if breakpoint.hardware != backend.hardware
        || breakpoint.is_tracepoint() != backend.tracepoint
        || breakpoint.pass_count() != backend.pass_count
    {
        return false;
    }

    match (&breakpoint.kind, &backend.location) {
        (
            BreakpointKind::Function { function, .. },
            BackendLocation::Function {
                function: resolved, ..
            },
        ) => function == resolved,
        (BreakpointKind::Address { address, .. }, BackendLocation::Address { address: resolved }) => {
            parse_address(address) == Some(*resolved)
        }
        (
            BreakpointKind::Line { source, line } | BreakpointKind::Tracepoint { source, line, .. },
            BackendLocation::Line {
                file,
                line: resolved_line,
            },
        ) => line == resolved_line && same_file(&debugger_path(source, locator), file),
        (
            BreakpointKind::Watchpoint {
                expression,
                read,
                write,
                memory,
            },
            BackendLocation::Watchpoint {
                expression: resolved_expression,
                read: resolved_read,
                write: resolved_write,
                memory: resolved_memory,
            },
        ) => {
            expression == resolved_expression
                && read == resolved_read
                && write == resolved_write
                && memory == resolved_memory
        }
        (
            BreakpointKind::Event {
                event_type,
                argument,
            },
            BackendLocation::Event {
                event_type: resolved_type,
                argument: resolved_argument,
            },
        ) => event_type == resolved_type && argument == resolved_argument,
        _ => false,
    }
}

/// A change to any of these cannot be patched on the installed breakpoint.
pub fn needs_reinstall(previous: &PlatformBreakpoint, current: &PlatformBreakpoint) -> bool {
    previous.kind != current.kind || previous.hardware != current.hardware
}
