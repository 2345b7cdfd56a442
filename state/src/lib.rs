//! The state module persists the platform breakpoint store between sessions.

use std::{
    io::Read,
    io::Write,
    path::{Path, PathBuf},
};

use breakpoints::{
    store::{BreakpointStore, InMemoryStore},
    BreakpointId, PlatformBreakpoint,
};
use eyre::Context;
use serde::{Deserialize, Serialize};

pub const CURRENT_VERSION: &str = "1";

pub struct StateManager {
    save_path: PathBuf,
    current: Persistence,
}

impl StateManager {
    pub fn new(path: impl Into<PathBuf>) -> eyre::Result<Self> {
        let path = path.into();
        let span = tracing::debug_span!("StateManager", state_path = %path.display());
        let _guard = span.enter();

        tracing::debug!("attempting to load state");
        match crate::load_from(&path) {
            Ok(state) => {
                tracing::debug!(breakpoints = state.breakpoints.len(), "state loaded");
                Ok(Self {
                    save_path: path,
                    current: state,
                })
            }
            Err(e) => {
                tracing::debug!(error = %e, "loading state file");
                let state = Persistence::default();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).wrap_err("creating state directory")?;
                }
                crate::save_to(&state, &path).wrap_err("saving state file")?;

                Ok(Self {
                    save_path: path,
                    current: state,
                })
            }
        }
    }

    pub fn load(mut self) -> eyre::Result<Self> {
        let state = crate::load_from(&self.save_path).wrap_err("loading state")?;
        self.current = state;
        Ok(self)
    }

    pub fn save(self) -> eyre::Result<Self> {
        crate::save_to(&self.current, &self.save_path).wrap_err("saving state")?;
        Ok(self)
    }

    pub fn current(&self) -> &Persistence {
        &self.current
    }

    /// Builds a breakpoint store holding the persisted breakpoints.
    pub fn restore(&self) -> InMemoryStore {
        let breakpoints = self.current.breakpoints.iter().cloned().map(without_runtime_state);
        InMemoryStore::from_breakpoints(breakpoints, self.current.breakpoints_enabled)
            .with_next_id(self.current.next_id)
    }

    /// Replaces the persisted state with the contents of a store. Call
    /// [`StateManager::save`] to write it out.
    pub fn capture(&mut self, store: &InMemoryStore) {
        self.current = Persistence {
            version: CURRENT_VERSION.to_string(),
            breakpoints_enabled: store.is_enabled(),
            next_id: store.last_id(),
            breakpoints: store
                .snapshot()
                .into_iter()
                .map(without_runtime_state)
                .collect(),
        };
    }
}

// which targets a breakpoint is installed on means nothing in a later session
fn without_runtime_state(mut breakpoint: PlatformBreakpoint) -> PlatformBreakpoint {
    breakpoint.installed_on.clear();
    breakpoint
}

/// Where the state file lives unless told otherwise.
pub fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("breakpoints")
        .join("state.json")
}

/// State that is persisted
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Persistence {
    pub version: String,
    #[serde(default = "enabled_by_default")]
    pub breakpoints_enabled: bool,
    #[serde(default)]
    pub next_id: BreakpointId,
    #[serde(default)]
    pub breakpoints: Vec<PlatformBreakpoint>,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            breakpoints_enabled: true,
            next_id: 0,
            breakpoints: Vec::new(),
        }
    }
}

pub fn save(state: &Persistence, writer: impl Write) -> eyre::Result<()> {
    serde_json::to_writer_pretty(writer, state).context("saving breakpoint state")?;
    Ok(())
}

pub fn save_to(state: &Persistence, path: impl AsRef<Path>) -> eyre::Result<()> {
    let f = std::fs::File::create(path).context("creating file for saving")?;
    save(state, &f).context("saving state")?;
    Ok(())
}

pub fn load(reader: impl Read) -> eyre::Result<Persistence> {
    let st = serde_json::from_reader(reader).context("reading breakpoint state")?;
    Ok(st)
}

pub fn load_from(path: impl AsRef<Path>) -> eyre::Result<Persistence> {
    let path = path.as_ref();
    let f = std::fs::File::open(path)
        .with_context(|| format!("opening save state {}", path.display()))?;
    let state = load(f).context("reading from state file")?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use breakpoints::TargetId;
    use std::io::Cursor;

    fn breakpoint(id: BreakpointId, line: u32) -> PlatformBreakpoint {
        let mut bp = PlatformBreakpoint::line("cdi", "/src/main.c", line);
        bp.id = id;
        bp
    }

    #[test]
    fn round_trip_save_and_load() {
        let state = Persistence {
            version: "1".to_string(),
            breakpoints_enabled: false,
            next_id: 4,
            breakpoints: vec![breakpoint(3, 10).with_condition("x > 2", 1)],
        };

        let mut buf = Vec::new();
        save(&state, &mut buf).unwrap();

        let loaded = load(Cursor::new(&buf)).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn load_malformed_json() {
        let bad_json = Cursor::new(b"not valid json {{{");
        assert!(load(bad_json).is_err());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let loaded = load(Cursor::new(br#"{"version": "1"}"#)).unwrap();
        assert!(loaded.breakpoints_enabled);
        assert_eq!(loaded.next_id, 0);
        assert!(loaded.breakpoints.is_empty());
    }

    #[test]
    fn load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn state_manager_creates_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let manager = StateManager::new(&path).unwrap();
        assert_eq!(manager.current(), &Persistence::default());

        // File should have been created
        assert!(path.exists());
    }

    #[test]
    fn state_manager_loads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = Persistence {
            breakpoints: vec![breakpoint(1, 5)],
            next_id: 1,
            ..Persistence::default()
        };
        save_to(&state, &path).unwrap();

        let manager = StateManager::new(&path).unwrap();
        assert_eq!(manager.current().breakpoints.len(), 1);
    }

    #[test]
    fn restore_and_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut scoped = breakpoint(2, 7);
        scoped.filters.targets.insert(TargetId::new("t1"));
        let state = Persistence {
            breakpoints: vec![breakpoint(1, 5), scoped],
            next_id: 6,
            breakpoints_enabled: false,
            ..Persistence::default()
        };
        save_to(&state, &path).unwrap();

        let manager = StateManager::new(&path).unwrap();
        let store = manager.restore();
        assert!(!store.is_enabled());
        assert_eq!(store.breakpoints("cdi").len(), 2);
        let restored = store.get(2).unwrap();
        assert!(restored.filters.targets.contains(&TargetId::new("t1")));
        assert_eq!(restored.install_count(), 0);

        // deleted ids are not reused
        let id = store.add(PlatformBreakpoint::line("cdi", "/src/lib.c", 1)).unwrap();
        assert_eq!(id, 7);
        store.remove(1).unwrap();
        store.set_enabled(true);
        store.add_installed_target(id, &TargetId::new("t1"));

        let mut manager = manager;
        manager.capture(&store);
        let manager = manager.save().unwrap().load().unwrap();

        let current = manager.current();
        assert!(current.breakpoints_enabled);
        assert_eq!(current.next_id, 7);
        let ids: Vec<_> = current.breakpoints.iter().map(|bp| bp.id).collect();
        assert_eq!(ids, vec![2, 7]);
        assert!(current
            .breakpoints
            .iter()
            .all(|bp| bp.installed_on.is_empty()));
        assert_eq!(current.breakpoints[0].filters.targets.len(), 1);
    }
}
