//! Source lookup used to decide which breakpoints belong to a target.
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use crate::utils::normalise_path;

pub trait SourceLocator: Send + Sync {
    /// Resolves a breakpoint's source handle to a file the debugger can use.
    fn find_source_element(&self, handle: &Path) -> Option<PathBuf>;

    fn contains_project(&self, project: &str) -> bool;
}

/// Looks source handles up on disk, relative handles under a list of roots.
#[derive(Debug, Clone, Default)]
pub struct SourceDirectories {
    roots: Vec<PathBuf>,
    projects: BTreeSet<String>,
}

impl SourceDirectories {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            projects: BTreeSet::new(),
        }
    }

    pub fn with_projects(mut self, projects: impl IntoIterator<Item = String>) -> Self {
        self.projects.extend(projects);
        self
    }
}

impl SourceLocator for SourceDirectories {
    fn find_source_element(&self, handle: &Path) -> Option<PathBuf> {
        let handle = normalise_path(handle);
        if handle.is_absolute() {
            return handle
                .is_file()
                .then(|| handle.canonicalize().unwrap_or_else(|_| handle.to_path_buf()));
        }

        self.roots
            .iter()
            .map(|root| root.join(&handle))
            .find(|candidate| candidate.is_file())
            .map(|found| found.canonicalize().unwrap_or(found))
    }

    fn contains_project(&self, project: &str) -> bool {
        self.projects.contains(project)
    }
}
