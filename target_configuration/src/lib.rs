//! Debug target descriptions, read from a JSON (with comments) file.

use std::path::{Path, PathBuf};

pub use breakpoints::DEFAULT_MODEL_ID;
use breakpoints::{locator::SourceDirectories, ManagerConfig, TargetInfo};
use eyre::Context;
use serde::Deserialize;

#[derive(Deserialize)]
struct ConfigFile {
    // TODO: reject versions newer than the ones we understand
    #[serde(rename = "version")]
    _version: String,
    targets: Vec<TargetConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfiguration {
    pub name: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    pub project: Option<String>,
    #[serde(default)]
    pub referenced_projects: Vec<String>,
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub source_roots: Vec<PathBuf>,
    pub breakpoints_file: Option<PathBuf>,
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

impl TargetConfiguration {
    pub fn target_info(&self, id: impl Into<String>) -> TargetInfo {
        TargetInfo {
            project: self.project.clone(),
            referenced_projects: self.referenced_projects.clone(),
            executable: self.executable.clone(),
            ..TargetInfo::new(id)
        }
    }

    pub fn source_locator(&self) -> SourceDirectories {
        SourceDirectories::new(self.source_roots.iter().cloned()).with_projects(
            self.project
                .iter()
                .chain(self.referenced_projects.iter())
                .cloned(),
        )
    }

    pub fn manager_config(&self, id: impl Into<String>) -> ManagerConfig {
        ManagerConfig {
            model_id: self.model_id.clone(),
            target: self.target_info(id),
        }
    }

    // relative paths are relative to the configuration file
    fn resolve_paths(mut self, base: &Path) -> Self {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.executable.iter_mut().for_each(resolve);
        self.source_roots.iter_mut().for_each(resolve);
        self.breakpoints_file.iter_mut().for_each(resolve);
        self
    }
}

pub fn load(
    name: impl AsRef<str>,
    mut r: impl std::io::Read,
) -> eyre::Result<Option<TargetConfiguration>> {
    let mut contents = String::new();
    r.read_to_string(&mut contents)
        .wrap_err("reading configuration contents")?;
    let configuration = from_str(name, &contents).wrap_err("parsing target configuration")?;
    Ok(configuration)
}

fn from_str(name: impl AsRef<str>, contents: &str) -> eyre::Result<Option<TargetConfiguration>> {
    let config = jsonc_to_serde(contents).wrap_err("parsing jsonc configuration")?;
    let name = name.as_ref();
    Ok(config
        .targets
        .into_iter()
        .find(|target| target.name == name))
}

fn jsonc_to_serde(input: &str) -> eyre::Result<ConfigFile> {
    let value = jsonc_parser::parse_to_serde_value(input, &Default::default())
        .wrap_err("parsing jsonc configuration")?;
    let Some(config_value) = value else {
        eyre::bail!("no configuration found");
    };
    let config = serde_json::from_value(config_value)
        .wrap_err("deserializing serde_json::Value value")?;
    Ok(config)
}

pub fn load_from_path(
    name: impl AsRef<str>,
    path: impl AsRef<Path>,
) -> eyre::Result<Option<TargetConfiguration>> {
    let path = path.as_ref();
    let f = std::fs::File::open(path)
        .wrap_err_with(|| format!("opening configuration {}", path.display()))?;
    let config = crate::load(name, f).context("loading file from given path")?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(config.map(|config| config.resolve_paths(base)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn defaults() {
        let input = r#"{ "version": "1", "targets": [ { "name": "bare" } ] }"#;
        let config = load("bare", Cursor::new(input)).unwrap().unwrap();
        assert_eq!(config.model_id, "cdi");
        assert_eq!(config.manager_config("t1").model_id, DEFAULT_MODEL_ID);
        assert!(config.source_roots.is_empty());
        assert!(config.project.is_none());
    }

    #[test]
    fn unknown_target() {
        let input = r#"{ "version": "1", "targets": [] }"#;
        assert!(load("missing", Cursor::new(input)).unwrap().is_none());
    }

    #[test]
    fn empty_document() {
        assert!(load("any", Cursor::new("// nothing here\n")).is_err());
    }
}
