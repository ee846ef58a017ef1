// Purpose: Model the Appfile manifest and its schema operations.
// Inputs/Outputs: Parses TOML manifests into typed values; merges imports; validates structure.
// Invariants: path/id/source are carried on the value, never read from manifest text.
// Gotchas: merge must leave imports untouched; they are consumed by the import resolver.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Name of the identity file stored next to an Appfile.
pub const ID_FILENAME: &str = ".ottoid";

/// A parsed Appfile. `path`, `id`, and `source` are set by the compiler,
/// not by manifest text, and round-trip through the compiled artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct File {
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub application: Option<Application>,
    #[serde(default)]
    pub project: Option<Project>,
    #[serde(default)]
    pub infrastructure: Vec<Infrastructure>,
    #[serde(default, rename = "import")]
    pub imports: Vec<Import>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Application {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub app_type: String,
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Import {
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Infrastructure {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub infra_type: String,
    #[serde(default)]
    pub flavor: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Project {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub infrastructure: String,
}

#[derive(Debug, Error)]
#[error("{}", .problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

// Precondition: Inputs satisfy semantic and structural invariants expected by this API.
// Postcondition: Returns a value/state transition that preserves module invariants.
// Side effects: May read/write filesystem, caches, diagnostics, globals, or process state.
pub fn parse_file(path: &Path) -> anyhow::Result<File> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut file: File =
        toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    file.path = path.to_path_buf();
    file.id = String::new();
    file.source = String::new();
    Ok(file)
}

/// Path of the identity file inside a dependency's data directory.
pub fn id_path_in(dir: &Path) -> PathBuf {
    dir.join(ID_FILENAME)
}

/// Reads the identity stored in `dir`, if any. The id is the first line of
/// the file, trimmed.
pub fn load_id_from(dir: &Path) -> anyhow::Result<Option<String>> {
    let path = id_path_in(dir);
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let id = text.lines().next().unwrap_or("").trim().to_string();
    if id.is_empty() {
        return Ok(None);
    }
    Ok(Some(id))
}

impl File {
    /// Directory containing this Appfile. Source strings in the manifest
    /// resolve relative to this.
    pub fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if parent != Path::new("") => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn has_id(&self) -> anyhow::Result<bool> {
        Ok(load_id_from(&self.dir())?.is_some())
    }

    /// Writes a fresh identity next to this Appfile. Requires a real path.
    pub fn init_id(&self) -> anyhow::Result<()> {
        if self.path.as_os_str().is_empty() {
            anyhow::bail!("cannot write an id for an Appfile without a path");
        }
        let id_path = id_path_in(&self.dir());
        fs::write(&id_path, Uuid::new_v4().to_string())
            .with_context(|| format!("write {}", id_path.display()))?;
        Ok(())
    }

    pub fn load_id(&mut self) -> anyhow::Result<()> {
        match load_id_from(&self.dir())? {
            Some(id) => {
                self.id = id;
                Ok(())
            }
            None => anyhow::bail!("no id file found in {}", self.dir().display()),
        }
    }

    /// Merges an import into this file. The other file's non-empty fields
    /// land here; `path`, `id`, `source`, and `imports` never merge.
    pub fn merge(&mut self, other: &File) -> Result<(), String> {
        if let Some(other_app) = &other.application {
            let app = self.application.get_or_insert_with(Application::default);
            if !other_app.name.is_empty() {
                app.name = other_app.name.clone();
            }
            if !other_app.app_type.is_empty() {
                app.app_type = other_app.app_type.clone();
            }
            app.dependencies.extend(other_app.dependencies.iter().cloned());
        }

        if let Some(other_project) = &other.project {
            if let Some(project) = &self.project
                && !project.name.is_empty()
                && !other_project.name.is_empty()
                && project.name != other_project.name
            {
                return Err(format!(
                    "conflicting project blocks: {} and {}",
                    project.name, other_project.name
                ));
            }
            self.project = Some(other_project.clone());
        }

        for infra in &other.infrastructure {
            match self.infrastructure.iter_mut().find(|i| i.name == infra.name) {
                Some(existing) => *existing = infra.clone(),
                None => self.infrastructure.push(infra.clone()),
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut problems = Vec::new();

        match &self.application {
            None => problems.push("an application block is required".to_string()),
            Some(app) => {
                if app.name.is_empty() {
                    problems.push("application name is required".to_string());
                }
                for dep in &app.dependencies {
                    if dep.source.is_empty() {
                        problems.push("application dependency with empty source".to_string());
                    }
                }
            }
        }

        for infra in &self.infrastructure {
            if infra.name.is_empty() {
                problems.push("infrastructure block with no name".to_string());
            }
        }

        if let Some(project) = &self.project {
            if project.name.is_empty() {
                problems.push("project name is required".to_string());
            }
            if project.infrastructure.is_empty() {
                problems.push("project infrastructure is required".to_string());
            } else if !self
                .infrastructure
                .iter()
                .any(|i| i.name == project.infrastructure)
            {
                problems.push(format!(
                    "project infrastructure {:?} is not declared",
                    project.infrastructure
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { problems })
        }
    }
}
