// Purpose: Define the compiler error kinds and the multi-error aggregation form.
// Inputs/Outputs: Wraps collaborator failures (parse, fetch, loader) with their subject key.
// Invariants: Every failure a caller may branch on gets its own variant.
// Gotchas: Identity/Version messages are part of the user-facing contract; keep them stable.

use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("error parsing Appfile in {}: {err}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        err: anyhow::Error,
    },

    #[error("error resolving source {source_str:?}: {reason}")]
    Resolve { source_str: String, reason: String },

    #[error("error fetching {key}: {err}")]
    Fetch {
        key: String,
        #[source]
        err: anyhow::Error,
    },

    #[error("cycle found: {}", .vertices.join(", "))]
    Cycle { vertices: Vec<String> },

    #[error("{}{err}", prefix(.dependency))]
    Validation {
        dependency: Option<String>,
        #[source]
        err: crate::appfile::ValidationError,
    },

    #[error(
        "dependency '{key}' does not have an id yet\n\n\
         An id is generated on the first compilation of an Appfile. It is a\n\
         globally unique value used to track the application across deploys\n\
         and is required for the application to be used as a dependency. To\n\
         fix this, check out that application and run `appc compile` once.\n\
         Make sure the .ottoid file is committed into version control, and\n\
         then try this command again."
    )]
    Identity { key: String },

    #[error(
        "the compiled Appfile in this directory was produced by a newer\n\
         version of this tool (format {found}) and cannot be loaded.\n\
         Recompile it with `appc compile`."
    )]
    Version { found: u64 },

    #[error("error merging import {key}: {reason}")]
    Merge { key: String, reason: String },

    #[error("error loading Appfile in {key}: {err}")]
    Loader {
        key: String,
        #[source]
        err: anyhow::Error,
    },

    #[error("{context}: {err}")]
    Io {
        context: String,
        #[source]
        err: anyhow::Error,
    },

    #[error("{}", render_many(.0))]
    Many(Vec<CompileError>),
}

impl CompileError {
    pub fn io(context: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        CompileError::Io {
            context: context.into(),
            err: err.into(),
        }
    }

    /// Collapses an accumulator into a result: empty means success, one
    /// error passes through unchanged, more become `Many`.
    pub fn aggregate(mut errors: Vec<CompileError>) -> Result<(), CompileError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CompileError::Many(errors)),
        }
    }
}

fn prefix(dependency: &Option<String>) -> String {
    match dependency {
        Some(source) => format!("Dependency {source}: "),
        None => String::new(),
    }
}

fn render_many(errors: &[CompileError]) -> String {
    let mut out = format!("{} errors occurred:", errors.len());
    for err in errors {
        write!(out, "\n* {err}").ok();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::CompileError;

    #[test]
    fn aggregate_empty_is_ok() {
        assert!(CompileError::aggregate(vec![]).is_ok());
    }

    #[test]
    fn aggregate_single_passes_through() {
        let err = CompileError::aggregate(vec![CompileError::Identity {
            key: "file:///tmp/dep".into(),
        }])
        .unwrap_err();
        assert!(matches!(err, CompileError::Identity { .. }));
    }

    #[test]
    fn aggregate_many_lists_each_error() {
        let err = CompileError::aggregate(vec![
            CompileError::Resolve {
                source_str: "???".into(),
                reason: "unknown scheme".into(),
            },
            CompileError::Cycle {
                vertices: vec!["a".into(), "b".into()],
            },
        ])
        .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("2 errors occurred:"));
        assert!(text.contains("unknown scheme"));
        assert!(text.contains("cycle found: a, b"));
    }
}
