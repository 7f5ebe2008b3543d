//! Workspace selection

use std::fmt;

use crate::backend::{BackendError, BackendResult};

/// Name of the workspace used when none is requested
pub const DEFAULT_WORKSPACE: &str = "default";

/// Non-fatal problems noticed while serving a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// More than one workspace name was passed; only the first is used
    ExtraWorkspacesIgnored { used: String, ignored: Vec<String> },
    /// The backend keeps one workspace per file and ignores workspace names
    WorkspacesUnsupported { requested: Vec<String> },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ExtraWorkspacesIgnored { used, ignored } => write!(
                f,
                "only one workspace name is supported, using {:?} and ignoring {:?}",
                used, ignored
            ),
            Warning::WorkspacesUnsupported { requested } => write!(
                f,
                "local backend does not support workspaces (requested {:?}); \
                 each workspace is a separate state file",
                requested
            ),
        }
    }
}

/// Pick the workspace to operate on from the names passed to a read
pub fn resolve(workspaces: &[&str]) -> (String, Option<Warning>) {
    match workspaces {
        [] => (DEFAULT_WORKSPACE.to_string(), None),
        [name] => (name.to_string(), None),
        [name, rest @ ..] => (
            name.to_string(),
            Some(Warning::ExtraWorkspacesIgnored {
                used: name.to_string(),
                ignored: rest.iter().map(|s| s.to_string()).collect(),
            }),
        ),
    }
}

/// Check that a workspace name can be used as part of an object key
pub fn validate_name(name: &str) -> BackendResult<()> {
    if name.is_empty() {
        return Err(BackendError::configuration("Workspace name must not be empty"));
    }
    if name.contains('/') {
        return Err(BackendError::configuration(format!(
            "Workspace name must not contain '/': {}",
            name
        )));
    }
    Ok(())
}
