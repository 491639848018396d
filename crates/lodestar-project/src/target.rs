//! Task targets in `scope:task` form

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

/// What the left-hand side of a target refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetScope {
    /// A project id or alias (`app:build`)
    Project(String),
    /// Every project carrying a tag (`#frontend:build`)
    Tag(String),
    /// Project ids matching a glob (`app-*:build`)
    Glob(String),
    /// The owning project's dependencies (`^:build`)
    Deps,
    /// The owning project itself (`~:build` or `build`)
    OwnSelf,
}

/// A parsed `scope:task` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub scope: TargetScope,
    pub task_id: String,
}

impl Target {
    /// Create a fully qualified `project:task` target
    pub fn new(project: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            scope: TargetScope::Project(project.into()),
            task_id: task_id.into(),
        }
    }

    /// Format the id of a project task node
    pub fn format(project: &str, task_id: &str) -> String {
        format!("{}:{}", project, task_id)
    }

    /// Parse a target reference
    pub fn parse(value: &str) -> Result<Self, ResolveError> {
        let invalid = |reason: &str| ResolveError::InvalidTarget(value.to_string(), reason.to_string());

        let (scope, task_id) = match value.split_once(':') {
            Some((scope, task)) => (scope, task),
            None => ("~", value),
        };

        if task_id.is_empty() {
            return Err(invalid("missing task id"));
        }
        if task_id.contains(':') {
            return Err(invalid("too many ':' separators"));
        }

        let scope = match scope {
            "" | "~" => TargetScope::OwnSelf,
            "^" => TargetScope::Deps,
            s if s.starts_with('#') => {
                let tag = &s[1..];
                if tag.is_empty() {
                    return Err(invalid("missing tag name"));
                }
                TargetScope::Tag(tag.to_string())
            }
            s if s.contains(|c: char| matches!(c, '*' | '?' | '[' | '{')) => TargetScope::Glob(s.to_string()),
            s => TargetScope::Project(s.to_string()),
        };

        Ok(Self {
            scope,
            task_id: task_id.to_string(),
        })
    }

    /// Project id when the scope is a literal project
    pub fn project(&self) -> Option<&str> {
        match &self.scope {
            TargetScope::Project(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            TargetScope::Project(id) => write!(f, "{}:{}", id, self.task_id),
            TargetScope::Tag(tag) => write!(f, "#{}:{}", tag, self.task_id),
            TargetScope::Glob(glob) => write!(f, "{}:{}", glob, self.task_id),
            TargetScope::Deps => write!(f, "^:{}", self.task_id),
            TargetScope::OwnSelf => write!(f, "~:{}", self.task_id),
        }
    }
}
