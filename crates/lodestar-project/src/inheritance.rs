//! Workspace task layers and the predicates that select them per project

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{ProjectDeclaration, TaskConfig, TaskOptionsConfig};

/// A condition over a set of project values (tags or toolchains).
///
/// Every operator that is set must hold. A clause with no operator never
/// matches. A plain list deserializes as `or`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "InheritedClauseRepr")]
pub struct InheritedClause {
    /// All listed values present
    pub and: Option<Vec<String>>,
    /// At least one listed value present
    pub or: Option<Vec<String>>,
    /// None of the listed values present
    pub not: Option<Vec<String>>,
}

impl InheritedClause {
    pub fn any_of(values: &[&str]) -> Self {
        Self {
            or: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn all_of(values: &[&str]) -> Self {
        Self {
            and: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn none_of(values: &[&str]) -> Self {
        Self {
            not: Some(values.iter().map(|v| v.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn matches(&self, values: &[String]) -> bool {
        if self.and.is_none() && self.or.is_none() && self.not.is_none() {
            return false;
        }

        if let Some(not) = &self.not {
            if not.iter().any(|v| values.contains(v)) {
                return false;
            }
        }

        if let Some(and) = &self.and {
            if !and.iter().all(|v| values.contains(v)) {
                return false;
            }
        }

        if let Some(or) = &self.or {
            if !or.iter().any(|v| values.contains(v)) {
                return false;
            }
        }

        true
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InheritedClauseRepr {
    One(String),
    Many(Vec<String>),
    Clause {
        #[serde(default)]
        and: Option<Vec<String>>,
        #[serde(default)]
        or: Option<Vec<String>>,
        #[serde(default)]
        not: Option<Vec<String>>,
    },
}

impl From<InheritedClauseRepr> for InheritedClause {
    fn from(repr: InheritedClauseRepr) -> Self {
        match repr {
            InheritedClauseRepr::One(value) => Self {
                or: Some(vec![value]),
                ..Default::default()
            },
            InheritedClauseRepr::Many(values) => Self {
                or: Some(values),
                ..Default::default()
            },
            InheritedClauseRepr::Clause { and, or, not } => Self { and, or, not },
        }
    }
}

/// Predicates a project must satisfy to inherit a layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InheritedBy {
    pub toolchains: Option<InheritedClause>,
    pub layers: Option<InheritedClause>,
    pub tags: Option<InheritedClause>,
}

impl InheritedBy {
    /// All predicates that are set must match
    pub fn matches(&self, project: &ProjectDeclaration) -> bool {
        if let Some(clause) = &self.toolchains {
            if !clause.matches(&project.toolchains) {
                return false;
            }
        }

        if let Some(clause) = &self.layers {
            let layers: Vec<String> = project.layer.iter().cloned().collect();
            if !clause.matches(&layers) {
                return false;
            }
        }

        if let Some(clause) = &self.tags {
            if !clause.matches(&project.tags) {
                return false;
            }
        }

        true
    }

    /// Precedence class, decided by the most specific predicate present
    pub fn precedence(&self) -> LayerPrecedence {
        if self.tags.is_some() {
            LayerPrecedence::Tag
        } else if self.layers.is_some() {
            LayerPrecedence::Layer
        } else if self.toolchains.is_some() {
            LayerPrecedence::Toolchain
        } else {
            LayerPrecedence::Workspace
        }
    }
}

/// Order in which matching layers are merged, lowest first. Project-local
/// configuration always merges last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerPrecedence {
    Workspace,
    Toolchain,
    Layer,
    Tag,
}

/// A set of tasks and defaults shared by every project it matches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InheritanceLayer {
    pub name: String,

    /// `None` applies the layer to every project
    pub inherited_by: Option<InheritedBy>,

    pub tasks: BTreeMap<String, TaskConfig>,

    /// Added to every task this layer contributes, as implicit edges
    pub implicit_deps: Vec<String>,

    /// Appended to the inputs of every task this layer contributes
    pub implicit_inputs: Vec<String>,

    /// Defaults for every task this layer contributes
    pub task_options: Option<TaskOptionsConfig>,
}

impl InheritanceLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn inherited_by(mut self, inherited_by: InheritedBy) -> Self {
        self.inherited_by = Some(inherited_by);
        self
    }

    pub fn with_task(mut self, id: impl Into<String>, task: TaskConfig) -> Self {
        self.tasks.insert(id.into(), task);
        self
    }

    pub fn with_implicit_dep(mut self, dep: impl Into<String>) -> Self {
        self.implicit_deps.push(dep.into());
        self
    }

    pub fn with_implicit_input(mut self, input: impl Into<String>) -> Self {
        self.implicit_inputs.push(input.into());
        self
    }

    pub fn with_task_options(mut self, options: TaskOptionsConfig) -> Self {
        self.task_options = Some(options);
        self
    }

    pub fn precedence(&self) -> LayerPrecedence {
        self.inherited_by
            .as_ref()
            .map(InheritedBy::precedence)
            .unwrap_or(LayerPrecedence::Workspace)
    }

    pub fn matches(&self, project: &ProjectDeclaration) -> bool {
        self.inherited_by
            .as_ref()
            .map_or(true, |by| by.matches(project))
    }
}

/// Layers matching `project`, sorted by precedence with declaration order
/// kept within a class
pub fn layers_for<'a>(
    layers: &'a [InheritanceLayer],
    project: &ProjectDeclaration,
) -> Vec<&'a InheritanceLayer> {
    let mut matched: Vec<&InheritanceLayer> =
        layers.iter().filter(|layer| layer.matches(project)).collect();
    // stable sort
    matched.sort_by_key(|layer| layer.precedence());
    matched
}
