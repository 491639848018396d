//! Workspace resolution: project declarations and inheritance layers in,
//! a validated project/task graph out.

use std::collections::{BTreeMap, BTreeSet};

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use lodestar_graph::{Graph, Node, NodeIndex, Relation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace};

use crate::builder::{BuiltTask, TasksBuilder};
use crate::config::ProjectDeclaration;
use crate::error::ResolveError;
use crate::inheritance::InheritanceLayer;
use crate::target::{Target, TargetScope};
use crate::task::{Task, TaskDependency};

/// A project dependency after id/alias/tag resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDependency {
    pub id: String,
    pub relation: Relation,
}

/// A resolved project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub alias: Option<String>,
    pub source: String,
    pub tags: Vec<String>,
    pub toolchains: Vec<String>,
    pub layer: Option<String>,
    /// In declaration order
    pub dependencies: Vec<ProjectDependency>,
    /// Targets of the project's tasks
    pub tasks: Vec<String>,
}

impl Project {
    fn from_declaration(decl: &ProjectDeclaration) -> Self {
        Self {
            id: decl.id.clone(),
            alias: decl.alias.clone(),
            source: decl.source().to_string(),
            tags: decl.tags.clone(),
            toolchains: decl.toolchains.clone(),
            layer: decl.layer.clone(),
            dependencies: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.tasks.contains(&Target::format(&self.id, task_id))
    }
}

/// Turns declarations into a [`ResolvedWorkspace`]
pub struct WorkspaceResolver {
    projects: Vec<ProjectDeclaration>,
    layers: Vec<InheritanceLayer>,
}

impl WorkspaceResolver {
    pub fn new(projects: Vec<ProjectDeclaration>, layers: Vec<InheritanceLayer>) -> Self {
        Self { projects, layers }
    }

    /// Build the graph. Fails on the first configuration error; nothing is
    /// partially returned.
    #[instrument(skip_all, fields(projects = self.projects.len(), layers = self.layers.len()))]
    pub fn resolve(&self) -> Result<ResolvedWorkspace, ResolveError> {
        let mut workspace = ResolvedWorkspace::default();

        for decl in &self.projects {
            workspace.graph.add_node(Node::project(&decl.id))?;
            workspace.projects.insert(decl.id.clone(), Project::from_declaration(decl));
        }
        workspace.aliases = collect_aliases(&self.projects)?;

        for decl in &self.projects {
            let deps = workspace.resolve_project_deps(decl)?;
            for dep in &deps {
                workspace.graph.add_edge(&decl.id, &dep.id, dep.relation)?;
            }
            if let Some(project) = workspace.projects.get_mut(&decl.id) {
                project.dependencies = deps;
            }
        }

        let mut built: Vec<BuiltTask> = Vec::new();
        for decl in &self.projects {
            let tasks = TasksBuilder::new(decl)
                .inherit_layers(&self.layers)
                .local_tasks()
                .build()?;

            for (_, task) in tasks {
                let target = task.task.target.clone();
                let mut node = Node::task(&target);
                node.metadata = task.task.metadata();

                workspace.graph.add_node(node)?;
                workspace.graph.add_edge(&target, &decl.id, Relation::Implicit)?;
                if let Some(project) = workspace.projects.get_mut(&decl.id) {
                    project.tasks.push(target);
                }
                built.push(task);
            }
        }

        for task in &built {
            workspace.link_task(task)?;
        }

        for BuiltTask { mut task, .. } in built {
            task.deps = workspace.task_dependencies(&task.target);
            workspace.tasks.insert(task.target.clone(), task);
        }

        info!(
            projects = workspace.projects.len(),
            tasks = workspace.tasks.len(),
            edges = workspace.graph.edges().len(),
            "workspace resolved"
        );

        Ok(workspace)
    }
}

fn collect_aliases(projects: &[ProjectDeclaration]) -> Result<BTreeMap<String, String>, ResolveError> {
    let mut aliases: BTreeMap<String, String> = BTreeMap::new();

    for decl in projects {
        let Some(alias) = decl.alias.as_ref().filter(|alias| **alias != decl.id) else {
            continue;
        };

        let conflict = projects
            .iter()
            .find(|other| other.id == *alias)
            .map(|other| other.id.clone())
            .or_else(|| aliases.get(alias).cloned());

        if let Some(existing) = conflict {
            return Err(ResolveError::DuplicateAlias {
                alias: alias.clone(),
                project: decl.id.clone(),
                existing,
            });
        }

        aliases.insert(alias.clone(), decl.id.clone());
    }

    Ok(aliases)
}

/// The resolved project/task graph.
///
/// Read-only once built: the scheduler and hasher only query it.
#[derive(Debug, Clone, Default)]
pub struct ResolvedWorkspace {
    graph: Graph,
    projects: BTreeMap<String, Project>,
    aliases: BTreeMap<String, String>,
    tasks: BTreeMap<String, Task>,
}

impl ResolvedWorkspace {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Look up a project by id or alias
    pub fn project(&self, id_or_alias: &str) -> Option<&Project> {
        self.projects
            .get(id_or_alias)
            .or_else(|| self.aliases.get(id_or_alias).and_then(|id| self.projects.get(id)))
    }

    pub fn projects(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    /// Look up a task by its `project:task` target
    pub fn task(&self, target: &str) -> Option<&Task> {
        self.tasks.get(target)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Node indices for run targets such as `app:build`, `#tag:lint`,
    /// `web-*:test` or `:build` (every project with a `build` task).
    pub fn expand_targets<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<NodeIndex>, ResolveError> {
        let mut indices = Vec::new();

        for raw in targets {
            let raw = raw.as_ref();
            let target = Target::parse(raw)?;
            let projects: Vec<String> = match &target.scope {
                TargetScope::Deps => {
                    return Err(ResolveError::InvalidTarget(
                        raw.to_string(),
                        "'^' is only valid in task dependencies".into(),
                    ))
                }
                TargetScope::OwnSelf => self.projects.keys().cloned().collect(),
                scope => self.projects_in_scope(scope, None)?,
            };

            let matched: Vec<NodeIndex> = projects
                .iter()
                .map(|project| Target::format(project, &target.task_id))
                .filter(|id| self.tasks.contains_key(id))
                .filter_map(|id| self.graph.index_of(&id))
                .collect();

            if matched.is_empty() {
                return Err(ResolveError::InvalidTarget(
                    raw.to_string(),
                    "matches no tasks".into(),
                ));
            }

            for idx in matched {
                if !indices.contains(&idx) {
                    indices.push(idx);
                }
            }
        }

        Ok(indices)
    }

    /// Induced graph around one target: its dependency closure, optionally
    /// with its direct dependents
    pub fn focus(&self, target: &str, include_dependents: bool) -> Option<Graph> {
        let idx = self.graph.index_of(target)?;
        Some(self.graph.subgraph(idx, include_dependents))
    }

    /// Targets whose inputs match a touched file, plus every task that
    /// transitively depends on them. Paths are workspace relative.
    #[instrument(skip_all, fields(touched = touched_files.len()))]
    pub fn affected_by<S: AsRef<str>>(&self, touched_files: &[S]) -> Result<BTreeSet<String>, ResolveError> {
        let files: Vec<String> = touched_files
            .iter()
            .map(|file| normalize_path(file.as_ref()))
            .collect();
        let mut affected = BTreeSet::new();

        for task in self.tasks.values() {
            let globs = build_globset(&task.input_globs())?;
            if !files.iter().any(|file| globs.is_match(file)) {
                continue;
            }

            trace!(target = %task.target, "task affected by touched files");
            affected.insert(task.target.clone());

            if let Some(idx) = self.graph.index_of(&task.target) {
                for dependent in self.graph.dependents_of(idx, true) {
                    if let Some(node) = self.graph.node(dependent).filter(|node| node.is_task()) {
                        affected.insert(node.id.clone());
                    }
                }
            }
        }

        debug!(count = affected.len(), "computed affected targets");
        Ok(affected)
    }

    fn resolve_project_deps(&self, decl: &ProjectDeclaration) -> Result<Vec<ProjectDependency>, ResolveError> {
        let mut deps: Vec<ProjectDependency> = Vec::new();

        for dep in &decl.depends_on {
            let relation = if dep.optional {
                Relation::Optional
            } else {
                Relation::Required
            };

            let ids: Vec<String> = match dep.target.strip_prefix('#') {
                Some(tag) => self
                    .projects
                    .values()
                    .filter(|project| project.id != decl.id && project.tags.iter().any(|t| t == tag))
                    .map(|project| project.id.clone())
                    .collect(),
                None => self
                    .project(&dep.target)
                    .map(|project| vec![project.id.clone()])
                    .unwrap_or_default(),
            };

            if ids.is_empty() && !(dep.optional && dep.target.starts_with('#')) {
                return Err(ResolveError::UnknownDependency {
                    dependent: decl.id.clone(),
                    token: dep.target.clone(),
                });
            }

            for id in ids {
                match deps.iter_mut().find(|existing| existing.id == id) {
                    Some(existing) if relation.is_required() => existing.relation = relation,
                    Some(_) => {}
                    None => deps.push(ProjectDependency { id, relation }),
                }
            }
        }

        Ok(deps)
    }

    /// Project ids a scope refers to. `owner` is required for `~` and `^`.
    fn projects_in_scope(&self, scope: &TargetScope, owner: Option<&str>) -> Result<Vec<String>, ResolveError> {
        let ids = match scope {
            TargetScope::Project(name) => self
                .project(name)
                .map(|project| vec![project.id.clone()])
                .unwrap_or_default(),
            TargetScope::OwnSelf => owner.map(|id| vec![id.to_string()]).unwrap_or_default(),
            TargetScope::Deps => owner
                .and_then(|id| self.projects.get(id))
                .map(|project| project.dependencies.iter().map(|dep| dep.id.clone()).collect())
                .unwrap_or_default(),
            TargetScope::Tag(tag) => self
                .projects
                .values()
                .filter(|project| project.tags.contains(tag))
                .map(|project| project.id.clone())
                .collect(),
            TargetScope::Glob(pattern) => {
                let matcher = compile_glob(pattern)?;
                self.projects
                    .keys()
                    .filter(|id| matcher.is_match(id.as_str()))
                    .cloned()
                    .collect()
            }
        };
        Ok(ids)
    }

    /// Task targets a dependency reference expands to, excluding `own`
    /// for fan-out scopes
    fn expand_dependency(&self, own: &Task, target: &Target) -> Result<Vec<String>, ResolveError> {
        let fan_out = matches!(
            target.scope,
            TargetScope::Tag(_) | TargetScope::Glob(_) | TargetScope::Deps
        );

        let targets = self
            .projects_in_scope(&target.scope, Some(&own.project))?
            .into_iter()
            .map(|project| Target::format(&project, &target.task_id))
            .filter(|id| self.graph.get(id).is_some_and(Node::is_task))
            .filter(|id| !(fan_out && *id == own.target))
            .collect();

        Ok(targets)
    }

    fn link_task(&mut self, built: &BuiltTask) -> Result<(), ResolveError> {
        let task = &built.task;

        for dep in &built.deps {
            let target = Target::parse(&dep.target)?;
            let matched = self.expand_dependency(task, &target)?;

            if matched.is_empty() {
                let tolerated = match target.scope {
                    TargetScope::Deps => true,
                    TargetScope::Tag(_) | TargetScope::Glob(_) => dep.optional,
                    TargetScope::Project(_) | TargetScope::OwnSelf => false,
                };
                if !tolerated {
                    return Err(ResolveError::UnknownDependency {
                        dependent: task.target.clone(),
                        token: dep.target.clone(),
                    });
                }
                trace!(target = %task.target, dep = %dep.target, "dependency matched nothing");
            }

            let relation = if dep.optional {
                Relation::Optional
            } else {
                Relation::Required
            };
            for id in matched {
                self.graph.add_edge(&task.target, &id, relation)?;
            }
        }

        for dep in &built.implicit_deps {
            let target = Target::parse(dep)?;
            let matched: Vec<String> = self
                .expand_dependency(task, &target)?
                .into_iter()
                .filter(|id| *id != task.target)
                .collect();

            if matched.is_empty() {
                trace!(target = %task.target, dep = %dep, "implicit dependency skipped");
            }
            for id in matched {
                self.graph.add_edge(&task.target, &id, Relation::Implicit)?;
            }
        }

        Ok(())
    }

    /// Task edges of a node, with relations as they ended up in the graph
    fn task_dependencies(&self, target: &str) -> Vec<TaskDependency> {
        let Some(idx) = self.graph.index_of(target) else {
            return Vec::new();
        };

        self.graph
            .edges_from(idx)
            .filter_map(|edge| {
                let node = self.graph.node(edge.target)?;
                node.is_task()
                    .then(|| TaskDependency::new(node.id.clone(), edge.relation))
            })
            .collect()
    }
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, ResolveError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| ResolveError::InvalidGlob {
            glob: pattern.to_string(),
            message: e.to_string(),
        })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ResolveError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ResolveError::InvalidGlob {
                glob: pattern.clone(),
                message: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ResolveError::InvalidGlob {
        glob: patterns.join(", "),
        message: e.to_string(),
    })
}

fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.strip_prefix("./").map(str::to_string).unwrap_or(path)
}
