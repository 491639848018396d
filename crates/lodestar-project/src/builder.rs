//! Per-project task building: folds every matching inheritance layer and the
//! project's own task configs into resolved [`Task`]s.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::config::{DependencyConfig, ProjectDeclaration, TaskConfig, TaskOptionsConfig};
use crate::error::ResolveError;
use crate::inheritance::{layers_for, InheritanceLayer};
use crate::merge::MergeStrategy;
use crate::target::Target;
use crate::task::{Task, TaskKind, TaskOptions};

/// Inputs used when no layer declares any
const DEFAULT_INPUTS: &str = "**/*";

/// One entry in a task's inheritance chain
struct ChainLink<'a> {
    /// `None` for the project's own config
    layer: Option<&'a str>,
    config: &'a TaskConfig,
    defaults: Option<&'a TaskOptionsConfig>,
}

/// A task with its dependency references still unresolved
#[derive(Debug, Clone)]
pub struct BuiltTask {
    pub task: Task,
    /// Declared `deps`, as written
    pub deps: Vec<DependencyConfig>,
    /// Dependencies added by inheritance layers
    pub implicit_deps: Vec<String>,
}

/// Collects the inheritance chain for every task of one project
pub struct TasksBuilder<'a> {
    project: &'a ProjectDeclaration,
    chains: BTreeMap<String, Vec<ChainLink<'a>>>,
    implicit_deps: Vec<String>,
    implicit_inputs: Vec<String>,
}

impl<'a> TasksBuilder<'a> {
    pub fn new(project: &'a ProjectDeclaration) -> Self {
        Self {
            project,
            chains: BTreeMap::new(),
            implicit_deps: Vec::new(),
            implicit_inputs: Vec::new(),
        }
    }

    /// Add every layer that matches the project, lowest precedence first
    pub fn inherit_layers(&mut self, layers: &'a [InheritanceLayer]) -> &mut Self {
        let project = self.project;
        let filter = &project.inherited_tasks;

        for layer in layers_for(layers, project) {
            trace!(project = %project.id, layer = %layer.name, "inheriting layer");

            for (task_id, config) in &layer.tasks {
                if let Some(include) = &filter.include {
                    if !include.contains(task_id) {
                        continue;
                    }
                }
                if filter.exclude.contains(task_id) {
                    continue;
                }

                let local_id = filter.rename.get(task_id).unwrap_or(task_id);
                self.chains.entry(local_id.clone()).or_default().push(ChainLink {
                    layer: Some(layer.name.as_str()),
                    config,
                    defaults: layer.task_options.as_ref(),
                });
            }

            extend_unique(&mut self.implicit_deps, &layer.implicit_deps);
            extend_unique(&mut self.implicit_inputs, &layer.implicit_inputs);
        }

        self
    }

    /// Add the project's own task configs, which merge last
    pub fn local_tasks(&mut self) -> &mut Self {
        let project = self.project;
        for (task_id, config) in &project.tasks {
            self.chains.entry(task_id.clone()).or_default().push(ChainLink {
                layer: None,
                config,
                defaults: None,
            });
        }
        self
    }

    /// Merge every chain into a task
    pub fn build(&self) -> Result<BTreeMap<String, BuiltTask>, ResolveError> {
        let mut tasks = BTreeMap::new();

        for (task_id, chain) in &self.chains {
            let built = self.build_task(task_id, chain)?;
            debug!(
                target = %built.task.target,
                layers = built.task.inherited_from.len(),
                "built task"
            );
            tasks.insert(task_id.clone(), built);
        }

        Ok(tasks)
    }

    fn build_task(&self, task_id: &str, chain: &[ChainLink<'_>]) -> Result<BuiltTask, ResolveError> {
        let options = fold_options(chain);
        let strategy = |specific: Option<MergeStrategy>| specific.or(options.merge).unwrap_or_default();

        let mut command: Option<&str> = None;
        let mut script: Option<&str> = None;
        // `None` until some link in the chain defines the field
        let mut args: Option<Vec<String>> = None;
        let mut deps: Option<Vec<DependencyConfig>> = None;
        let mut env: Option<BTreeMap<String, String>> = None;
        let mut inputs: Option<Vec<String>> = None;
        let mut outputs: Option<Vec<String>> = None;
        let mut inherited_from = Vec::new();

        for link in chain {
            let config = link.config;

            if let Some(layer) = link.layer {
                inherited_from.push(layer.to_string());
            }
            if config.command.is_some() {
                command = config.command.as_deref();
            }
            if config.script.is_some() {
                script = config.script.as_deref();
            }
            if let Some(next) = &config.args {
                args = Some(strategy(options.merge_args).merge_vec(args.take(), next.clone()));
            }
            if let Some(next) = &config.deps {
                deps = Some(strategy(options.merge_deps).merge_vec(deps.take(), next.clone()));
            }
            if let Some(next) = &config.env {
                env = Some(strategy(options.merge_env).merge_map(env.take(), next.clone()));
            }
            if let Some(next) = &config.inputs {
                inputs = Some(strategy(options.merge_inputs).merge_vec(inputs.take(), next.clone()));
            }
            if let Some(next) = &config.outputs {
                outputs = Some(strategy(options.merge_outputs).merge_vec(outputs.take(), next.clone()));
            }
        }
        let args = args.unwrap_or_default();

        let mut inputs = inputs.unwrap_or_else(|| vec![DEFAULT_INPUTS.to_string()]);
        extend_unique(&mut inputs, &self.implicit_inputs);

        let mut task = Task::new(&self.project.id, task_id, TaskKind::from_parts(command, script, &args));
        task.project_root = self.project.source().to_string();
        task.env = env.unwrap_or_default();
        task.outputs = outputs.unwrap_or_default();
        task.inherited_from = inherited_from;
        task.options = TaskOptions {
            retry_count: options.retry_count,
            run_in_ci: options.run_in_ci.unwrap_or(true),
            fail_fast: options.fail_fast.unwrap_or(false),
            cache: options.cache.unwrap_or(true),
            timeout: options.timeout,
        };
        self.expand_inputs(&mut task, inputs)?;

        Ok(BuiltTask {
            task,
            deps: deps.unwrap_or_default(),
            implicit_deps: self.implicit_deps.clone(),
        })
    }

    /// Split input tokens into globs and env vars, expanding file groups
    fn expand_inputs(&self, task: &mut Task, inputs: Vec<String>) -> Result<(), ResolveError> {
        for input in inputs {
            if let Some(var) = input.strip_prefix('$') {
                push_unique(&mut task.input_env, var.to_string());
            } else if let Some(group) = file_group_name(&input) {
                let globs = self.project.file_groups.get(group).ok_or_else(|| {
                    ResolveError::UnknownFileGroup {
                        target: Target::format(&task.project, &task.id),
                        group: group.to_string(),
                    }
                })?;
                for glob in globs {
                    push_unique(&mut task.inputs, glob.clone());
                }
            } else {
                push_unique(&mut task.inputs, input);
            }
        }
        Ok(())
    }
}

/// Fold options along the chain: layer defaults first, then each config's
/// own options, later values overriding earlier ones
fn fold_options(chain: &[ChainLink<'_>]) -> TaskOptionsConfig {
    let mut folded = TaskOptionsConfig::default();

    for link in chain {
        if let Some(defaults) = link.defaults {
            overlay(&mut folded, defaults);
        }
        overlay(&mut folded, &link.config.options);
    }

    folded
}

fn overlay(base: &mut TaskOptionsConfig, next: &TaskOptionsConfig) {
    macro_rules! take {
        ($($field:ident),*) => {
            $(if next.$field.is_some() {
                base.$field = next.$field;
            })*
        };
    }

    take!(
        merge,
        merge_args,
        merge_deps,
        merge_env,
        merge_inputs,
        merge_outputs,
        retry_count,
        run_in_ci,
        fail_fast,
        cache,
        timeout
    );
}

/// `@group(name)` -> `name`
fn file_group_name(input: &str) -> Option<&str> {
    input
        .strip_prefix("@group(")
        .and_then(|rest| rest.strip_suffix(')'))
        .map(str::trim)
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

fn extend_unique(list: &mut Vec<String>, items: &[String]) {
    for item in items {
        push_unique(list, item.clone());
    }
}
