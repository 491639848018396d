//! Concurrent action pipeline
//!
//! Walks the dependency closure of the requested targets in topological
//! order. A node becomes ready once every dependency in the closure is
//! terminal; ready nodes are dispatched lowest index first to a bounded set
//! of workers. Each worker fingerprints its task, resolves it through the
//! artifact cache and records every attempt on the node's [`Action`].
//!
//! A failed node never aborts the run by itself: its required dependents are
//! skipped and independent branches keep going. Only fail-fast failures and
//! operator cancellation halt the remaining work.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lodestar_core::config::validate_config;
use lodestar_core::{PipelineConfig, RunContext};
use lodestar_graph::NodeIndex;
use lodestar_project::{ResolvedWorkspace, Task};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::action::{Action, ActionStatus, Attempt};
use crate::cache::{ArtifactCache, CacheEntry};
use crate::error::{PipelineError, RunError};
use crate::hasher::{compute_fingerprint, FileDigestProvider, Fingerprint, FsDigestProvider};
use crate::manifest::HashStore;
use crate::report::{RunReport, RunSummary};
use crate::reporter::{PipelineEvent, TaskReporter, TracingReporter};
use crate::runner::{CommandOutput, TaskRunner};

/// Executes resolved workspaces
pub struct Pipeline {
    workspace: Arc<ResolvedWorkspace>,
    config: PipelineConfig,
    context: RunContext,
    reporter: Arc<dyn TaskReporter>,
    provider: Option<Arc<dyn FileDigestProvider>>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(workspace: Arc<ResolvedWorkspace>, config: PipelineConfig, context: RunContext) -> Self {
        Self {
            workspace,
            config,
            context,
            reporter: Arc::new(TracingReporter),
            provider: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the filesystem digest provider used for fingerprints
    pub fn with_digest_provider(mut self, provider: Arc<dyn FileDigestProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Token that stops the run when cancelled. Running processes are
    /// killed and a partial report is still returned.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `targets` and everything they depend on.
    ///
    /// Errors only for problems found before anything executes; task
    /// failures are reported through the returned [`RunReport`].
    #[instrument(skip_all, fields(targets = targets.len()))]
    pub async fn run<S: AsRef<str>>(&self, targets: &[S]) -> Result<RunReport, PipelineError> {
        validate_config(&self.config)?;
        let lifetime = self.config.cache.lifetime()?;

        let roots = self.workspace.expand_targets(targets)?;
        let graph = self.workspace.graph();
        let scope = graph.closure_of(&roots);
        let order: Vec<NodeIndex> = graph
            .topo_order()
            .into_iter()
            .filter(|idx| scope.contains(idx))
            .collect();

        let mut context = self.context.clone();
        if context.primary_targets.is_empty() {
            context.primary_targets = roots
                .iter()
                .filter_map(|idx| graph.node(*idx))
                .map(|node| node.id.clone())
                .collect();
        }
        let context = Arc::new(context);

        let (cache, store) = if self.config.cache.enabled {
            let dir = context.workspace_root.join(&self.config.cache.dir);
            (
                Some(Arc::new(ArtifactCache::new(dir.join("outputs"), lifetime))),
                Some(HashStore::new(dir.join("hashes"))),
            )
        } else {
            (None, None)
        };

        let provider = self.provider.clone().unwrap_or_else(|| {
            Arc::new(FsDigestProvider::new(
                &context.workspace_root,
                self.config.hasher.optimization,
            )) as Arc<dyn FileDigestProvider>
        });

        let worker = Arc::new(Worker {
            config: self.config.clone(),
            context: context.clone(),
            reporter: self.reporter.clone(),
            runner: TaskRunner::new(context.clone(), self.reporter.clone()),
            cache,
            store,
            provider,
            cancel: self.cancel.clone(),
        });

        info!(actions = order.len(), concurrency = self.config.concurrency, "starting pipeline");
        self.reporter.report(&PipelineEvent::RunStarted {
            actions: order.len(),
            targets: context.primary_targets.clone(),
        });

        let started = Instant::now();
        let mut schedule = Schedule::new(&self.workspace, &scope, &order, self.reporter.clone());
        let abort = self.cancel.child_token();
        let mut workers: JoinSet<(NodeIndex, Result<Outcome, JoinError>)> = JoinSet::new();
        let mut halted: Option<&'static str> = None;

        loop {
            if halted.is_none() && self.cancel.is_cancelled() {
                halted = Some("cancelled");
            }
            if halted.is_some() {
                schedule.ready.clear();
            }

            while workers.len() < self.config.concurrency {
                let Some(Reverse(idx)) = schedule.ready.pop() else {
                    break;
                };

                match schedule.prepare(idx, &self.config, &context) {
                    Prepared::Done(action) => schedule.settle(idx, action, None),
                    Prepared::Run {
                        task,
                        action,
                        dep_hashes,
                    } => {
                        let worker = worker.clone();
                        let token = abort.clone();
                        workers.spawn(async move {
                            let handle = tokio::spawn(async move {
                                worker.run(task, action, dep_hashes, token).await
                            });
                            (idx, handle.await)
                        });
                    }
                }
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = workers.join_next() => {
                    let (idx, result) = match joined {
                        Ok(joined) => joined,
                        Err(e) => {
                            error!(error = %e, "worker task failed to join");
                            continue;
                        }
                    };

                    let outcome = match result {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            let mut action = schedule.action(idx);
                            action.fail(ActionStatus::Failed, Duration::ZERO, format!("panicked: {}", e));
                            Outcome { action, hash: None }
                        }
                    };

                    if outcome.action.status == ActionStatus::FailedAndAbort && halted.is_none() {
                        warn!(label = %outcome.action.label, "fail-fast task failed, aborting run");
                        abort.cancel();
                        halted = Some("aborted");
                    }
                    schedule.settle(idx, outcome.action, outcome.hash);
                }
                _ = self.cancel.cancelled(), if halted.is_none() => {
                    info!("cancellation requested, stopping workers");
                    halted = Some("cancelled");
                }
                else => break,
            }
        }

        let reason = halted.unwrap_or("not reached");
        for action in schedule.actions.values_mut() {
            if !action.is_terminal() {
                action.skip(reason);
                self.reporter.report(&PipelineEvent::ActionSkipped {
                    label: action.label.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        let actions: Vec<Action> = order
            .iter()
            .filter_map(|idx| schedule.actions.remove(idx))
            .collect();
        let cancelled = self.cancel.is_cancelled();
        let report = RunReport::new(actions, (*context).clone(), started.elapsed(), graph, cancelled);

        self.reporter.report(&PipelineEvent::RunFinished {
            summary: report.summary.clone(),
            duration: report.duration,
            cancelled,
        });
        log_summary(&report.summary, cancelled);

        Ok(report)
    }
}

fn log_summary(summary: &RunSummary, cancelled: bool) {
    info!(
        total = summary.total,
        passed = summary.passed,
        cached = summary.cached,
        failed = summary.failed,
        invalid = summary.invalid,
        skipped = summary.skipped,
        cancelled,
        "pipeline finished"
    );
}

enum Prepared {
    /// Reached a terminal status without a worker
    Done(Action),
    Run {
        task: Task,
        action: Action,
        dep_hashes: BTreeMap<String, String>,
    },
}

/// Scheduler bookkeeping, owned by the run loop
struct Schedule<'a> {
    workspace: &'a ResolvedWorkspace,
    scope: &'a BTreeSet<NodeIndex>,
    reporter: Arc<dyn TaskReporter>,
    actions: BTreeMap<NodeIndex, Action>,
    /// Dependencies in scope that are not terminal yet
    waiting_on: HashMap<NodeIndex, usize>,
    /// Nodes whose failure blocks required dependents
    blocked: HashSet<NodeIndex>,
    /// Nodes with at least one blocked required dependency
    poisoned: HashSet<NodeIndex>,
    ready: BinaryHeap<Reverse<NodeIndex>>,
    /// Fingerprints by target, for dependents' hashes
    hashes: BTreeMap<String, String>,
}

impl<'a> Schedule<'a> {
    fn new(
        workspace: &'a ResolvedWorkspace,
        scope: &'a BTreeSet<NodeIndex>,
        order: &[NodeIndex],
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        let graph = workspace.graph();
        let mut actions = BTreeMap::new();
        let mut waiting_on = HashMap::new();
        let mut ready = BinaryHeap::new();

        for &idx in order {
            let label = graph
                .node(idx)
                .map(|node| node.label.clone())
                .unwrap_or_else(|| idx.to_string());
            actions.insert(idx, Action::new(idx, label));

            let deps = graph
                .edges_from(idx)
                .filter(|edge| scope.contains(&edge.target))
                .count();
            if deps == 0 {
                ready.push(Reverse(idx));
            }
            waiting_on.insert(idx, deps);
        }

        Self {
            workspace,
            scope,
            reporter,
            actions,
            waiting_on,
            blocked: HashSet::new(),
            poisoned: HashSet::new(),
            ready,
            hashes: BTreeMap::new(),
        }
    }

    /// Current record for a node
    fn action(&self, idx: NodeIndex) -> Action {
        self.actions
            .get(&idx)
            .cloned()
            .unwrap_or_else(|| Action::new(idx, idx.to_string()))
    }

    fn prepare(&mut self, idx: NodeIndex, config: &PipelineConfig, context: &RunContext) -> Prepared {
        let mut action = self.action(idx);

        if config.dry_run {
            action.skip("dry run");
            return Prepared::Done(action);
        }

        let workspace = self.workspace;
        let task = workspace
            .graph()
            .node(idx)
            .filter(|node| node.is_task())
            .and_then(|node| workspace.task(&node.id));

        let Some(task) = task else {
            // Project nodes only sync
            action.start();
            action.finish(ActionStatus::Passed, Duration::ZERO);
            return Prepared::Done(action);
        };

        if context.ci && !task.options.run_in_ci {
            action.skip("not run in CI");
            return Prepared::Done(action);
        }

        action.start();
        self.actions.insert(idx, action.clone());

        let dep_hashes = task
            .required_deps()
            .filter_map(|dep| {
                self.hashes
                    .get(&dep.target)
                    .map(|hash| (dep.target.clone(), hash.clone()))
            })
            .collect();

        Prepared::Run {
            task: task.clone(),
            action,
            dep_hashes,
        }
    }

    /// Record a terminal action and release its dependents
    fn settle(&mut self, idx: NodeIndex, action: Action, hash: Option<String>) {
        let graph = self.workspace.graph();

        self.report(&action);
        if action.status.is_failure() {
            self.blocked.insert(idx);
        }
        if let (Some(hash), Some(node)) = (hash, graph.node(idx)) {
            self.hashes.insert(node.id.clone(), hash);
        }
        self.actions.insert(idx, action);

        let mut finished = vec![idx];

        while let Some(done) = finished.pop() {
            let blocks = self.blocked.contains(&done);

            for edge in graph.edges_to(done) {
                let dependent = edge.source;
                if !self.scope.contains(&dependent) {
                    continue;
                }
                if blocks && edge.relation.is_required() {
                    self.poisoned.insert(dependent);
                }

                let Some(remaining) = self.waiting_on.get_mut(&dependent) else {
                    continue;
                };
                *remaining = remaining.saturating_sub(1);
                if *remaining > 0 {
                    continue;
                }

                if self.poisoned.contains(&dependent) {
                    let mut skipped = self.action(dependent);
                    skipped.skip("dependency failed");
                    self.report(&skipped);
                    debug!(label = %skipped.label, "skipping, required dependency failed");
                    self.actions.insert(dependent, skipped);
                    self.blocked.insert(dependent);
                    finished.push(dependent);
                } else {
                    self.ready.push(Reverse(dependent));
                }
            }
        }
    }

    fn report(&self, action: &Action) {
        let event = match action.status {
            ActionStatus::Skipped => PipelineEvent::ActionSkipped {
                label: action.label.clone(),
                reason: action.skip_reason.clone().unwrap_or_default(),
            },
            status => PipelineEvent::ActionFinished {
                label: action.label.clone(),
                status,
                duration: action.duration,
                error: action.error.clone(),
            },
        };
        self.reporter.report(&event);
    }
}

struct Outcome {
    action: Action,
    hash: Option<String>,
}

/// Shared state for executing one task
struct Worker {
    config: PipelineConfig,
    context: Arc<RunContext>,
    reporter: Arc<dyn TaskReporter>,
    runner: TaskRunner,
    cache: Option<Arc<ArtifactCache>>,
    store: Option<HashStore>,
    provider: Arc<dyn FileDigestProvider>,
    /// Operator cancellation, as opposed to a fail-fast abort
    cancel: CancellationToken,
}

impl Worker {
    async fn run(
        &self,
        task: Task,
        mut action: Action,
        dep_hashes: BTreeMap<String, String>,
        abort: CancellationToken,
    ) -> Outcome {
        let started = Instant::now();
        let fail_fast = self.config.fail_fast || task.options.fail_fast;

        let fingerprint = match self.fingerprint(&task, &dep_hashes) {
            Ok(fingerprint) => fingerprint,
            Err(message) => {
                action.fail(failure_status(fail_fast), started.elapsed(), message);
                return Outcome { action, hash: None };
            }
        };
        let hash = fingerprint.as_ref().map(|fp| fp.hash.clone());
        action.hash = hash.clone();

        let mut result = None;
        let resolved = match (&self.cache, &fingerprint) {
            (Some(cache), Some(fp)) => {
                let (task, abort) = (&task, &abort);
                let (action, slot) = (&mut action, &mut result);
                let resolved = cache
                    .get_or_compute(&fp.hash, &self.context.workspace_root, || async move {
                        let run = self.execute_with_retries(task, action, abort).await;
                        let entry = self.cache_entry(task, &fp.hash, &run);
                        *slot = Some(run);
                        entry
                    })
                    .await;
                Some(resolved)
            }
            _ => {
                result = Some(self.execute_with_retries(&task, &mut action, &abort).await);
                None
            }
        };

        let elapsed = started.elapsed();
        match (resolved, result) {
            (Some(Err(e)), _) => {
                action.fail(ActionStatus::Invalid, elapsed, e.to_string());
            }
            (_, Some(run)) => self.finish_run(&mut action, run, elapsed, fail_fast),
            (Some(Ok(resolved)), None) => {
                let entry = resolved.entry;
                if entry.is_success() {
                    debug!(target = %task.target, source = ?resolved.source, "cache hit");
                    action.cached_duration = Some(entry.duration);
                    action.finish(ActionStatus::Cached, elapsed);
                } else {
                    action.fail(failure_status(fail_fast), elapsed, exit_message(entry.exit_code));
                }
            }
            (None, None) => action.finish(ActionStatus::Passed, elapsed),
        }

        Outcome { action, hash }
    }

    /// `Ok(None)` when the task is not cached at all
    fn fingerprint(
        &self,
        task: &Task,
        dep_hashes: &BTreeMap<String, String>,
    ) -> Result<Option<Fingerprint>, String> {
        if self.cache.is_none() || !task.is_cacheable() {
            return Ok(None);
        }

        let fingerprint = compute_fingerprint(task, dep_hashes, self.provider.as_ref(), &self.context)
            .map_err(|e| e.to_string())?;

        if let Some(store) = &self.store {
            if let Err(e) = store.write(&fingerprint) {
                warn!(target = %task.target, error = %e, "failed to write hash manifest");
            }
        }
        Ok(Some(fingerprint))
    }

    async fn execute_with_retries(
        &self,
        task: &Task,
        action: &mut Action,
        abort: &CancellationToken,
    ) -> Result<CommandOutput, RunError> {
        let retries = task.options.retry_count.unwrap_or(self.config.retry_count);
        let max_attempts = usize::from(retries) + 1;
        let mut index = 0;

        loop {
            index += 1;
            self.reporter.report(&PipelineEvent::ActionStarted {
                label: action.label.clone(),
                attempt: index,
                command: task.kind.to_string(),
            });

            let mut attempt = Attempt::new(index);
            let started = Instant::now();
            let result = self.runner.execute(task, abort).await;
            let elapsed = started.elapsed();

            let retryable = match &result {
                Ok(output) if output.success() => {
                    attempt.finish(ActionStatus::Passed, elapsed, output.exit_code, None);
                    false
                }
                Ok(output) => {
                    let message = exit_message(output.exit_code);
                    attempt.finish(ActionStatus::Failed, elapsed, output.exit_code, Some(message));
                    true
                }
                Err(e) => {
                    attempt.finish(ActionStatus::Failed, elapsed, None, Some(e.to_string()));
                    !matches!(e, RunError::Cancelled)
                }
            };
            action.attempts.push(attempt);

            if !retryable || index >= max_attempts {
                return result;
            }
            debug!(target = %task.target, attempt = index, max_attempts, "retrying");
        }
    }

    fn finish_run(
        &self,
        action: &mut Action,
        run: Result<CommandOutput, RunError>,
        elapsed: Duration,
        fail_fast: bool,
    ) {
        match run {
            Ok(output) if output.success() => action.finish(ActionStatus::Passed, elapsed),
            Ok(output) => action.fail(failure_status(fail_fast), elapsed, exit_message(output.exit_code)),
            Err(RunError::Cancelled) if self.cancel.is_cancelled() => {
                action.fail(ActionStatus::Failed, elapsed, RunError::Cancelled.to_string());
            }
            Err(RunError::Cancelled) => action.fail(ActionStatus::Invalid, elapsed, "aborted"),
            Err(e) => action.fail(failure_status(fail_fast), elapsed, e.to_string()),
        }
    }

    fn cache_entry(&self, task: &Task, hash: &str, run: &Result<CommandOutput, RunError>) -> CacheEntry {
        let mut entry = CacheEntry::new(hash, &task.target);
        match run {
            Ok(output) => {
                entry.exit_code = output.exit_code;
                entry.stdout = output.stdout.clone();
                entry.stderr = output.stderr.clone();
                entry.duration = output.duration;
            }
            Err(e) => entry.stderr = e.to_string(),
        }

        if entry.is_success() {
            entry.outputs = self.collect_outputs(task);
        }
        entry
    }

    fn collect_outputs(&self, task: &Task) -> BTreeMap<String, String> {
        let files = match self.provider.expand(&task.output_globs(), &[]) {
            Ok(files) => files,
            Err(e) => {
                warn!(target = %task.target, error = %e, "failed to expand outputs");
                return BTreeMap::new();
            }
        };

        files
            .into_iter()
            .filter_map(|file| match self.provider.digest(&file) {
                Ok(digest) => Some((file, digest)),
                Err(e) => {
                    warn!(target = %task.target, error = %e, "failed to digest output");
                    None
                }
            })
            .collect()
    }
}

fn failure_status(fail_fast: bool) -> ActionStatus {
    if fail_fast {
        ActionStatus::FailedAndAbort
    } else {
        ActionStatus::Failed
    }
}

fn exit_message(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exited with code {}", code),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use lodestar_core::exit_codes;
    use lodestar_project::{ProjectDeclaration, TaskConfig, TaskOptionsConfig, WorkspaceResolver};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn resolve(root: &Path, projects: Vec<ProjectDeclaration>) -> Arc<ResolvedWorkspace> {
        for project in &projects {
            fs::create_dir_all(root.join(project.source())).unwrap();
        }
        Arc::new(WorkspaceResolver::new(projects, vec![]).resolve().unwrap())
    }

    fn script(line: &str) -> TaskConfig {
        TaskConfig::new().with_script(line)
    }

    fn config(concurrency: usize, cache: bool) -> PipelineConfig {
        let mut config = PipelineConfig {
            concurrency,
            ..Default::default()
        };
        config.cache.enabled = cache;
        config
    }

    fn status(report: &RunReport, label: &str) -> ActionStatus {
        report.action(label).unwrap().status
    }

    #[tokio::test]
    async fn test_failure_skips_required_dependents_only() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p")
                .with_task("a", script("exit 1"))
                .with_task("b", script("echo b").with_dep("a"))
                .with_task("c", script("echo c").with_dep("b"))
                .with_task("d", script("echo d"))],
        );
        let reporter = Arc::new(CollectingReporter::default());

        let report = Pipeline::new(workspace, config(1, false), RunContext::new(temp.path()))
            .with_reporter(reporter.clone())
            .run(&["p:c", "p:d"])
            .await
            .unwrap();

        assert_eq!(status(&report, "p"), ActionStatus::Passed);
        assert_eq!(status(&report, "p:a"), ActionStatus::Failed);
        assert_eq!(status(&report, "p:b"), ActionStatus::Skipped);
        assert_eq!(status(&report, "p:c"), ActionStatus::Skipped);
        assert_eq!(status(&report, "p:d"), ActionStatus::Passed);
        assert_eq!(
            report.action("p:c").unwrap().skip_reason.as_deref(),
            Some("dependency failed")
        );
        assert_eq!(report.action("p:a").unwrap().error.as_deref(), Some("exited with code 1"));

        assert_eq!(reporter.started(), vec!["p:a", "p:d"]);
        assert_eq!(report.exit_code(), exit_codes::FAILURE);
        assert_eq!(report.summary.skipped, 2);
    }

    #[tokio::test]
    async fn test_optional_dependency_failure_is_tolerated() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p")
                .with_task("a", script("exit 1"))
                .with_task("b", script("echo b").with_dep(lodestar_project::DependencyConfig::optional("a")))],
        );

        let report = Pipeline::new(workspace, config(2, false), RunContext::new(temp.path()))
            .run(&["p:b"])
            .await
            .unwrap();

        assert_eq!(status(&report, "p:a"), ActionStatus::Failed);
        assert_eq!(status(&report, "p:b"), ActionStatus::Passed);
    }

    #[tokio::test]
    async fn test_dependencies_run_first() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![
                ProjectDeclaration::new("lib").with_task("build", script("touch built")),
                ProjectDeclaration::new("app")
                    .with_dependency("lib")
                    .with_task("build", script("test -f ../lib/built").with_dep("^:build")),
            ],
        );

        let report = Pipeline::new(workspace, config(4, false), RunContext::new(temp.path()))
            .run(&["app:build"])
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(status(&report, "lib:build"), ActionStatus::Passed);
        assert_eq!(status(&report, "app:build"), ActionStatus::Passed);
        assert_eq!(report.context.primary_targets, vec!["app:build"]);
    }

    #[tokio::test]
    async fn test_second_run_is_cached() {
        let temp = TempDir::new().unwrap();
        let task = script("echo run >> ../runs.log && mkdir -p dist && echo bundle > dist/out.txt")
            .with_outputs(&["dist/**/*"]);
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("app").with_task("build", task)],
        );
        fs::write(temp.path().join("app/index.ts"), "export {}").unwrap();

        let pipeline = Pipeline::new(workspace, config(2, true), RunContext::new(temp.path()));

        let first = pipeline.run(&["app:build"]).await.unwrap();
        assert_eq!(status(&first, "app:build"), ActionStatus::Passed);
        let hash = first.action("app:build").unwrap().hash.clone().unwrap();
        assert!(temp
            .path()
            .join(".lodestar/cache/hashes")
            .join(format!("{}.json", hash))
            .exists());

        fs::remove_dir_all(temp.path().join("app/dist")).unwrap();
        let second = pipeline.run(&["app:build"]).await.unwrap();
        let action = second.action("app:build").unwrap();
        assert_eq!(action.status, ActionStatus::Cached);
        assert_eq!(action.hash.as_deref(), Some(hash.as_str()));
        assert!(action.cached_duration.is_some());
        assert_eq!(second.estimated_savings, action.cached_duration.unwrap());

        let runs = fs::read_to_string(temp.path().join("runs.log")).unwrap();
        assert_eq!(runs.lines().count(), 1);
        assert_eq!(
            fs::read_to_string(temp.path().join("app/dist/out.txt")).unwrap(),
            "bundle\n"
        );

        fs::write(temp.path().join("app/index.ts"), "export const x = 1").unwrap();
        let third = pipeline.run(&["app:build"]).await.unwrap();
        assert_eq!(status(&third, "app:build"), ActionStatus::Passed);
    }

    #[tokio::test]
    async fn test_dependency_change_reruns_dependents() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![
                ProjectDeclaration::new("lib").with_task("build", script("echo lib >> ../runs.log")),
                ProjectDeclaration::new("app")
                    .with_dependency("lib")
                    .with_task("build", script("echo app >> ../runs.log").with_dep("^:build")),
            ],
        );
        fs::write(temp.path().join("lib/index.ts"), "export {}").unwrap();
        fs::write(temp.path().join("app/index.ts"), "export {}").unwrap();

        let pipeline = Pipeline::new(workspace, config(2, true), RunContext::new(temp.path()));
        let hash = |report: &RunReport, label: &str| report.action(label).unwrap().hash.clone().unwrap();

        let first = pipeline.run(&["app:build"]).await.unwrap();
        let second = pipeline.run(&["app:build"]).await.unwrap();
        assert_eq!(status(&second, "lib:build"), ActionStatus::Cached);
        assert_eq!(status(&second, "app:build"), ActionStatus::Cached);

        fs::write(temp.path().join("lib/index.ts"), "export const x = 1").unwrap();
        let third = pipeline.run(&["app:build"]).await.unwrap();
        assert_eq!(status(&third, "lib:build"), ActionStatus::Passed);
        assert_eq!(status(&third, "app:build"), ActionStatus::Passed);
        assert_ne!(hash(&first, "lib:build"), hash(&third, "lib:build"));
        assert_ne!(hash(&first, "app:build"), hash(&third, "app:build"));

        let runs = fs::read_to_string(temp.path().join("runs.log")).unwrap();
        assert_eq!(runs.lines().filter(|line| *line == "app").count(), 2);
        assert_eq!(runs.lines().filter(|line| *line == "lib").count(), 2);
    }

    #[tokio::test]
    async fn test_cache_inconsistency_fails_only_that_node() {
        let temp = TempDir::new().unwrap();
        // ../content and ../hold sit outside the project, so they never
        // reach the fingerprint
        let build = script(
            "mkdir -p dist && cat ../content > dist/out.txt && while [ -f ../hold ]; do sleep 0.05; done",
        )
        .with_outputs(&["dist/**/*"]);
        let workspace = resolve(
            temp.path(),
            vec![
                ProjectDeclaration::new("app")
                    .with_task("build", build)
                    .with_task("deploy", script("echo deploy").with_dep("build")),
                ProjectDeclaration::new("docs").with_task("lint", script("echo lint")),
            ],
        );
        fs::write(temp.path().join("app/index.ts"), "export {}").unwrap();
        fs::write(temp.path().join("content"), "v1").unwrap();

        let pipeline = Pipeline::new(workspace, config(2, true), RunContext::new(temp.path()));
        let targets = ["app:deploy", "docs:lint"];

        let first = pipeline.run(&targets).await.unwrap();
        assert!(first.is_success());
        let hash = first.action("app:build").unwrap().hash.clone().unwrap();

        // Hide the stored entry so the next run executes, then put it back
        // while that execution is still in flight
        let entry_dir = temp.path().join(".lodestar/cache/outputs").join(&hash);
        let stash = temp.path().join("stash");
        fs::rename(&entry_dir, &stash).unwrap();
        fs::write(temp.path().join("content"), "v2").unwrap();
        fs::write(temp.path().join("hold"), "").unwrap();

        let out = temp.path().join("app/dist/out.txt");
        let reinstate = async {
            while fs::read_to_string(&out).ok().as_deref() != Some("v2") {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            fs::rename(&stash, &entry_dir).unwrap();
            fs::remove_file(temp.path().join("hold")).unwrap();
        };
        let (second, ()) = tokio::join!(pipeline.run(&targets), reinstate);
        let second = second.unwrap();

        let build = second.action("app:build").unwrap();
        assert_eq!(build.status, ActionStatus::Invalid);
        assert!(build.error.as_deref().unwrap().contains("consistency"));
        assert_eq!(status(&second, "app:deploy"), ActionStatus::Skipped);
        assert_eq!(status(&second, "docs:lint"), ActionStatus::Cached);
        assert_eq!(second.exit_code(), exit_codes::FAILURE);
    }

    #[tokio::test]
    async fn test_retry_marks_flaky() {
        let temp = TempDir::new().unwrap();
        let options = TaskOptionsConfig {
            retry_count: Some(2),
            ..Default::default()
        };
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p").with_task(
                "test",
                script("if [ -f ../attempted ]; then exit 0; fi; touch ../attempted; exit 1")
                    .with_options(options),
            )],
        );

        let report = Pipeline::new(workspace, config(1, false), RunContext::new(temp.path()))
            .run(&["p:test"])
            .await
            .unwrap();

        let action = report.action("p:test").unwrap();
        assert_eq!(action.status, ActionStatus::Passed);
        assert!(action.flaky);
        assert_eq!(action.attempts.len(), 2);
        assert_eq!(action.attempts[0].status, ActionStatus::Failed);
        assert_eq!(action.attempts[0].exit_code, Some(1));
        assert_eq!(report.summary.flaky, 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p").with_task("test", script("exit 2"))],
        );
        let mut config = config(1, false);
        config.retry_count = 2;

        let report = Pipeline::new(workspace, config, RunContext::new(temp.path()))
            .run(&["p:test"])
            .await
            .unwrap();

        let action = report.action("p:test").unwrap();
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.attempts.len(), 3);
        assert!(!action.flaky);
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p")
                .with_task("a", script("touch ../ran"))
                .with_task("b", script("touch ../ran").with_dep("a"))],
        );
        let reporter = Arc::new(CollectingReporter::default());
        let mut config = config(2, true);
        config.dry_run = true;

        let report = Pipeline::new(workspace, config, RunContext::new(temp.path()))
            .with_reporter(reporter.clone())
            .run(&["p:b"])
            .await
            .unwrap();

        assert!(report
            .actions
            .iter()
            .all(|action| action.status == ActionStatus::Skipped
                && action.skip_reason.as_deref() == Some("dry run")));
        assert!(reporter.started().is_empty());
        assert!(!temp.path().join("ran").exists());
        assert!(!temp.path().join(".lodestar").exists());
        assert_eq!(report.exit_code(), exit_codes::SUCCESS);
    }

    #[tokio::test]
    async fn test_ci_skips_local_only_tasks() {
        let temp = TempDir::new().unwrap();
        let options = TaskOptionsConfig {
            run_in_ci: Some(false),
            ..Default::default()
        };
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p")
                .with_task("dev", script("exit 1").with_options(options))
                .with_task("build", script("echo ok").with_dep("dev"))],
        );

        let report = Pipeline::new(
            workspace,
            config(1, false),
            RunContext::new(temp.path()).with_ci(true),
        )
        .run(&["p:build"])
        .await
        .unwrap();

        assert_eq!(status(&report, "p:dev"), ActionStatus::Skipped);
        assert_eq!(status(&report, "p:build"), ActionStatus::Passed);
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_run() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p")
                .with_task("a-fail", script("sleep 0.2; exit 1"))
                .with_task("b-slow", script("sleep 30"))
                .with_task("c-later", script("echo later"))],
        );
        let mut config = config(2, false);
        config.fail_fast = true;

        let started = Instant::now();
        let report = Pipeline::new(workspace, config, RunContext::new(temp.path()))
            .run(&["p:a-fail", "p:b-slow", "p:c-later"])
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(status(&report, "p:a-fail"), ActionStatus::FailedAndAbort);
        assert_eq!(status(&report, "p:b-slow"), ActionStatus::Invalid);
        assert_eq!(status(&report, "p:c-later"), ActionStatus::Skipped);
        assert_eq!(
            report.action("p:c-later").unwrap().skip_reason.as_deref(),
            Some("aborted")
        );
        assert!(!report.cancelled);
        assert_eq!(report.exit_code(), exit_codes::FAILURE);
    }

    #[tokio::test]
    async fn test_cancellation_produces_partial_report() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p")
                .with_task("fast", script("echo fast"))
                .with_task("slow", script("sleep 30").with_dep("fast"))
                .with_task("after", script("echo after").with_dep("slow"))],
        );

        let pipeline = Pipeline::new(workspace, config(2, false), RunContext::new(temp.path()));
        let token = pipeline.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            token.cancel();
        });

        let report = pipeline.run(&["p:after"]).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.exit_code(), exit_codes::CANCELLED);
        assert_eq!(status(&report, "p:fast"), ActionStatus::Passed);
        assert_eq!(status(&report, "p:slow"), ActionStatus::Failed);
        assert_eq!(report.action("p:slow").unwrap().error.as_deref(), Some("cancelled"));
        assert_eq!(status(&report, "p:after"), ActionStatus::Skipped);
    }

    #[tokio::test]
    async fn test_cancellation_with_background_process() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p").with_task("serve", script("sleep 15 & echo started"))],
        );

        let pipeline = Pipeline::new(workspace, config(1, false), RunContext::new(temp.path()));
        let token = pipeline.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        });

        let started = Instant::now();
        let report = pipeline.run(&["p:serve"]).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(report.cancelled);
        assert_eq!(status(&report, "p:serve"), ActionStatus::Failed);
        assert_eq!(report.action("p:serve").unwrap().error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_setup_errors_stop_before_execution() {
        let temp = TempDir::new().unwrap();
        let workspace = resolve(
            temp.path(),
            vec![ProjectDeclaration::new("p").with_task("a", script("echo a"))],
        );

        let err = Pipeline::new(workspace.clone(), config(0, false), RunContext::new(temp.path()))
            .run(&["p:a"])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = Pipeline::new(workspace, config(1, false), RunContext::new(temp.path()))
            .run(&["p:missing"])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Resolve(_)));
    }
}
