//! Content fingerprints for task invocations
//!
//! A fingerprint is the SHA-256 of a canonical JSON [`HashManifest`]:
//! command, env, input file digests, and the hashes of required
//! dependencies. Dependencies contribute their hash only, never their
//! inputs, so recomputation stays bounded while changes still propagate.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use lodestar_core::{HashOptimization, RunContext};
use lodestar_project::{Task, TaskKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{instrument, trace};

use crate::error::HashError;

/// Stands in for a required dependency that has no fingerprint of its own,
/// such as an uncacheable task or one skipped in CI
pub const PASSTHROUGH_HASH: &str = "passthrough";

/// Source of file lists and per-file digests
pub trait FileDigestProvider: Send + Sync {
    /// Workspace relative files matching any of `globs` and none of
    /// `exclude`, sorted
    fn expand(&self, globs: &[String], exclude: &[String]) -> Result<Vec<String>, HashError>;

    /// Digest of one workspace relative file
    fn digest(&self, path: &str) -> Result<String, HashError>;
}

/// Filesystem backed provider
#[derive(Debug, Clone)]
pub struct FsDigestProvider {
    root: PathBuf,
    optimization: HashOptimization,
}

impl FsDigestProvider {
    pub fn new(root: impl Into<PathBuf>, optimization: HashOptimization) -> Self {
        Self {
            root: root.into(),
            optimization,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileDigestProvider for FsDigestProvider {
    fn expand(&self, globs: &[String], exclude: &[String]) -> Result<Vec<String>, HashError> {
        let excluded = build_globset(exclude)?;
        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let options = glob::MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };

        let mut files = Vec::new();
        for pattern in globs {
            let full_pattern = format!("{}/{}", root.trim_end_matches('/'), pattern);
            let paths = glob::glob_with(&full_pattern, options).map_err(|e| HashError::Glob {
                glob: pattern.clone(),
                message: e.to_string(),
            })?;

            for entry in paths.flatten() {
                if !entry.is_file() {
                    continue;
                }
                let relative = entry
                    .strip_prefix(&self.root)
                    .unwrap_or(&entry)
                    .to_string_lossy()
                    .replace('\\', "/");
                if !excluded.is_match(&relative) {
                    files.push(relative);
                }
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }

    fn digest(&self, path: &str) -> Result<String, HashError> {
        let full = self.root.join(path);
        let read_error = |error| HashError::Read {
            path: full.clone(),
            error,
        };

        match self.optimization {
            HashOptimization::Accuracy => {
                let contents = fs::read(&full).map_err(read_error)?;
                Ok(format!("{:x}", Sha256::digest(&contents)))
            }
            HashOptimization::Performance => {
                let meta = fs::metadata(&full).map_err(read_error)?;
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                    .map(|since| since.as_nanos())
                    .unwrap_or_default();
                Ok(format!("{}:{}", meta.len(), modified))
            }
        }
    }
}

/// The canonical payload that gets hashed. Maps are ordered and list-valued
/// sets are sorted, so equal inputs always serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashManifest {
    pub target: String,
    pub command: TaskKind,
    /// Passthrough args, only for primary targets
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// `$VAR` inputs and their values at hash time
    pub input_env: BTreeMap<String, String>,
    /// Workspace relative path to file digest
    pub inputs: BTreeMap<String, String>,
    pub outputs: Vec<String>,
    /// Required dependency target to its fingerprint
    pub deps: BTreeMap<String, String>,
}

/// A computed fingerprint; immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: String,
    pub manifest: HashManifest,
}

impl Fingerprint {
    /// Hash an already canonical manifest
    pub fn from_manifest(manifest: HashManifest) -> Result<Self, HashError> {
        let payload = serde_json::to_vec(&manifest)?;
        let hash = format!("{:x}", Sha256::digest(&payload));
        Ok(Self { hash, manifest })
    }
}

/// Compute the fingerprint of `task`.
///
/// `dep_hashes` maps dependency targets to their fingerprints; only the
/// task's required dependencies are read from it.
#[instrument(skip_all, fields(target = %task.target))]
pub fn compute_fingerprint(
    task: &Task,
    dep_hashes: &BTreeMap<String, String>,
    provider: &dyn FileDigestProvider,
    context: &RunContext,
) -> Result<Fingerprint, HashError> {
    let mut outputs = task.output_globs();
    outputs.sort();
    outputs.dedup();

    let mut inputs = BTreeMap::new();
    for file in provider.expand(&task.input_globs(), &outputs)? {
        let digest = provider.digest(&file)?;
        inputs.insert(file, digest);
    }

    let input_env = task
        .input_env
        .iter()
        .map(|var| (var.clone(), context.env_var(var).unwrap_or_default().to_string()))
        .collect();

    let mut deps = BTreeMap::new();
    for dep in task.required_deps() {
        let hash = dep_hashes.get(&dep.target).cloned().unwrap_or_else(|| {
            trace!(dep = %dep.target, "no fingerprint for dependency, hashing as passthrough");
            PASSTHROUGH_HASH.to_string()
        });
        deps.insert(dep.target.clone(), hash);
    }

    let args = if context.is_primary_target(&task.target) {
        context.passthrough_args.clone()
    } else {
        Vec::new()
    };

    let fingerprint = Fingerprint::from_manifest(HashManifest {
        target: task.target.clone(),
        command: task.kind.clone(),
        args,
        env: task.env.clone(),
        input_env,
        inputs,
        outputs,
        deps,
    })?;

    trace!(hash = %fingerprint.hash, files = fingerprint.manifest.inputs.len(), "computed fingerprint");
    Ok(fingerprint)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, HashError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| HashError::Glob {
                glob: pattern.clone(),
                message: e.to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| HashError::Glob {
        glob: patterns.join(", "),
        message: e.to_string(),
    })
}
