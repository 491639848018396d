//! On-disk store of hash manifests, for inspecting why a hash changed

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CacheError;
use crate::hasher::{Fingerprint, HashManifest};

/// Writes `<dir>/<hash>.json` for every computed fingerprint
#[derive(Debug, Clone)]
pub struct HashStore {
    dir: PathBuf,
}

impl HashStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a fingerprint's manifest. Existing manifests are left alone
    /// since equal hashes imply equal payloads.
    pub fn write(&self, fingerprint: &Fingerprint) -> Result<PathBuf, CacheError> {
        let path = self.dir.join(format!("{}.json", fingerprint.hash));
        if path.exists() {
            return Ok(path);
        }

        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(&fingerprint.manifest)?;
        fs::write(&path, json)?;
        debug!(hash = %fingerprint.hash, "wrote hash manifest");
        Ok(path)
    }

    /// Look up a manifest by full hash or unambiguous prefix
    pub fn query(&self, prefix: &str) -> Result<HashManifest, CacheError> {
        let prefix = prefix.trim();
        if prefix.is_empty() || !self.dir.exists() {
            return Err(CacheError::HashNotFound(prefix.to_string()));
        }

        let mut candidates: Vec<String> = fs::read_dir(&self.dir)?
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .filter(|hash| hash.starts_with(prefix))
            .collect();
        candidates.sort();

        match candidates.as_slice() {
            [] => Err(CacheError::HashNotFound(prefix.to_string())),
            [hash] => {
                let contents = fs::read_to_string(self.dir.join(format!("{}.json", hash)))?;
                Ok(serde_json::from_str(&contents)?)
            }
            _ => Err(CacheError::AmbiguousHash {
                prefix: prefix.to_string(),
                candidates,
            }),
        }
    }
}
