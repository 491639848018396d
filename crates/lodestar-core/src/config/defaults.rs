//! Default configuration values

/// Default cache directory, relative to the workspace root
pub const DEFAULT_CACHE_DIR: &str = ".lodestar/cache";

/// Default lifetime of cache entries
pub const DEFAULT_CACHE_LIFETIME: &str = "7 days";

/// Default concurrency: one action per available core
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
