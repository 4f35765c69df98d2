//! Content-addressable task cache

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::task::TaskId;

/// Directories never hashed or captured
const IGNORED_DIRS: &[&str] = &[".git", "node_modules"];

const METADATA_FILE: &str = "metadata.json";
const OUTPUTS_DIR: &str = "outputs";

/// Cache key: SHA-256 over everything that affects a task's result
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Abbreviated form for display
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a predecessor contributes to a fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    /// The predecessor ran (or was restored) with this fingerprint
    Fingerprinted(Fingerprint),
    /// The predecessor had nothing to run
    Skipped,
    /// The predecessor could not be fingerprinted
    Unknown,
}

/// Everything the cache gate needs to know about a node
#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub id: TaskId,
    pub command: String,
    /// Workspace directory inputs and outputs are relative to
    pub dir: PathBuf,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// `cache = true` and not persistent
    pub cacheable: bool,
    pub predecessors: Vec<(TaskId, Upstream)>,
}

/// Result of consulting the cache before running a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Outputs were restored; the node does not need to run
    Hit {
        fingerprint: Fingerprint,
        restored: usize,
    },
    /// The node must run
    Miss(Fingerprint),
    /// No fingerprint could be computed; run uncached
    Bypass,
}

/// Captured output files of a task, keyed by workspace-relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedOutputs {
    pub task_id: Option<TaskId>,
    pub files: BTreeMap<String, Vec<u8>>,
}

/// Storage backend for cached outputs
pub trait CacheStore: Send + Sync {
    /// Look up the outputs stored under a fingerprint
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CachedOutputs>, CacheError>;

    /// Store outputs under a fingerprint, replacing any existing entry
    fn put(&self, fingerprint: &Fingerprint, outputs: &CachedOutputs) -> Result<(), CacheError>;
}

/// Consults the cache store around task execution
#[derive(Clone)]
pub struct CacheGate {
    store: Arc<dyn CacheStore>,
    excluded_dirs: Arc<HashSet<PathBuf>>,
}

impl CacheGate {
    /// Create a gate over a cache store
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            excluded_dirs: Arc::new(HashSet::new()),
        }
    }

    /// Directories left out of input hashing and output capture (the cache
    /// itself, nested workspaces). A node's own directory is never excluded.
    pub fn with_excluded_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.excluded_dirs = Arc::new(dirs.into_iter().collect());
        self
    }

    /// Fingerprint the node and try to restore its outputs
    pub async fn before_run(&self, request: &CacheRequest) -> CacheLookup {
        let fingerprint = match self.fingerprint(request).await {
            Ok(Some(fingerprint)) => fingerprint,
            Ok(None) => {
                debug!(task = %request.id, "upstream fingerprint unknown, bypassing cache");
                return CacheLookup::Bypass;
            }
            Err(e) => {
                warn!(task = %request.id, error = %e, "failed to fingerprint inputs, bypassing cache");
                return CacheLookup::Bypass;
            }
        };

        if !request.cacheable {
            return CacheLookup::Miss(fingerprint);
        }

        let store = self.store.clone();
        let dir = request.dir.clone();
        let key = fingerprint.clone();
        let restored = tokio::task::spawn_blocking(move || -> Result<Option<usize>, CacheError> {
            match store.get(&key)? {
                Some(outputs) => restore_outputs(&dir, &outputs).map(Some),
                None => Ok(None),
            }
        })
        .await;

        match restored {
            Ok(Ok(Some(restored))) => {
                debug!(task = %request.id, fingerprint = fingerprint.short(), "cache hit");
                CacheLookup::Hit {
                    fingerprint,
                    restored,
                }
            }
            Ok(Ok(None)) => {
                debug!(task = %request.id, fingerprint = fingerprint.short(), "cache miss");
                CacheLookup::Miss(fingerprint)
            }
            Ok(Err(e)) => {
                warn!(task = %request.id, error = %e, "cache lookup failed, treating as miss");
                CacheLookup::Miss(fingerprint)
            }
            Err(e) => {
                warn!(task = %request.id, error = %e, "cache lookup panicked, treating as miss");
                CacheLookup::Miss(fingerprint)
            }
        }
    }

    /// Capture and store the outputs of a successful run
    pub async fn after_run(&self, request: &CacheRequest, fingerprint: &Fingerprint, success: bool) {
        if !success || !request.cacheable {
            return;
        }

        let store = self.store.clone();
        let excluded = self.excluded_dirs.clone();
        let dir = request.dir.clone();
        let patterns = request.outputs.clone();
        let task_id = request.id.clone();
        let key = fingerprint.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<usize, CacheError> {
            let files = collect_outputs(&dir, &patterns, &excluded)?;
            let count = files.len();
            let outputs = CachedOutputs {
                task_id: Some(task_id),
                files,
            };
            store.put(&key, &outputs)?;
            Ok(count)
        })
        .await;

        match result {
            Ok(Ok(count)) => {
                debug!(task = %request.id, fingerprint = fingerprint.short(), files = count, "stored outputs")
            }
            Ok(Err(e)) => warn!(task = %request.id, error = %e, "failed to store outputs"),
            Err(e) => warn!(task = %request.id, error = %e, "output capture panicked"),
        }
    }

    /// Compute the node's fingerprint off the async runtime.
    ///
    /// Returns `None` when a predecessor has no fingerprint.
    pub async fn fingerprint(&self, request: &CacheRequest) -> Result<Option<Fingerprint>, CacheError> {
        if request
            .predecessors
            .iter()
            .any(|(_, upstream)| *upstream == Upstream::Unknown)
        {
            return Ok(None);
        }

        let request = request.clone();
        let excluded = self.excluded_dirs.clone();
        tokio::task::spawn_blocking(move || compute_fingerprint(&request, &excluded).map(Some))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(e.to_string())))?
    }
}

/// Hash task identity, command, env, declared globs, input files and upstream fingerprints
fn compute_fingerprint(
    request: &CacheRequest,
    excluded: &HashSet<PathBuf>,
) -> Result<Fingerprint, CacheError> {
    let mut hasher = Sha256::new();
    let mut field = |bytes: &[u8]| {
        hasher.update(bytes);
        hasher.update([0u8]);
    };

    field(b"gantry-fingerprint-v1");
    field(request.id.to_string().as_bytes());
    field(request.command.as_bytes());

    // BTreeMap iterates sorted, which keeps the hash deterministic
    for (key, value) in &request.env {
        field(format!("{}={}", key, value).as_bytes());
    }

    field(b"inputs");
    for pattern in &request.inputs {
        field(pattern.as_bytes());
    }
    field(b"outputs");
    for pattern in &request.outputs {
        field(pattern.as_bytes());
    }

    field(b"files");
    for (path, hash) in hash_inputs(request, excluded)? {
        field(path.as_bytes());
        field(hash.as_bytes());
    }

    field(b"upstream");
    let mut predecessors: Vec<&(TaskId, Upstream)> = request.predecessors.iter().collect();
    predecessors.sort_by(|a, b| a.0.cmp(&b.0));
    for (id, upstream) in predecessors {
        field(id.to_string().as_bytes());
        match upstream {
            Upstream::Fingerprinted(fp) => field(fp.0.as_bytes()),
            Upstream::Skipped => field(b"<skipped>"),
            Upstream::Unknown => field(b"<unknown>"),
        }
    }

    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

/// Relative path → content hash of every input file, sorted by path
fn hash_inputs(
    request: &CacheRequest,
    excluded: &HashSet<PathBuf>,
) -> Result<BTreeMap<String, String>, CacheError> {
    let inputs = if request.inputs.is_empty() {
        None
    } else {
        Some(build_globset(&request.inputs)?)
    };
    let outputs = build_globset(&request.outputs)?;

    let mut hashes = BTreeMap::new();
    for (path, relative) in walk_files(&request.dir, excluded)? {
        if outputs.is_match(&relative) {
            continue;
        }
        if let Some(inputs) = &inputs {
            if !inputs.is_match(&relative) {
                continue;
            }
        }
        let contents = fs::read(&path)?;
        hashes.insert(relative, format!("{:x}", Sha256::digest(&contents)));
    }
    Ok(hashes)
}

/// Output files matched by the output globs
fn collect_outputs(
    dir: &Path,
    patterns: &[String],
    excluded: &HashSet<PathBuf>,
) -> Result<BTreeMap<String, Vec<u8>>, CacheError> {
    let mut files = BTreeMap::new();
    if patterns.is_empty() {
        return Ok(files);
    }
    let outputs = build_globset(patterns)?;
    for (path, relative) in walk_files(dir, excluded)? {
        if outputs.is_match(&relative) {
            files.insert(relative, fs::read(&path)?);
        }
    }
    Ok(files)
}

/// Write restored outputs back into the workspace directory
fn restore_outputs(dir: &Path, outputs: &CachedOutputs) -> Result<usize, CacheError> {
    for (relative, contents) in &outputs.files {
        let target = safe_join(dir, relative)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, contents)?;
    }
    Ok(outputs.files.len())
}

/// Join a stored relative path onto a directory, refusing to escape it
fn safe_join(dir: &Path, relative: &str) -> Result<PathBuf, CacheError> {
    let path = Path::new(relative);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(CacheError::InvalidPath(relative.to_string()));
    }
    Ok(dir.join(path))
}

/// Files under `dir` as (absolute, '/'-separated relative) pairs.
///
/// An entry that cannot be read fails the walk, so it can never drop out of
/// a fingerprint unnoticed.
fn walk_files(dir: &Path, excluded: &HashSet<PathBuf>) -> Result<Vec<(PathBuf, String)>, CacheError> {
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !IGNORED_DIRS.contains(&name.as_ref()) && !excluded.contains(entry.path())
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((entry.path().to_path_buf(), relative));
    }
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, CacheError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| CacheError::InvalidGlob {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| CacheError::InvalidGlob {
        pattern: patterns.join(", "),
        reason: e.to_string(),
    })
}

/// Metadata written next to each cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: Fingerprint,
    /// Task that produced the entry
    pub task_id: Option<TaskId>,
    /// Output file paths (relative to the workspace)
    pub output_files: Vec<String>,
    /// When this entry was created
    pub created_at: String,
}

/// Cache store on the local filesystem: one directory per fingerprint
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    /// Cache directory
    cache_dir: PathBuf,
}

impl FsCacheStore {
    /// Create a store rooted at a directory
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Remove entries older than `max_age`
    pub fn prune(&self, max_age: Duration) -> Result<PruneStats, CacheError> {
        info!(max_age_secs = max_age.as_secs(), "pruning cache");
        let mut stats = PruneStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();

        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }

            stats.total += 1;

            let expired = fs::read_to_string(path.join(METADATA_FILE))
                .ok()
                .and_then(|contents| serde_json::from_str::<CacheEntry>(&contents).ok())
                .and_then(|entry| chrono::DateTime::parse_from_rfc3339(&entry.created_at).ok())
                .is_some_and(|created| created < cutoff);

            if expired && fs::remove_dir_all(&path).is_ok() {
                stats.removed += 1;
            } else {
                stats.kept += 1;
            }
        }

        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        Ok(stats)
    }

    /// Get cache statistics
    pub fn status(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();

        if !self.cache_dir.exists() {
            return Ok(stats);
        }

        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }

            stats.entries += 1;
            stats.total_size += WalkDir::new(&path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum::<u64>();
        }

        Ok(stats)
    }

    /// Delete every cache entry
    pub fn clean(&self) -> Result<usize, CacheError> {
        let stats = self.status()?;
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)?;
        }
        info!(entries = stats.entries, "cache cleaned");
        Ok(stats.entries)
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

impl CacheStore for FsCacheStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CachedOutputs>, CacheError> {
        let entry_dir = self.cache_dir.join(&fingerprint.0);
        let metadata_path = entry_dir.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Ok(None);
        }

        let entry: CacheEntry = serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;
        let mut files = BTreeMap::new();
        for relative in &entry.output_files {
            let stored = safe_join(&entry_dir.join(OUTPUTS_DIR), relative)?;
            if !stored.exists() {
                debug!(fingerprint = fingerprint.short(), file = %relative, "incomplete cache entry");
                return Ok(None);
            }
            files.insert(relative.clone(), fs::read(&stored)?);
        }

        Ok(Some(CachedOutputs {
            task_id: entry.task_id,
            files,
        }))
    }

    fn put(&self, fingerprint: &Fingerprint, outputs: &CachedOutputs) -> Result<(), CacheError> {
        let entry_dir = self.cache_dir.join(&fingerprint.0);
        let outputs_dir = entry_dir.join(OUTPUTS_DIR);
        fs::create_dir_all(&outputs_dir)?;

        for (relative, contents) in &outputs.files {
            let target = safe_join(&outputs_dir, relative)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, contents)?;
        }

        // Metadata last: an entry without it is never read back
        let entry = CacheEntry {
            key: fingerprint.clone(),
            task_id: outputs.task_id.clone(),
            output_files: outputs.files.keys().cloned().collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&entry)?;
        let mut file = fs::File::create(entry_dir.join(METADATA_FILE))?;
        file.write_all(json.as_bytes())?;

        Ok(())
    }
}

/// In-process cache store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<Fingerprint, CachedOutputs>>,
}

impl MemoryCacheStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CachedOutputs>, CacheError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(fingerprint)
            .cloned())
    }

    fn put(&self, fingerprint: &Fingerprint, outputs: &CachedOutputs) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(fingerprint.clone(), outputs.clone());
        Ok(())
    }
}

/// Statistics from a prune operation
#[derive(Debug, Default)]
pub struct PruneStats {
    /// Total entries found
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache entries
    pub entries: usize,
    /// Total size in bytes
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        if self.total_size < 1024 {
            format!("{} B", self.total_size)
        } else if self.total_size < 1024 * 1024 {
            format!("{:.1} KB", self.total_size as f64 / 1024.0)
        } else if self.total_size < 1024 * 1024 * 1024 {
            format!("{:.1} MB", self.total_size as f64 / (1024.0 * 1024.0))
        } else {
            format!(
                "{:.1} GB",
                self.total_size as f64 / (1024.0 * 1024.0 * 1024.0)
            )
        }
    }
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// An input or output glob does not parse
    #[error("Invalid glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    /// A stored path points outside its directory
    #[error("Refusing to restore path outside the workspace: {0}")]
    InvalidPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn request(dir: &Path) -> CacheRequest {
        CacheRequest {
            id: TaskId::new("shared", "build"),
            command: "tsc".to_string(),
            dir: dir.to_path_buf(),
            inputs: Vec::new(),
            outputs: vec!["dist/**".to_string()],
            env: BTreeMap::new(),
            cacheable: true,
            predecessors: Vec::new(),
        }
    }

    fn fingerprint(request: &CacheRequest) -> Fingerprint {
        compute_fingerprint(request, &HashSet::new()).unwrap()
    }

    struct FailingStore;

    impl CacheStore for FailingStore {
        fn get(&self, _: &Fingerprint) -> Result<Option<CachedOutputs>, CacheError> {
            Err(CacheError::Io(std::io::Error::other("disk on fire")))
        }

        fn put(&self, _: &Fingerprint, _: &CachedOutputs) -> Result<(), CacheError> {
            Err(CacheError::Io(std::io::Error::other("disk on fire")))
        }
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/index.ts", "export {}");
        let req = request(temp.path());
        assert_eq!(fingerprint(&req), fingerprint(&req));
    }

    #[test]
    fn test_fingerprint_differs_on_command_and_env() {
        let temp = TempDir::new().unwrap();
        let base = request(temp.path());

        let mut other = base.clone();
        other.command = "tsc -b".to_string();
        assert_ne!(fingerprint(&base), fingerprint(&other));

        let mut other = base.clone();
        other.env.insert("NODE_ENV".to_string(), "production".to_string());
        assert_ne!(fingerprint(&base), fingerprint(&other));
    }

    #[test]
    fn test_fingerprint_tracks_input_content() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/index.ts", "export {}");
        let req = request(temp.path());
        let before = fingerprint(&req);

        write(temp.path(), "src/index.ts", "export const x = 1");
        assert_ne!(before, fingerprint(&req));
    }

    #[test]
    fn test_fingerprint_ignores_outputs_and_excluded_dirs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/index.ts", "export {}");
        let req = request(temp.path());
        let before = fingerprint(&req);

        write(temp.path(), "dist/index.js", "built");
        write(temp.path(), "node_modules/lodash/index.js", "dep");
        write(temp.path(), ".git/HEAD", "ref");
        assert_eq!(before, fingerprint(&req));

        write(temp.path(), "packages/nested/src/a.ts", "nested");
        let excluded: HashSet<PathBuf> = [temp.path().join("packages/nested")].into();
        assert_eq!(before, compute_fingerprint(&req, &excluded).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_fingerprint_fails_on_unreadable_input_dir() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/index.ts", "export {}");
        write(temp.path(), "src/locked/secret.ts", "hidden");
        let locked = temp.path().join("src/locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits are not enforced for privileged users
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = compute_fingerprint(&request(temp.path()), &HashSet::new());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(result, Err(CacheError::Io(_))));
    }

    #[test]
    fn test_fingerprint_respects_input_globs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/index.ts", "export {}");
        let mut req = request(temp.path());
        req.inputs = vec!["src/**".to_string()];
        let before = fingerprint(&req);

        write(temp.path(), "README.md", "docs only");
        assert_eq!(before, fingerprint(&req));

        write(temp.path(), "src/extra.ts", "more");
        assert_ne!(before, fingerprint(&req));
    }

    #[test]
    fn test_fingerprint_includes_upstream() {
        let temp = TempDir::new().unwrap();
        let mut req = request(temp.path());
        let upstream = TaskId::new("core", "build");

        req.predecessors = vec![(upstream.clone(), Upstream::Fingerprinted(Fingerprint("a".into())))];
        let a = fingerprint(&req);
        req.predecessors = vec![(upstream.clone(), Upstream::Fingerprinted(Fingerprint("b".into())))];
        let b = fingerprint(&req);
        req.predecessors = vec![(upstream, Upstream::Skipped)];
        let skipped = fingerprint(&req);

        assert_ne!(a, b);
        assert_ne!(a, skipped);
    }

    #[test]
    fn test_upstream_order_irrelevant() {
        let temp = TempDir::new().unwrap();
        let mut req = request(temp.path());
        let x = (TaskId::new("a", "build"), Upstream::Skipped);
        let y = (TaskId::new("b", "build"), Upstream::Fingerprinted(Fingerprint("f".into())));

        req.predecessors = vec![x.clone(), y.clone()];
        let first = fingerprint(&req);
        req.predecessors = vec![y, x];
        assert_eq!(first, fingerprint(&req));
    }

    #[tokio::test]
    async fn test_gate_miss_store_then_hit_restores() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/index.ts", "export {}");
        let store = Arc::new(MemoryCacheStore::new());
        let gate = CacheGate::new(store.clone());
        let req = request(temp.path());

        let fingerprint = match gate.before_run(&req).await {
            CacheLookup::Miss(fp) => fp,
            other => panic!("expected miss, got {:?}", other),
        };

        write(temp.path(), "dist/index.js", "built");
        gate.after_run(&req, &fingerprint, true).await;
        assert_eq!(store.len(), 1);

        fs::remove_dir_all(temp.path().join("dist")).unwrap();
        match gate.before_run(&req).await {
            CacheLookup::Hit { restored, .. } => assert_eq!(restored, 1),
            other => panic!("expected hit, got {:?}", other),
        }
        let restored = fs::read_to_string(temp.path().join("dist/index.js")).unwrap();
        assert_eq!(restored, "built");
    }

    #[tokio::test]
    async fn test_gate_never_stores_failures_or_uncacheable() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryCacheStore::new());
        let gate = CacheGate::new(store.clone());

        let req = request(temp.path());
        let fp = fingerprint(&req);
        gate.after_run(&req, &fp, false).await;
        assert!(store.is_empty());

        let mut persistent = request(temp.path());
        persistent.cacheable = false;
        gate.after_run(&persistent, &fp, true).await;
        assert!(store.is_empty());
        assert!(matches!(gate.before_run(&persistent).await, CacheLookup::Miss(_)));
    }

    #[tokio::test]
    async fn test_gate_store_errors_degrade_to_miss() {
        let temp = TempDir::new().unwrap();
        let gate = CacheGate::new(Arc::new(FailingStore));
        let req = request(temp.path());

        let lookup = gate.before_run(&req).await;
        let CacheLookup::Miss(fp) = lookup else {
            panic!("expected miss, got {:?}", lookup);
        };
        // Must not panic or propagate
        gate.after_run(&req, &fp, true).await;
    }

    #[tokio::test]
    async fn test_gate_bypasses_unknown_upstream() {
        let temp = TempDir::new().unwrap();
        let gate = CacheGate::new(Arc::new(MemoryCacheStore::new()));
        let mut req = request(temp.path());
        req.predecessors = vec![(TaskId::new("core", "build"), Upstream::Unknown)];
        assert_eq!(gate.before_run(&req).await, CacheLookup::Bypass);
    }

    #[test]
    fn test_fs_store_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = FsCacheStore::new(temp.path().join("cache"));
        let fp = Fingerprint("abc123".to_string());

        assert!(store.get(&fp).unwrap().is_none());

        let mut outputs = CachedOutputs {
            task_id: Some(TaskId::new("web", "build")),
            ..Default::default()
        };
        outputs.files.insert("dist/app.js".to_string(), b"console.log(1)".to_vec());
        store.put(&fp, &outputs).unwrap();
        // Duplicate writes are harmless overwrites
        store.put(&fp, &outputs).unwrap();

        assert_eq!(store.get(&fp).unwrap(), Some(outputs));
        let stats = store.status().unwrap();
        assert_eq!(stats.entries, 1);
        assert!(stats.total_size > 0);
    }

    #[test]
    fn test_fs_store_prune_and_clean() {
        let temp = TempDir::new().unwrap();
        let store = FsCacheStore::new(temp.path().join("cache"));
        store
            .put(&Fingerprint("one".to_string()), &CachedOutputs::default())
            .unwrap();

        let stats = store.prune(Duration::from_secs(3600)).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.kept, 1);

        let stats = store.prune(Duration::ZERO).unwrap();
        assert_eq!(stats.removed, 1);

        store
            .put(&Fingerprint("two".to_string()), &CachedOutputs::default())
            .unwrap();
        assert_eq!(store.clean().unwrap(), 1);
        assert_eq!(store.status().unwrap().entries, 0);
    }

    #[test]
    fn test_safe_join_rejects_escapes() {
        let dir = Path::new("/repo/web");
        assert!(safe_join(dir, "dist/a.js").is_ok());
        assert!(matches!(
            safe_join(dir, "../secrets"),
            Err(CacheError::InvalidPath(_))
        ));
        assert!(safe_join(dir, "/etc/passwd").is_err());
    }

    #[test]
    fn test_cache_status_empty() {
        let temp = TempDir::new().unwrap();
        let store = FsCacheStore::new(temp.path().join("cache"));

        let stats = store.status().unwrap();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_size, 0);
    }

    #[test]
    fn test_cache_stats_formatted_size() {
        let stats = CacheStats {
            entries: 0,
            total_size: 1536,
        };
        assert_eq!(stats.formatted_size(), "1.5 KB");

        let stats = CacheStats {
            entries: 0,
            total_size: 500,
        };
        assert_eq!(stats.formatted_size(), "500 B");
    }
}
