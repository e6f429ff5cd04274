//! Storage handle resolution
//!
//! **Responsibilities:**
//! - Obtain the storage root from a [`StorageHost`] and cache it in an
//!   explicit session context ([`HandleResolver`])
//! - Re-acquire a rejected root exactly once, then surface `Permission`
//! - Open, create, list, and remove containers and files under the root
//! - Scoped whole-file writes through [`WritableFile`]: content goes to a
//!   swap file that replaces the target only on `close`
//!
//! All `std::io::Error`s are re-classified here via [`Error::from_io`].

use crate::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Suffix of in-flight swap files; never listed as partitions
const SWAP_SUFFIX: &str = ".crswap";

/// Environment that grants access to a storage root
#[async_trait]
pub trait StorageHost: Send + Sync {
    /// Ask the environment for the root directory
    ///
    /// Returns `Permission` when access is denied.
    async fn request_root(&self) -> Result<PathBuf>;

    /// Whether a previously granted root can still be used
    async fn is_valid(&self, root: &RootHandle) -> bool {
        tokio::fs::metadata(root.path())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Application-private storage: a data directory created on demand
#[derive(Debug, Clone)]
pub struct PrivateStorage {
    base: PathBuf,
}

impl PrivateStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl StorageHost for PrivateStorage {
    async fn request_root(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.base)
            .await
            .map_err(|e| Error::from_io(e, self.base.display()))?;
        Ok(self.base.clone())
    }

    fn describe(&self) -> String {
        format!("private storage at {}", self.base.display())
    }
}

/// A user-granted directory; it must already exist and be writable
#[derive(Debug, Clone)]
pub struct GrantedDirectory {
    path: PathBuf,
}

impl GrantedDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StorageHost for GrantedDirectory {
    async fn request_root(&self) -> Result<PathBuf> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            Error::Permission(format!("directory {} not granted: {}", self.path.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(Error::Permission(format!(
                "{} is not a directory",
                self.path.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(Error::Permission(format!(
                "directory {} is read-only",
                self.path.display()
            )));
        }
        Ok(self.path.clone())
    }

    fn describe(&self) -> String {
        format!("granted directory {}", self.path.display())
    }
}

/// Handle to the storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHandle {
    path: PathBuf,
    generation: u64,
}

/// Handle to a named directory under the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    path: PathBuf,
}

/// Handle to a named file inside a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    path: PathBuf,
}

/// Buffered whole-file writer
///
/// Nothing touches the target until [`WritableFile::close`]; dropping the
/// writer without closing it discards the buffered content.
#[derive(Debug)]
pub struct WritableFile {
    target: PathBuf,
    buffer: String,
}

impl RootHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquisition counter; a re-acquired root has a higher generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open or create the container `name`
    pub async fn get_or_create_container(&self, name: &str) -> Result<ContainerHandle> {
        let path = self.path.join(validate_name(name)?);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| Error::from_io(e, name))?;
        Ok(ContainerHandle { path })
    }

    /// Open the existing container `name`
    pub async fn get_container(&self, name: &str) -> Result<ContainerHandle> {
        let path = self.path.join(validate_name(name)?);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::from_io(e, name))?;
        if !metadata.is_dir() {
            return Err(Error::Storage(format!("{} is not a container", name)));
        }
        Ok(ContainerHandle { path })
    }

    /// Remove container `name` and everything in it
    pub async fn remove_container(&self, name: &str) -> Result<()> {
        let path = self.path.join(validate_name(name)?);
        tokio::fs::remove_dir_all(&path)
            .await
            .map_err(|e| Error::from_io(e, name))
    }
}

impl ContainerHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open file `name`, creating it empty when `create` is set
    pub async fn get_file(&self, name: &str, create: bool) -> Result<FileHandle> {
        let path = self.path.join(validate_name(name)?);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(FileHandle { path }),
            Ok(_) => Err(Error::Storage(format!("{} is not a file", name))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create => {
                tokio::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&path)
                    .await
                    .map_err(|e| Error::from_io(e, name))?;
                Ok(FileHandle { path })
            }
            Err(e) => Err(Error::from_io(e, name)),
        }
    }

    /// Remove file `name`; `NotFound` when absent
    pub async fn remove(&self, name: &str) -> Result<()> {
        let path = self.path.join(validate_name(name)?);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Error::from_io(e, name))
    }

    /// Names of the regular files in this container, sorted
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| Error::from_io(e, self.path.display()))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::from_io(e, self.path.display()))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().to_string();
            if is_file && !name.starts_with('.') && !name.ends_with(SWAP_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

impl FileHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub async fn read_text(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::from_io(e, self.name()))
    }

    pub fn create_writable(&self) -> WritableFile {
        WritableFile {
            target: self.path.clone(),
            buffer: String::new(),
        }
    }
}

impl WritableFile {
    pub fn write(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Commit the buffered content
    ///
    /// Writes and syncs a sibling swap file, then renames it over the
    /// target. On any failure the swap file is removed and the target
    /// keeps its previous content.
    pub async fn close(self) -> Result<()> {
        let file_name = self
            .target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let swap = self
            .target
            .with_file_name(format!(".{}.{}{}", file_name, Uuid::new_v4(), SWAP_SUFFIX));

        let result = async {
            let mut file = tokio::fs::File::create(&swap).await?;
            file.write_all(self.buffer.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&swap, &self.target).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&swap).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove swap file {}: {}", swap.display(), cleanup);
                }
            }
            // The target is still there, so NotFound here means the
            // container vanished mid-write; report it as a failed write.
            return Err(match Error::from_io(e, &file_name) {
                Error::NotFound(what) => Error::Storage(format!("{}: container missing", what)),
                other => other,
            });
        }

        debug!("Committed {} bytes to {}", self.buffer.len(), file_name);
        Ok(())
    }
}

/// Explicit storage-session context
///
/// Holds the host and the cached root handle. Created once per store and
/// torn down with [`HandleResolver::close`]; there is no ambient global.
pub struct HandleResolver {
    host: Arc<dyn StorageHost>,
    cached: Mutex<Option<RootHandle>>,
    generation: AtomicU64,
}

impl HandleResolver {
    pub fn new(host: Arc<dyn StorageHost>) -> Self {
        Self {
            host,
            cached: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Return the cached root if still valid, otherwise request a new one
    ///
    /// A denied request is surfaced as `Permission` without retrying.
    pub async fn acquire_root(&self) -> Result<RootHandle> {
        let mut cached = self.cached.lock().await;

        if let Some(root) = cached.as_ref() {
            if self.host.is_valid(root).await {
                return Ok(root.clone());
            }
            warn!(
                "Cached storage root {} is no longer valid, re-acquiring",
                root.path.display()
            );
            *cached = None;
        }

        let path = self.host.request_root().await.map_err(|e| match e {
            Error::Permission(_) => e,
            other => Error::Permission(format!("{}: {}", self.host.describe(), other)),
        })?;
        let root = RootHandle {
            path,
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        };
        info!("Acquired {} (generation {})", self.host.describe(), root.generation);
        *cached = Some(root.clone());
        Ok(root)
    }

    /// Drop the cached root if it is still `stale`
    pub async fn invalidate(&self, stale: &RootHandle) {
        let mut cached = self.cached.lock().await;
        if cached.as_ref().map(|r| r.generation) == Some(stale.generation) {
            *cached = None;
        }
    }

    /// Run `op` against the root, re-acquiring once if it is rejected
    ///
    /// A second `Permission` failure is returned to the caller.
    pub async fn with_root<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(RootHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let root = self.acquire_root().await?;
        match op(root.clone()).await {
            Err(Error::Permission(reason)) => {
                warn!("Storage root rejected ({}), re-acquiring once", reason);
                self.invalidate(&root).await;
                let fresh = self.acquire_root().await?;
                match op(fresh.clone()).await {
                    Err(Error::Permission(reason)) => {
                        self.invalidate(&fresh).await;
                        Err(Error::Permission(format!(
                            "access still denied after re-acquisition: {}",
                            reason
                        )))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    pub async fn cached_root(&self) -> Option<RootHandle> {
        self.cached.lock().await.clone()
    }

    /// Clear the cached root (host page/process end)
    pub async fn close(&self) {
        *self.cached.lock().await = None;
    }
}

fn validate_name(name: &str) -> Result<&str> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0')
    {
        return Err(Error::InvalidInput(format!("Invalid storage name '{}'", name)));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Host that counts requests and can be told to deny them
    struct CountingHost {
        base: PathBuf,
        requests: AtomicUsize,
        deny: std::sync::atomic::AtomicBool,
    }

    impl CountingHost {
        fn new(base: PathBuf) -> Arc<Self> {
            Arc::new(Self {
                base,
                requests: AtomicUsize::new(0),
                deny: std::sync::atomic::AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl StorageHost for CountingHost {
        async fn request_root(&self) -> Result<PathBuf> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.deny.load(Ordering::SeqCst) {
                return Err(Error::Permission("user dismissed the prompt".to_string()));
            }
            Ok(self.base.clone())
        }

        fn describe(&self) -> String {
            "counting host".to_string()
        }
    }

    #[tokio::test]
    async fn test_root_is_cached_between_calls() {
        let dir = TempDir::new().unwrap();
        let host = CountingHost::new(dir.path().to_path_buf());
        let resolver = HandleResolver::new(host.clone());

        let first = resolver.acquire_root().await.unwrap();
        let second = resolver.acquire_root().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(host.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denied_request_surfaces_permission() {
        let dir = TempDir::new().unwrap();
        let host = CountingHost::new(dir.path().to_path_buf());
        host.deny.store(true, Ordering::SeqCst);
        let resolver = HandleResolver::new(host.clone());

        assert!(matches!(resolver.acquire_root().await, Err(Error::Permission(_))));
        assert!(resolver.cached_root().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_cached_root_is_reacquired() {
        let dir = TempDir::new().unwrap();
        let root_dir = dir.path().join("root");
        let resolver = HandleResolver::new(Arc::new(PrivateStorage::new(&root_dir)));

        let first = resolver.acquire_root().await.unwrap();
        tokio::fs::remove_dir_all(&root_dir).await.unwrap();

        let second = resolver.acquire_root().await.unwrap();
        assert!(second.generation() > first.generation());
        assert!(root_dir.is_dir());
    }

    #[tokio::test]
    async fn test_with_root_retries_exactly_once() {
        let dir = TempDir::new().unwrap();
        let host = CountingHost::new(dir.path().to_path_buf());
        let resolver = HandleResolver::new(host.clone());
        let attempts = AtomicUsize::new(0);

        let result = resolver
            .with_root(|root| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::Permission("revoked".to_string()))
                    } else {
                        Ok(root.generation())
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(host.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_root_surfaces_second_rejection() {
        let dir = TempDir::new().unwrap();
        let host = CountingHost::new(dir.path().to_path_buf());
        let resolver = HandleResolver::new(host.clone());
        let attempts = AtomicUsize::new(0);

        let result: Result<()> = resolver
            .with_root(|_root| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::Permission("revoked".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(Error::Permission(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(host.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_root_does_not_retry_other_errors() {
        let dir = TempDir::new().unwrap();
        let host = CountingHost::new(dir.path().to_path_buf());
        let resolver = HandleResolver::new(host.clone());

        let result: Result<()> = resolver
            .with_root(|_root| async { Err(Error::Storage("disk full".to_string())) })
            .await;

        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(host.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_granted_directory_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = GrantedDirectory::new(dir.path().join("not-granted"));
        assert!(matches!(missing.request_root().await, Err(Error::Permission(_))));

        let granted = GrantedDirectory::new(dir.path());
        assert_eq!(granted.request_root().await.unwrap(), dir.path());
    }

    #[tokio::test]
    async fn test_missing_targets_are_not_found() {
        let dir = TempDir::new().unwrap();
        let resolver = HandleResolver::new(Arc::new(PrivateStorage::new(dir.path())));
        let root = resolver.acquire_root().await.unwrap();

        assert!(root.get_container("students_data").await.unwrap_err().is_not_found());

        let container = root.get_or_create_container("students_data").await.unwrap();
        assert!(container.get_file("cs_students.csv", false).await.unwrap_err().is_not_found());
        assert!(container.remove("cs_students.csv").await.unwrap_err().is_not_found());
        assert!(root.remove_container("attendance_data").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_get_file_create_makes_empty_file() {
        let dir = TempDir::new().unwrap();
        let resolver = HandleResolver::new(Arc::new(PrivateStorage::new(dir.path())));
        let root = resolver.acquire_root().await.unwrap();
        let container = root.get_or_create_container("attendance_data").await.unwrap();

        let file = container.get_file("attendance_2025-03-21.csv", true).await.unwrap();
        assert_eq!(file.read_text().await.unwrap(), "");
        assert_eq!(container.list_files().await.unwrap(), vec!["attendance_2025-03-21.csv"]);
    }

    #[tokio::test]
    async fn test_writable_replaces_content_only_on_close() {
        let dir = TempDir::new().unwrap();
        let resolver = HandleResolver::new(Arc::new(PrivateStorage::new(dir.path())));
        let root = resolver.acquire_root().await.unwrap();
        let container = root.get_or_create_container("students_data").await.unwrap();
        let file = container.get_file("cs_students.csv", true).await.unwrap();

        let mut writer = file.create_writable();
        writer.write("a\n1\n");
        writer.close().await.unwrap();
        assert_eq!(file.read_text().await.unwrap(), "a\n1\n");

        let mut abandoned = file.create_writable();
        abandoned.write("a\n2\n");
        drop(abandoned);
        assert_eq!(file.read_text().await.unwrap(), "a\n1\n");
        assert_eq!(container.list_files().await.unwrap(), vec!["cs_students.csv"]);
    }

    #[tokio::test]
    async fn test_failed_close_leaves_no_swap_file() {
        let dir = TempDir::new().unwrap();
        let resolver = HandleResolver::new(Arc::new(PrivateStorage::new(dir.path())));
        let root = resolver.acquire_root().await.unwrap();
        let container = root.get_or_create_container("students_data").await.unwrap();
        let file = container.get_file("cs_students.csv", true).await.unwrap();

        // Replace the target with a non-empty directory so the rename fails
        tokio::fs::remove_file(file.path()).await.unwrap();
        tokio::fs::create_dir(file.path()).await.unwrap();
        tokio::fs::write(file.path().join("keep"), "kept").await.unwrap();

        let mut writer = file.create_writable();
        writer.write("a\n1\n");
        assert!(matches!(writer.close().await, Err(Error::Storage(_))));

        let leftovers: Vec<_> = std::fs::read_dir(container.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(SWAP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(std::fs::read_to_string(file.path().join("keep")).unwrap(), "kept");
    }

    #[test]
    fn test_validate_name_rejects_traversal() {
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert_eq!(validate_name("cs_students.csv").unwrap(), "cs_students.csv");
    }
}
