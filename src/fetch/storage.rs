// Purpose: Materialize fetched sources into per-key folders on disk.
// Inputs/Outputs: Downloads or copies a source into a hashed subdirectory of the storage root.
// Invariants: One subdirectory per canonical key; mutation happens under an exclusive lock.
// Gotchas: File-open flags on the lock file matter for Windows compatibility.

use anyhow::{Context, bail};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;

/// The fetch-and-locate abstraction the compiler works against.
pub trait Storage {
    /// Downloads or refreshes the content for `key` from `source`. When
    /// `update` is false, existing content is left as is.
    fn get(&self, key: &str, source: &str, update: bool) -> anyhow::Result<()>;

    /// Returns the local directory for `key` and whether it exists yet.
    fn dir(&self, key: &str) -> anyhow::Result<(PathBuf, bool)>;
}

/// Stores each key under `<root>/<sha256(key)>`.
pub struct FolderStorage {
    storage_dir: PathBuf,
}

impl FolderStorage {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }
}

pub fn key_hash(key: &str) -> String {
    let mut h = Sha256::new();
    h.update(key.as_bytes());
    hex::encode(h.finalize())
}

pub fn ensure_dir(p: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(p)?;
    Ok(())
}

pub struct StorageLock {
    _file: File,
}

impl StorageLock {
    // Precondition: Inputs satisfy semantic and structural invariants expected by this API.
    // Postcondition: Returns a value/state transition that preserves module invariants.
    // Side effects: May read/write filesystem, caches, diagnostics, globals, or process state.
    pub fn acquire(root: &Path) -> anyhow::Result<Self> {
        ensure_dir(root)?;
        let lock_path = root.join("storage.lock");
        let f = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        f.lock_exclusive()?;
        Ok(Self { _file: f })
    }
}

impl Storage for FolderStorage {
    fn get(&self, key: &str, source: &str, update: bool) -> anyhow::Result<()> {
        let _guard = StorageLock::acquire(&self.storage_dir)?;
        let dst = self.storage_dir.join(key_hash(key));

        if let Some(path) = source.strip_prefix("file://") {
            let src = Path::new(path);
            if !src.is_dir() {
                bail!("source directory {} does not exist", src.display());
            }
            if dst.exists() {
                if !update {
                    return Ok(());
                }
                fs::remove_dir_all(&dst)
                    .with_context(|| format!("clear {}", dst.display()))?;
            }
            copy_tree(src, &dst)?;
            return Ok(());
        }

        if let Some(url) = git_url(source) {
            if dst.join(".git").exists() {
                if update {
                    run_git(&["-C", path_str(&dst)?, "pull", "--ff-only"])?;
                }
                return Ok(());
            }
            run_git(&["clone", &url, path_str(&dst)?])?;
            return Ok(());
        }

        bail!("no fetcher available for source {source}")
    }

    fn dir(&self, key: &str) -> anyhow::Result<(PathBuf, bool)> {
        let dir = self.storage_dir.join(key_hash(key));
        let found = dir.is_dir();
        Ok((dir, found))
    }
}

fn git_url(source: &str) -> Option<String> {
    if let Some(url) = source.strip_prefix("git::") {
        return Some(url.to_string());
    }
    if source.ends_with(".git") {
        return Some(source.to_string());
    }
    None
}

fn path_str(p: &Path) -> anyhow::Result<&str> {
    p.to_str()
        .with_context(|| format!("non-utf8 path {}", p.display()))
}

fn run_git(args: &[&str]) -> anyhow::Result<String> {
    let out = Command::new("git")
        .args(args)
        .output()
        .context("failed to execute git")?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        bail!("git {:?} failed: {}", args, stderr);
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    ensure_dir(dst)?;
    for ent in fs::read_dir(src).with_context(|| format!("read_dir {}", src.display()))? {
        let ent = ent?;
        let from = ent.path();
        let to = dst.join(ent.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("copy {} to {}", from.display(), to.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{FolderStorage, Storage, key_hash};
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time drift")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "appc-storage-{}-{}-{}",
            prefix,
            std::process::id(),
            nonce
        ));
        fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn get_copies_file_sources() {
        let root = temp_dir("copy");
        let src = root.join("src");
        fs::create_dir_all(src.join("sub")).expect("mkdir");
        fs::write(src.join("Appfile"), "x = 1\n").expect("write");
        fs::write(src.join("sub/data"), "nested").expect("write");

        let storage = FolderStorage::new(root.join("store"));
        let key = format!("file://{}", src.display());
        storage.get(&key, &key, true).expect("get");

        let (dir, found) = storage.dir(&key).expect("dir");
        assert!(found);
        assert_eq!(fs::read_to_string(dir.join("Appfile")).expect("read"), "x = 1\n");
        assert_eq!(fs::read_to_string(dir.join("sub/data")).expect("read"), "nested");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn update_replaces_stale_content() {
        let root = temp_dir("update");
        let src = root.join("src");
        fs::create_dir_all(&src).expect("mkdir");
        fs::write(src.join("Appfile"), "old").expect("write");

        let storage = FolderStorage::new(root.join("store"));
        let key = format!("file://{}", src.display());
        storage.get(&key, &key, true).expect("get");

        fs::write(src.join("Appfile"), "new").expect("write");
        storage.get(&key, &key, false).expect("get");
        let (dir, _) = storage.dir(&key).expect("dir");
        assert_eq!(fs::read_to_string(dir.join("Appfile")).expect("read"), "old");

        storage.get(&key, &key, true).expect("get");
        assert_eq!(fs::read_to_string(dir.join("Appfile")).expect("read"), "new");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_key_is_not_found() {
        let root = temp_dir("missing");
        let storage = FolderStorage::new(root.join("store"));
        let (_, found) = storage.dir("file:///nope").expect("dir");
        assert!(!found);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_file_source_is_an_error() {
        let root = temp_dir("badsrc");
        let storage = FolderStorage::new(root.join("store"));
        let key = format!("file://{}", root.join("absent").display());
        assert!(storage.get(&key, &key, true).is_err());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unknown_scheme_is_an_error() {
        let root = temp_dir("scheme");
        let storage = FolderStorage::new(root.join("store"));
        assert!(storage.get("ftp://x", "ftp://x", true).is_err());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn keys_hash_to_distinct_folders() {
        assert_ne!(key_hash("file:///a"), key_hash("file:///b"));
    }
}
