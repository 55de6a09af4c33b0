//! Named JSON descriptors with cached-once loading.
//!
//! Each descriptor type has a file extension; the descriptor named `origin`
//! of a type with extension `repo` lives at `<dir>/origin.repo`. Loaded and
//! saved instances are cached by name; the registry is an explicit object
//! handed to the operations that need it, never a process-wide singleton.

use exn::OptionExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{ErrorKind, Result};
use crate::spec::RepoSpec;
use stowage_catalog::DatasetSchema;

/// A type that can be stored as a named JSON descriptor.
pub trait Descriptor: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// File extension for this descriptor type, without the dot.
    const EXTENSION: &'static str;

    fn name(&self) -> &str;
}

impl Descriptor for RepoSpec {
    const EXTENSION: &'static str = "repo";

    fn name(&self) -> &str {
        &self.name
    }
}

impl Descriptor for DatasetSchema {
    const EXTENSION: &'static str = "dataset";

    fn name(&self) -> &str {
        &self.name
    }
}

/// Cache-backed access to one descriptor type.
pub struct Store<T: Descriptor> {
    dir: PathBuf,
    cache: Mutex<HashMap<String, T>>,
}

impl<T: Descriptor> Store<T> {
    fn new(dir: PathBuf) -> Self {
        Self { dir, cache: Mutex::new(HashMap::new()) }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", T::EXTENSION))
    }

    /// Load a descriptor by name, or `None` if its file does not exist.
    /// Subsequent loads of the same name come from the cache.
    pub fn load(&self, name: &str) -> Result<Option<T>> {
        if let Some(cached) = self.cache.lock().expect("descriptor cache poisoned").get(name) {
            return Ok(Some(cached.clone()));
        }
        let path = self.path_for(name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        };
        let value: T =
            serde_json::from_str(&contents).map_err(|_| ErrorKind::Malformed(path.clone()))?;
        if value.name() != name {
            exn::bail!(ErrorKind::NameMismatch(path))
        }
        debug!(name, extension = T::EXTENSION, "descriptor loaded");
        self.cache
            .lock()
            .expect("descriptor cache poisoned")
            .insert(name.to_string(), value.clone());
        Ok(Some(value))
    }

    /// Load a descriptor that must exist.
    pub fn must_load(&self, name: &str) -> Result<T> {
        self.load(name)?.ok_or_raise(|| ErrorKind::NotFound(name.to_string()))
    }

    /// Write a descriptor as pretty-printed JSON and cache it.
    pub fn save(&self, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(ErrorKind::Io)?;
        let path = self.path_for(value.name());
        let json = serde_json::to_string_pretty(value)
            .map_err(|_| ErrorKind::Malformed(path.clone()))?;
        std::fs::write(&path, json).map_err(ErrorKind::Io)?;
        self.cache
            .lock()
            .expect("descriptor cache poisoned")
            .insert(value.name().to_string(), value.clone());
        Ok(())
    }

    /// Load every descriptor of this type present on disk.
    pub fn all(&self) -> Result<Vec<T>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => exn::bail!(ErrorKind::Io(err)),
        };
        let mut values = Vec::new();
        for entry in entries {
            let entry = entry.map_err(ErrorKind::Io)?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else { continue };
            let Some(name) = file_name.strip_suffix(&format!(".{}", T::EXTENSION)) else {
                continue;
            };
            if let Some(value) = self.load(name)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    fn snapshot(&self) -> HashMap<String, T> {
        self.cache.lock().expect("descriptor cache poisoned").clone()
    }

    fn restore(&self, snapshot: HashMap<String, T>) {
        *self.cache.lock().expect("descriptor cache poisoned") = snapshot;
    }
}

/// All descriptor stores rooted at one directory.
pub struct Registry {
    pub repos: Store<RepoSpec>,
    pub datasets: Store<DatasetSchema>,
}

impl Registry {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            repos: Store::new(dir.to_path_buf()),
            datasets: Store::new(dir.to_path_buf()),
        }
    }

    /// Snapshot the caches; they are restored when the guard drops. Lets
    /// tests register fixtures without leaking them into later loads.
    pub fn context(&self) -> RegistryContext<'_> {
        RegistryContext {
            registry: self,
            repos: self.repos.snapshot(),
            datasets: self.datasets.snapshot(),
        }
    }
}

pub struct RegistryContext<'a> {
    registry: &'a Registry,
    repos: HashMap<String, RepoSpec>,
    datasets: HashMap<String, DatasetSchema>,
}

impl Drop for RegistryContext<'_> {
    fn drop(&mut self) {
        self.registry.repos.restore(std::mem::take(&mut self.repos));
        self.registry.datasets.restore(std::mem::take(&mut self.datasets));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::FilestoreSpec;
    use uuid::Uuid;

    fn repo_spec(name: &str) -> RepoSpec {
        RepoSpec {
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            filestore: FilestoreSpec::Memory,
            key_format: Default::default(),
            catalog_remote: None,
        }
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        let spec = repo_spec("origin");
        registry.repos.save(&spec).unwrap();

        assert!(dir.path().join("origin.repo").exists());
        let loaded = registry.repos.must_load("origin").unwrap();
        assert_eq!(loaded.uuid, spec.uuid);
    }

    #[test]
    fn test_load_missing_is_none_and_must_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        assert!(registry.repos.load("ghost").unwrap().is_none());
        let err = registry.repos.must_load("ghost").unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_name_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        let spec = repo_spec("actual");
        let json = serde_json::to_string_pretty(&spec).unwrap();
        std::fs::write(dir.path().join("claimed.repo"), json).unwrap();

        let err = registry.repos.load("claimed").unwrap_err();
        assert!(matches!(&*err, ErrorKind::NameMismatch(_)));
    }

    #[test]
    fn test_all_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        registry.repos.save(&repo_spec("one")).unwrap();
        registry.repos.save(&repo_spec("two")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut names: Vec<_> =
            registry.repos.all().unwrap().into_iter().map(|spec| spec.name).collect();
        names.sort();
        assert_eq!(names, ["one", "two"]);
    }

    #[test]
    fn test_context_restores_cache_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path());
        registry.repos.save(&repo_spec("outer")).unwrap();

        {
            let _context = registry.context();
            registry.repos.save(&repo_spec("inner")).unwrap();
            assert!(registry.repos.load("inner").unwrap().is_some());
            // Make the inner file unreadable from disk to prove the next
            // lookup would have come from cache alone.
            std::fs::remove_file(dir.path().join("inner.repo")).unwrap();
            assert!(registry.repos.load("inner").unwrap().is_some());
        }
        // Cache reverted: with the file gone, the descriptor is gone.
        assert!(registry.repos.load("inner").unwrap().is_none());
        assert!(registry.repos.load("outer").unwrap().is_some());
    }
}
