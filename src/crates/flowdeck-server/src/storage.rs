//! Project and pipeline storage
//!
//! Pipelines are JSON documents stored one file per pipeline under a
//! per-project directory: `<root>/<slug>/<name>.json`. The [`ProjectStore`]
//! trait is the seam the lifecycle and scheduler depend on;
//! [`MemoryStore`] backs the test suites.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use flowdeck_engine::Pipeline;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid project or pipeline name '{0}'")]
    InvalidName(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt pipeline document: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Summary of a stored project.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectInfo {
    pub slug: String,
}

/// Storage collaborator for pipeline documents.
pub trait ProjectStore: Send + Sync {
    fn load_pipeline(&self, slug: &str, name: &str) -> Result<Option<Pipeline>>;

    fn save_pipeline(&self, slug: &str, name: &str, pipeline: &Pipeline) -> Result<()>;

    fn list_projects(&self) -> Result<Vec<ProjectInfo>>;

    fn list_pipelines(&self, slug: &str) -> Result<Vec<String>>;
}

/// Slashes would escape the storage root; dots would collide with the
/// `.json` suffix handling.
fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.starts_with('.')
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// One JSON file per pipeline under `<root>/<slug>/`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pipeline_path(&self, slug: &str, name: &str) -> Result<PathBuf> {
        check_name(slug)?;
        check_name(name)?;
        Ok(self.root.join(slug).join(format!("{name}.json")))
    }
}

impl ProjectStore for FileStore {
    fn load_pipeline(&self, slug: &str, name: &str) -> Result<Option<Pipeline>> {
        let path = self.pipeline_path(slug, name)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save_pipeline(&self, slug: &str, name: &str, pipeline: &Pipeline) -> Result<()> {
        let path = self.pipeline_path(slug, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(pipeline)?;
        fs::write(&path, raw)?;
        Ok(())
    }

    fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut projects = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(slug) = entry.file_name().to_str() {
                    projects.push(ProjectInfo {
                        slug: slug.to_string(),
                    });
                }
            }
        }
        projects.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(projects)
    }

    fn list_pipelines(&self, slug: &str) -> Result<Vec<String>> {
        check_name(slug)?;
        let dir = self.root.join(slug);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    pipelines: Mutex<BTreeMap<(String, String), Pipeline>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectStore for MemoryStore {
    fn load_pipeline(&self, slug: &str, name: &str) -> Result<Option<Pipeline>> {
        Ok(self
            .pipelines
            .lock()
            .get(&(slug.to_string(), name.to_string()))
            .cloned())
    }

    fn save_pipeline(&self, slug: &str, name: &str, pipeline: &Pipeline) -> Result<()> {
        check_name(slug)?;
        check_name(name)?;
        self.pipelines
            .lock()
            .insert((slug.to_string(), name.to_string()), pipeline.clone());
        Ok(())
    }

    fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        let mut slugs: Vec<String> = self
            .pipelines
            .lock()
            .keys()
            .map(|(slug, _)| slug.clone())
            .collect();
        slugs.dedup();
        Ok(slugs.into_iter().map(|slug| ProjectInfo { slug }).collect())
    }

    fn list_pipelines(&self, slug: &str) -> Result<Vec<String>> {
        Ok(self
            .pipelines
            .lock()
            .keys()
            .filter(|(s, _)| s == slug)
            .map(|(_, name)| name.clone())
            .collect())
    }
}

/// The publish key for a pipeline; forward slash is the reserved separator.
pub fn pipeline_key(slug: &str, name: &str) -> String {
    format!("{slug}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdeck_engine::{NodeDef, Pipeline};
    use serde_json::json;

    fn sample_pipeline() -> Pipeline {
        Pipeline::new(
            vec![NodeDef::new("a", "grid", json!({}))],
            vec![],
        )
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(store.load_pipeline("proj", "pipe").unwrap().is_none());
        store
            .save_pipeline("proj", "pipe", &sample_pipeline())
            .unwrap();

        let loaded = store.load_pipeline("proj", "pipe").unwrap().unwrap();
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(store.list_projects().unwrap(), vec![ProjectInfo { slug: "proj".into() }]);
        assert_eq!(store.list_pipelines("proj").unwrap(), vec!["pipe"]);
    }

    #[test]
    fn test_file_store_preserves_published_flag() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let mut pipeline = sample_pipeline();
        pipeline.published = true;
        store.save_pipeline("proj", "stream", &pipeline).unwrap();
        assert!(store.load_pipeline("proj", "stream").unwrap().unwrap().published);
    }

    #[test]
    fn test_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.save_pipeline("../evil", "pipe", &sample_pipeline()),
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            store.save_pipeline("proj", "a/b", &sample_pipeline()),
            Err(StorageError::InvalidName(_))
        ));
    }

    #[test]
    fn test_list_missing_project_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.list_pipelines("nope").unwrap().is_empty());
    }

    #[test]
    fn test_pipeline_key_format() {
        assert_eq!(pipeline_key("proj", "pipe"), "proj/pipe");
    }
}
