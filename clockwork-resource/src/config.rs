use crate::ResourceResult;
use clockwork_base::hashing::HashMap;
use clockwork_base::ResourceTypeId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_FINISH_BACKGROUND_RESOURCES_MS: u64 = 5;
const DEFAULT_WORKER_THREAD_NAME: &str = "Resource Background Loader";

// The on-disk format. Every field is optional, paths are relative to the file.
#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourceCacheConfigJson {
    pub finish_background_resources_ms: Option<u64>,
    pub resource_dirs: Vec<String>,
    pub worker_thread_name: Option<String>,
    pub memory_budgets: HashMap<ResourceTypeId, usize>,
}

#[derive(Debug, Clone)]
pub struct ResourceCacheConfig {
    // Time budget for finalizing background loads in each update()
    pub finish_background_resources_ms: u64,

    // Directories searched for resources, highest priority first
    pub resource_dirs: Vec<PathBuf>,

    pub worker_thread_name: String,

    // Per-type memory budgets in bytes. Types not listed are unlimited.
    pub memory_budgets: HashMap<ResourceTypeId, usize>,
}

impl Default for ResourceCacheConfig {
    fn default() -> Self {
        ResourceCacheConfig {
            finish_background_resources_ms: DEFAULT_FINISH_BACKGROUND_RESOURCES_MS,
            resource_dirs: Default::default(),
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
            memory_budgets: Default::default(),
        }
    }
}

impl ResourceCacheConfig {
    pub fn finish_background_resources_budget(&self) -> Duration {
        Duration::from_millis(self.finish_background_resources_ms)
    }

    fn absolute_path(
        root_path: &Path,
        json_path: &str,
    ) -> PathBuf {
        if Path::new(json_path).is_absolute() {
            PathBuf::from(json_path)
        } else {
            root_path.join(json_path)
        }
    }

    pub fn from_json(
        root_path: &Path,
        json: ResourceCacheConfigJson,
    ) -> Self {
        let defaults = ResourceCacheConfig::default();
        ResourceCacheConfig {
            finish_background_resources_ms: json
                .finish_background_resources_ms
                .unwrap_or(defaults.finish_background_resources_ms),
            resource_dirs: json
                .resource_dirs
                .iter()
                .map(|dir| Self::absolute_path(root_path, dir))
                .collect(),
            worker_thread_name: json
                .worker_thread_name
                .unwrap_or(defaults.worker_thread_name),
            memory_budgets: json.memory_budgets,
        }
    }

    pub fn read_from_path(path: &Path) -> ResourceResult<Self> {
        let root_path = path.parent().unwrap_or_else(|| Path::new(""));
        let file_contents = std::fs::read_to_string(path)?;
        let json: ResourceCacheConfigJson = serde_json::from_str(&file_contents)?;
        Ok(Self::from_json(root_path, json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(&path, "{}").unwrap();

        let config = ResourceCacheConfig::read_from_path(&path).unwrap();
        assert_eq!(config.finish_background_resources_ms, 5);
        assert_eq!(config.worker_thread_name, "Resource Background Loader");
        assert!(config.resource_dirs.is_empty());
        assert!(config.memory_budgets.is_empty());
    }

    #[test]
    fn paths_are_relative_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(
            &path,
            r#"{
                "finish_background_resources_ms": 10,
                "resource_dirs": ["Data", "CoreData"],
                "memory_budgets": { "8f2a7a3e-3b5f-4a8e-9a43-6f1f4b1f2c01": 4096 }
            }"#,
        )
        .unwrap();

        let config = ResourceCacheConfig::read_from_path(&path).unwrap();
        assert_eq!(config.finish_background_resources_budget(), Duration::from_millis(10));
        assert_eq!(
            config.resource_dirs,
            vec![dir.path().join("Data"), dir.path().join("CoreData")]
        );

        let texture_type =
            ResourceTypeId::parse_str("8f2a7a3e-3b5f-4a8e-9a43-6f1f4b1f2c01").unwrap();
        assert_eq!(config.memory_budgets.get(&texture_type), Some(&4096));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ResourceCacheConfig::read_from_path(&path),
            Err(crate::ResourceError::JsonError(_))
        ));
        assert!(matches!(
            ResourceCacheConfig::read_from_path(&dir.path().join("missing.json")),
            Err(crate::ResourceError::IoError(_))
        ));
    }
}
