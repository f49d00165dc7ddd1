use crate::{ResourceError, ResourceResult};
use clockwork_base::hashing::HashMap;
use clockwork_base::sanitize_resource_name;
use std::io::{BufReader, Cursor, Read};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

pub type ResourceStream = Box<dyn Read + Send>;

/// Insert position that puts a source after every existing one
pub const PRIORITY_LAST: usize = usize::MAX;

/// Somewhere resource bytes can be read from. Names passed in are already sanitized.
pub trait ResourceSource: Send + Sync {
    // Used in logs and to remove the source later
    fn name(&self) -> &str;

    fn exists(
        &self,
        name: &str,
    ) -> bool;

    /// None if this source does not have the resource, so the next source can be tried
    fn open(
        &self,
        name: &str,
    ) -> Option<std::io::Result<ResourceStream>>;
}

/// Reads resources as files relative to a root directory
pub struct DirectorySource {
    name: String,
    root_path: PathBuf,
}

impl DirectorySource {
    pub fn new<P: Into<PathBuf>>(root_path: P) -> Self {
        let root_path = root_path.into();
        DirectorySource {
            name: root_path.to_string_lossy().to_string(),
            root_path,
        }
    }
}

impl ResourceSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(
        &self,
        name: &str,
    ) -> bool {
        self.root_path.join(name).is_file()
    }

    fn open(
        &self,
        name: &str,
    ) -> Option<std::io::Result<ResourceStream>> {
        let path = self.root_path.join(name);
        if !path.is_file() {
            return None;
        }

        log::trace!("Open {:?}", path);
        Some(
            std::fs::File::open(path)
                .map(|file| -> ResourceStream { Box::new(BufReader::new(file)) }),
        )
    }
}

/// Named in-memory buffers. Lookups ignore casing like resource keys do.
pub struct MemorySource {
    name: String,
    buffers: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemorySource {
    pub fn new<S: Into<String>>(name: S) -> Self {
        MemorySource {
            name: name.into(),
            buffers: Default::default(),
        }
    }

    fn buffer_key(name: &str) -> String {
        sanitize_resource_name(name).to_lowercase()
    }

    pub fn insert<B: Into<Vec<u8>>>(
        &self,
        name: &str,
        bytes: B,
    ) {
        let bytes: Vec<u8> = bytes.into();
        let bytes: Arc<[u8]> = bytes.into();
        self.buffers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(Self::buffer_key(name), bytes);
    }

    pub fn remove(
        &self,
        name: &str,
    ) -> bool {
        self.buffers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&Self::buffer_key(name))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.buffers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(
        &self,
        name: &str,
    ) -> bool {
        self.buffers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&Self::buffer_key(name))
    }

    fn open(
        &self,
        name: &str,
    ) -> Option<std::io::Result<ResourceStream>> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        let bytes = buffers.get(&Self::buffer_key(name))?.clone();
        Some(Ok(Box::new(Cursor::new(bytes))))
    }
}

/// Sources in search order, first match wins
#[derive(Default)]
pub struct ResourceSources {
    sources: Vec<Arc<dyn ResourceSource>>,
}

impl ResourceSources {
    pub fn add(
        &mut self,
        source: Arc<dyn ResourceSource>,
        priority: usize,
    ) {
        let index = priority.min(self.sources.len());
        log::debug!("Add resource source {} at priority {}", source.name(), index);
        self.sources.insert(index, source);
    }

    pub fn remove(
        &mut self,
        name: &str,
    ) -> bool {
        let count_before = self.sources.len();
        self.sources.retain(|source| source.name() != name);
        count_before != self.sources.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|source| source.name().to_string())
            .collect()
    }

    pub fn exists(
        &self,
        name: &str,
    ) -> bool {
        self.sources.iter().any(|source| source.exists(name))
    }

    pub fn open(
        &self,
        name: &str,
    ) -> ResourceResult<ResourceStream> {
        for source in &self.sources {
            if let Some(result) = source.open(name) {
                return result.map_err(ResourceError::from);
            }
        }

        Err(ResourceError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mut stream: ResourceStream) -> String {
        let mut contents = String::default();
        stream.read_to_string(&mut contents).unwrap();
        contents
    }

    #[test]
    fn memory_source_ignores_case_and_separators() {
        let source = MemorySource::new("memory");
        source.insert("Textures/Stone.png", "stone");
        assert!(source.exists("textures/stone.png"));
        assert!(source.exists("Textures\\Stone.png"));
        assert!(!source.exists("Textures/Grass.png"));
        assert_eq!(
            read_all(source.open("TEXTURES/STONE.PNG").unwrap().unwrap()),
            "stone"
        );
        assert!(source.remove("textures/stone.png"));
        assert!(source.is_empty());
    }

    #[test]
    fn earlier_sources_win() {
        let low = Arc::new(MemorySource::new("low"));
        low.insert("a.txt", "low");
        low.insert("b.txt", "only low");
        let high = Arc::new(MemorySource::new("high"));
        high.insert("a.txt", "high");

        let mut sources = ResourceSources::default();
        sources.add(low, PRIORITY_LAST);
        sources.add(high, 0);
        assert_eq!(sources.names(), vec!["high", "low"]);

        assert_eq!(read_all(sources.open("a.txt").unwrap()), "high");
        assert_eq!(read_all(sources.open("b.txt").unwrap()), "only low");
        assert!(matches!(
            sources.open("c.txt"),
            Err(ResourceError::NotFound(_))
        ));

        assert!(sources.remove("high"));
        assert!(!sources.remove("high"));
        assert_eq!(read_all(sources.open("a.txt").unwrap()), "low");
    }

    #[test]
    fn directory_source_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Materials")).unwrap();
        std::fs::write(dir.path().join("Materials/Stone.xml"), "material").unwrap();

        let source = DirectorySource::new(dir.path());
        assert!(source.exists("Materials/Stone.xml"));
        assert!(!source.exists("Materials"));
        assert!(source.open("Materials/Missing.xml").is_none());
        assert_eq!(
            read_all(source.open("Materials/Stone.xml").unwrap().unwrap()),
            "material"
        );
    }
}
