use crate::{LoadContext, Resource, ResourceResult};
use serde::de::DeserializeOwned;
use std::io::Read;

/// Wraps a plain data type so it can be loaded as a resource without writing a parse routine.
/// The stream is decoded with bincode, and the resource is registered under the payload's own
/// type UUID.
pub struct SerializedResource<T> {
    data: Option<T>,
    memory_use: usize,
}

impl<T> Default for SerializedResource<T> {
    fn default() -> Self {
        SerializedResource {
            data: None,
            memory_use: 0,
        }
    }
}

impl<T> SerializedResource<T> {
    // Only None if the resource never finished loading, which can't be observed through the cache
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }
}

impl<T: DeserializeOwned + Send + Sync + 'static> Resource for SerializedResource<T> {
    fn begin_load(
        &mut self,
        stream: &mut dyn Read,
        _ctx: &LoadContext,
    ) -> ResourceResult<()> {
        profiling::scope!("SerializedResource::begin_load");
        let mut bytes = Vec::default();
        stream.read_to_end(&mut bytes)?;

        let data = bincode::deserialize::<T>(&bytes)?;
        self.memory_use = std::mem::size_of::<T>() + bytes.len();
        self.data = Some(data);
        Ok(())
    }

    fn memory_use(&self) -> usize {
        self.memory_use
    }
}
