use crate::ResourceError;
use clockwork_base::ResourceTypeId;
use crossbeam_channel::Sender;

#[derive(Debug, Clone)]
pub enum ResourceEvent {
    // Parsing or finalizing failed, or the resource could not be found
    LoadFailed {
        resource_type: ResourceTypeId,
        name: String,
        error: ResourceError,
    },
    // Requested a type with no registered factory
    UnknownResourceType {
        resource_type: ResourceTypeId,
        name: String,
    },
    // A background load finished, successfully or not
    BackgroundLoaded {
        resource_type: ResourceTypeId,
        name: String,
        success: bool,
    },
}

#[derive(Default, Clone)]
pub(crate) struct EventSink {
    tx: Option<Sender<ResourceEvent>>,
}

impl EventSink {
    pub fn new(tx: Option<Sender<ResourceEvent>>) -> Self {
        EventSink { tx }
    }

    pub fn send(
        &self,
        event: ResourceEvent,
    ) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is listening anymore
            if tx.send(event).is_err() {
                log::trace!("Resource event receiver disconnected");
            }
        }
    }
}
