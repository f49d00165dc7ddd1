use clockwork_base::ResourceTypeId;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ResourceError {
    // Resource-specific failures, usually raised by a parse routine
    StringError(String),
    EmptyName,
    UnknownType(ResourceTypeId),
    NotFound(String),
    IoError(Arc<std::io::Error>),
    BincodeError(Arc<bincode::Error>),
    JsonError(Arc<serde_json::Error>),
    DependencyCycle(String),
    LoadFailed(String),
    // A manual resource was added for a key that is still being loaded
    InFlight(String),
    TypeMismatch {
        name: String,
        expected: &'static str,
    },
    WorkerSpawnFailed(Arc<std::io::Error>),
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            ResourceError::StringError(_) => None,
            ResourceError::EmptyName => None,
            ResourceError::UnknownType(_) => None,
            ResourceError::NotFound(_) => None,
            ResourceError::IoError(ref e) => Some(&**e),
            ResourceError::BincodeError(ref e) => Some(&**e),
            ResourceError::JsonError(ref e) => Some(&**e),
            ResourceError::DependencyCycle(_) => None,
            ResourceError::LoadFailed(_) => None,
            ResourceError::InFlight(_) => None,
            ResourceError::TypeMismatch { .. } => None,
            ResourceError::WorkerSpawnFailed(ref e) => Some(&**e),
        }
    }
}

impl core::fmt::Display for ResourceError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            ResourceError::StringError(ref e) => e.fmt(fmt),
            ResourceError::EmptyName => "Resource name is empty".fmt(fmt),
            ResourceError::UnknownType(ref resource_type) => {
                write!(fmt, "Unknown resource type {}", resource_type)
            }
            ResourceError::NotFound(ref name) => write!(fmt, "Resource {} not found", name),
            ResourceError::IoError(ref e) => e.fmt(fmt),
            ResourceError::BincodeError(ref e) => e.fmt(fmt),
            ResourceError::JsonError(ref e) => e.fmt(fmt),
            ResourceError::DependencyCycle(ref name) => {
                write!(fmt, "Resource {} is part of a dependency cycle", name)
            }
            ResourceError::LoadFailed(ref name) => {
                write!(fmt, "Failed to load resource {}", name)
            }
            ResourceError::InFlight(ref name) => {
                write!(fmt, "Resource {} is still being loaded", name)
            }
            ResourceError::TypeMismatch {
                ref name,
                expected,
            } => write!(fmt, "Resource {} is not a {}", name, expected),
            ResourceError::WorkerSpawnFailed(ref e) => {
                write!(fmt, "Could not start the background loader thread: {}", e)
            }
        }
    }
}

impl From<&str> for ResourceError {
    fn from(str: &str) -> Self {
        ResourceError::StringError(str.to_string())
    }
}

impl From<String> for ResourceError {
    fn from(string: String) -> Self {
        ResourceError::StringError(string)
    }
}

impl From<std::io::Error> for ResourceError {
    fn from(error: std::io::Error) -> Self {
        ResourceError::IoError(Arc::new(error))
    }
}

impl From<bincode::Error> for ResourceError {
    fn from(error: bincode::Error) -> Self {
        ResourceError::BincodeError(Arc::new(error))
    }
}

impl From<serde_json::Error> for ResourceError {
    fn from(error: serde_json::Error) -> Self {
        ResourceError::JsonError(Arc::new(error))
    }
}

pub type ResourceResult<T> = Result<T, ResourceError>;
