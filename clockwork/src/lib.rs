#[cfg(feature = "clockwork-base")]
pub use clockwork_base as base;

#[cfg(feature = "clockwork-resource")]
pub use clockwork_resource as resource;
