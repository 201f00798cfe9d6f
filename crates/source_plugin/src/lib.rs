pub mod message;
pub mod plugin;

#[cfg(any(test, feature = "test-utils"))]
pub mod plugin_test_util;

pub use message::{Event, EventKind, ExternalRequestInput, PluginMetadata, RawConfig, StreamInput};
pub use plugin::{PluginError, SourcePlugin};
