//! Firmware introspection layer.

pub mod command;
pub mod mock;
pub mod traits;

pub use command::{CommandIntrospector, CommandIntrospectorConfig};
pub use mock::MockIntrospector;
pub use traits::{FirmwareIntrospector, IntrospectError};
