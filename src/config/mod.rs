/// Configuration subsystem - Storage and display settings
///
/// This module handles loading settings from .hexrusrc files: chunk and
/// cache sizes for the document store, the undo depth and dump layout.

pub mod rc;

// Re-export public interface
pub use rc::{ConfigError, RcConfig, RcLoader, parse_size};
