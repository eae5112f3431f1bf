//! Built-in backend adapters
//!
//! Production storage adapters (distributed filesystem, table service,
//! broker topics) live out of tree and implement
//! [`cygnet_core::BackendAdapter`]. The adapters here cover local use and
//! tests.

pub mod file;
pub mod memory;
pub mod stdout;

pub use cygnet_core::{BackendAdapter, BackendError};

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use stdout::StdoutBackend;
