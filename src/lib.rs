//! gzip streaming file API
//!
//! Compression and decompression calls on a gzip file are dispatched per
//! call to either an accelerator engine or the in-process deflate codec,
//! producing standard gzip whichever path ran.

// Expose public modules
pub mod codec;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod stream;
pub mod utils;

// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{CodecMode, ModeConfig};
    pub use crate::dispatch::{CodecPath, Direction};
    pub use crate::error::{CodecStatus, ErrorExt, GzError, GzResult};
    pub use crate::fault::{FaultChain, FaultContext, FaultHandler};
    pub use crate::stream::{StreamSession, Target};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
