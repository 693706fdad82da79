pub mod archive;
pub mod collect;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod logging;
pub mod merge;
pub mod pipeline;
pub mod request;
pub mod summary;
pub mod toolchain;
pub mod workspace;

pub use error::{Error, ErrorCode, Result};
