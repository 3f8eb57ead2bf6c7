pub mod ast;
pub mod constants;
pub mod error;
pub mod ir;
pub mod message_data;

pub use error::{Error, Result};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
