pub mod types;
pub mod streaming;

pub use streaming::*;
