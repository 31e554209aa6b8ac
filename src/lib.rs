pub mod client;
pub mod config;
pub mod error;
pub mod filesystem;

pub use error::{Error, Result};
