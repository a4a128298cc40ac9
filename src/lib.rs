pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod progress;
pub mod shutdown;
pub mod state;
pub mod sync;
pub mod transform;
pub mod vault;

pub use error::{Error, Result};
