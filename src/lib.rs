pub mod client;
pub mod config;
pub mod deploy;
pub mod error;
pub mod model;
pub mod server;

pub use error::{Error, Result};
