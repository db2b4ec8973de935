pub mod config;
pub mod contracts;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
