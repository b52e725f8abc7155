pub mod config;
pub mod error;
pub mod stats;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use store::{BanditStore, Durability, ExperimentStore};
