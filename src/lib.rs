pub mod collaborators;
pub mod collections;
pub mod communication_log;
pub mod config;
pub mod context;
pub mod cycle;
pub mod error;
pub mod obligations;
pub mod routes;
pub mod run_log;
pub mod runs_api;
pub mod scheduler;

pub use context::{EngineContext, RunClock};
