pub mod approval;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod executor;
pub mod io;
pub mod matcher;
pub mod paths;
pub mod registry;
pub mod reload;
pub mod rule;
pub mod store;
pub mod types;
pub mod watcher;
pub mod workflow;
pub mod workspace;

pub use error::{Result, SpecflowError};
