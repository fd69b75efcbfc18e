//! Digital-twin stimulus orchestration: fan stimuli out to twins, run at most
//! one behaviour per twin at a time, and publish each unit of work once every
//! behaviour it triggered has reported back.

pub mod busy;
pub mod cache;
pub mod causality;
pub mod config;
pub mod error;
pub mod forwarders;
pub mod io;
pub mod orchestrator;
pub mod ports;
pub mod queue;
mod sync;
pub mod types;

pub use config::{DispatchConfig, OrchestratorConfig};
pub use error::{Result, TwinpathError};
pub use orchestrator::{DispatcherHandle, Orchestrator, OrchestratorSnapshot};
pub use ports::{Delivery, DispatchSink, ExclusionFilter, InclusionFilter, PublishSink};
