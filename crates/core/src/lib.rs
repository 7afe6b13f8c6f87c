//! Domain core of the script manager: the script contract, discovery of
//! script modules, the execution state machine and the engine that runs
//! queued executions.
//!
//! Storage and queueing are reached through the traits in [`store`] and
//! [`queue`]; [`memory`] provides in-process implementations of both.

pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod form;
pub mod manager;
pub mod memory;
pub mod models;
pub mod params;
pub mod queue;
pub mod registry;
pub mod script;
pub mod scripting;
pub mod status;
pub mod store;
pub mod types;

pub use engine::{Engine, RunOutcome};
pub use error::{CoreError, CoreResult};
pub use manager::{LoadReport, ScriptManager, SubmitRequest};
pub use script::{Script, ScriptContext, ScriptFailure, ScriptMetadata};
