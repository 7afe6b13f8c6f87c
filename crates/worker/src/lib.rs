//! Queue worker: claims due script jobs and runs them through the engine.

pub mod config;
pub mod dispatcher;
pub mod retention;
