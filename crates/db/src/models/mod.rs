//! Row structs of the script manager tables.
//!
//! Each submodule contains a `FromRow` struct matching the table row and
//! its conversion into the domain type from `scriptmgr_core`.

pub mod script_artifact;
pub mod script_execution;
pub mod script_instance;
pub mod script_job;
pub mod script_log_line;
