//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod script_artifact_repo;
pub mod script_execution_repo;
pub mod script_instance_repo;
pub mod script_job_repo;
pub mod script_log_repo;

pub use script_artifact_repo::ScriptArtifactRepo;
pub use script_execution_repo::ScriptExecutionRepo;
pub use script_instance_repo::ScriptInstanceRepo;
pub use script_job_repo::ScriptJobRepo;
pub use script_log_repo::ScriptLogRepo;
