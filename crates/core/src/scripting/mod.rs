//! Child-process runtimes for manifest-declared scripts.
//!
//! Each runtime spawns the script's entrypoint with a JSON envelope on
//! stdin. [`external::ExternalScript`] adapts the process to the
//! [`Script`](crate::script::Script) contract by reading the JSON-lines
//! protocol it writes to stdout.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod binary;
pub mod external;
pub mod process;
pub mod python;
pub mod shell;
pub mod subprocess;

/// How an external script's entrypoint is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// Executed via `bash`.
    Shell,
    /// Executed via `python3`, inside a venv when requirements are declared.
    Python,
    /// Executed directly.
    Binary,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Python => "python",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
