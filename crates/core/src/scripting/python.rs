//! Python runtime with per-requirements virtual environments.
//!
//! Venvs live under `{venv_base_dir}/venv_{sha256(requirements)}` and are
//! reused for as long as the requirements file is unchanged.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

use super::process::{ProcessError, ProcessExecutor, ProcessInput, ProcessOutput};
use super::subprocess;

const SYSTEM_PYTHON: &str = "python3";

pub struct PythonExecutor {
    venv_base_dir: PathBuf,
    requirements: Option<PathBuf>,
}

impl PythonExecutor {
    pub fn new(venv_base_dir: impl Into<PathBuf>) -> Self {
        Self {
            venv_base_dir: venv_base_dir.into(),
            requirements: None,
        }
    }

    /// Run inside a venv with these requirements installed.
    pub fn with_requirements(mut self, requirements: Option<PathBuf>) -> Self {
        self.requirements = requirements;
        self
    }

    /// Hex SHA-256 of a requirements file's contents.
    pub async fn hash_requirements(path: &Path) -> Result<String, ProcessError> {
        let contents = fs::read(path).await?;
        Ok(format!("{:x}", Sha256::digest(&contents)))
    }

    /// Return the venv for `requirements`, creating it if needed.
    ///
    /// The venv is built in a scratch directory and renamed into place, so
    /// concurrent runs never observe a half-installed environment.
    pub async fn ensure_venv(&self, requirements: &Path) -> Result<PathBuf, ProcessError> {
        let hash = Self::hash_requirements(requirements).await?;
        let venv_dir = self.venv_base_dir.join(format!("venv_{hash}"));
        if fs::metadata(&venv_dir).await.is_ok() {
            return Ok(venv_dir);
        }

        fs::create_dir_all(&self.venv_base_dir).await?;
        let scratch = self
            .venv_base_dir
            .join(format!(".venv_{hash}.{}", Uuid::new_v4().simple()));

        tracing::info!(venv = %venv_dir.display(), "Creating Python virtual environment");

        let created = tokio::process::Command::new(SYSTEM_PYTHON)
            .arg("-m")
            .arg("venv")
            .arg(&scratch)
            .output()
            .await?;
        if !created.status.success() {
            let _ = fs::remove_dir_all(&scratch).await;
            return Err(ProcessError::Environment(format!(
                "python3 -m venv failed: {}",
                String::from_utf8_lossy(&created.stderr).trim()
            )));
        }

        let installed = tokio::process::Command::new(scratch.join("bin").join("pip"))
            .arg("install")
            .arg("-r")
            .arg(requirements)
            .output()
            .await?;
        if !installed.status.success() {
            let _ = fs::remove_dir_all(&scratch).await;
            return Err(ProcessError::Environment(format!(
                "pip install failed: {}",
                String::from_utf8_lossy(&installed.stderr).trim()
            )));
        }

        if fs::rename(&scratch, &venv_dir).await.is_err() {
            // Another run finished first; keep theirs.
            let _ = fs::remove_dir_all(&scratch).await;
            if fs::metadata(&venv_dir).await.is_err() {
                return Err(ProcessError::Environment(format!(
                    "could not move venv into {}",
                    venv_dir.display()
                )));
            }
        }
        Ok(venv_dir)
    }

    async fn interpreter(&self) -> Result<PathBuf, ProcessError> {
        match &self.requirements {
            Some(requirements) => Ok(self.ensure_venv(requirements).await?.join("bin").join("python")),
            None => Ok(PathBuf::from(SYSTEM_PYTHON)),
        }
    }
}

impl ProcessExecutor for PythonExecutor {
    async fn execute(
        &self,
        path: &Path,
        input: ProcessInput,
    ) -> Result<ProcessOutput, ProcessError> {
        if fs::metadata(path).await.is_err() {
            return Err(ProcessError::NotFound(path.display().to_string()));
        }
        let python = self.interpreter().await?;
        let mut cmd = tokio::process::Command::new(python);
        // Unbuffered, so output written before a crash is not lost.
        cmd.arg("-u").arg(path);
        subprocess::run_command(&mut cmd, input).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
