//! Drives the external assembler and linker over an emitted artifact.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use thiserror::Error;
use tracing::info;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

pub trait Toolchain {
    /// Turns `artifact` into an executable at `binary`.
    fn assemble_and_link(&self, artifact: &Path, binary: &Path) -> Result<(), BuildError>;
}

/// `nasm -felf64` followed by `ld`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NasmLd {
    pub assembler: String,
    pub linker: String,
}

impl NasmLd {
    pub fn new(config: &Config) -> Self {
        Self {
            assembler: config.assembler.clone(),
            linker: config.linker.clone(),
        }
    }

    pub fn object_path(artifact: &Path) -> PathBuf {
        artifact.with_extension("o")
    }

    pub fn assemble_command(&self, artifact: &Path, object: &Path) -> Command {
        let mut cmd = Command::new(&self.assembler);
        cmd.arg("-felf64").arg("-o").arg(object).arg(artifact);
        cmd
    }

    pub fn link_command(&self, object: &Path, binary: &Path) -> Command {
        let mut cmd = Command::new(&self.linker);
        cmd.arg("-o").arg(binary).arg(object);
        cmd
    }
}

impl Toolchain for NasmLd {
    fn assemble_and_link(&self, artifact: &Path, binary: &Path) -> Result<(), BuildError> {
        let object = Self::object_path(artifact);
        run_and_echo(self.assemble_command(artifact, &object))?;
        run_and_echo(self.link_command(&object, binary))?;
        Ok(())
    }
}

/// Echoes the command line, runs it, and fails on a nonzero exit.
pub fn run_and_echo(mut cmd: Command) -> Result<ExitStatus, BuildError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    info!("[CMD] {}", render_command(&cmd));
    let status = cmd.status().map_err(|source| BuildError::Spawn {
        program: program.clone(),
        source,
    })?;
    if status.success() {
        Ok(status)
    } else {
        Err(BuildError::Failed { program, status })
    }
}

pub fn render_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}
