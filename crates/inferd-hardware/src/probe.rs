//! OS probe tools
//!
//! Each [`ProbeTool`] is an external utility whose standard output the
//! parser understands. Tools are run with a bounded timeout; a missing
//! binary, a timeout or a non-zero exit all surface as a [`ProbeError`] that
//! callers downgrade to "no data" rather than failing the whole probe.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Default per-tool timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// The external utilities whose output feeds the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeTool {
    /// `lscpu`: CPU model, vendor, topology
    Lscpu,
    /// `free -b`: memory totals in bytes
    Free,
    /// `lspci`: PCI device listing
    Lspci,
    /// `dmidecode -s system-manufacturer`
    DmiManufacturer,
    /// `dmidecode -s system-product-name`
    DmiProduct,
    /// `dmidecode -s baseboard-product-name`
    DmiBoard,
}

impl ProbeTool {
    pub const ALL: [ProbeTool; 6] = [
        ProbeTool::Lscpu,
        ProbeTool::Free,
        ProbeTool::Lspci,
        ProbeTool::DmiManufacturer,
        ProbeTool::DmiProduct,
        ProbeTool::DmiBoard,
    ];

    pub fn program(&self) -> &'static str {
        match self {
            ProbeTool::Lscpu => "lscpu",
            ProbeTool::Free => "free",
            ProbeTool::Lspci => "lspci",
            ProbeTool::DmiManufacturer | ProbeTool::DmiProduct | ProbeTool::DmiBoard => {
                "dmidecode"
            }
        }
    }

    pub fn args(&self) -> &'static [&'static str] {
        match self {
            ProbeTool::Lscpu | ProbeTool::Lspci => &[],
            ProbeTool::Free => &["-b"],
            ProbeTool::DmiManufacturer => &["-s", "system-manufacturer"],
            ProbeTool::DmiProduct => &["-s", "system-product-name"],
            ProbeTool::DmiBoard => &["-s", "baseboard-product-name"],
        }
    }

    /// Full command line, for logs and the probe status list
    pub fn command_line(&self) -> String {
        std::iter::once(self.program())
            .chain(self.args().iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ProbeTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Why a tool produced no data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProbeError {
    #[error("`{0}` is not installed")]
    Missing(String),

    #[error("`{tool}` timed out after {timeout_ms} ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("`{tool}` exited with status {code:?}: {stderr}")]
    Failed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{0}` produced output that is not valid UTF-8")]
    InvalidOutput(String),

    #[error("could not run `{tool}`: {reason}")]
    Io { tool: String, reason: String },

    #[error("every probe tool was unavailable")]
    AllUnavailable,
}

/// Runs a probe tool and returns its standard output.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, tool: ProbeTool) -> Result<String, ProbeError>;
}

/// Spawns the real utilities with `tokio::process`.
#[derive(Debug, Clone)]
pub struct CommandProbeRunner {
    timeout: Duration,
}

impl Default for CommandProbeRunner {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl CommandProbeRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProbeRunner for CommandProbeRunner {
    async fn run(&self, tool: ProbeTool) -> Result<String, ProbeError> {
        run_program(tool.program(), tool.args(), self.timeout).await
    }
}

async fn run_program(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, ProbeError> {
    let name = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Err(_) => {
            return Err(ProbeError::Timeout {
                tool: name,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
            return Err(ProbeError::Missing(program.to_string()));
        }
        Ok(Err(e)) => {
            return Err(ProbeError::Io {
                tool: name,
                reason: e.to_string(),
            });
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(ProbeError::Failed {
            tool: name,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|_| ProbeError::InvalidOutput(name))
}

/// Outcome of one tool in a probe run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeStatus {
    pub tool: ProbeTool,
    pub command: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeStatus {
    pub fn ok(tool: ProbeTool) -> Self {
        Self {
            tool,
            command: tool.command_line(),
            available: true,
            error: None,
        }
    }

    pub fn unavailable(tool: ProbeTool, error: &ProbeError) -> Self {
        Self {
            tool,
            command: tool.command_line(),
            available: false,
            error: Some(error.to_string()),
        }
    }
}
