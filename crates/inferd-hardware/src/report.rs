//! Hardware report assembly
//!
//! [`HardwareProbe`] runs every [`ProbeTool`] concurrently, parses whatever
//! came back, classifies the result and bundles it into a
//! [`HardwareReport`]. Nothing is cached: every call probes afresh.

use crate::classifier::{Capabilities, SignatureTable, classify};
use crate::inventory::{CpuInfo, HardwareInventory};
use crate::parser;
use crate::probe::{ProbeError, ProbeRunner, ProbeStatus, ProbeTool};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use sysinfo::Disks;

/// A mounted filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub device: String,
    pub mount_point: String,
    pub file_system: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

fn collect_disks() -> Vec<DiskInfo> {
    Disks::new_with_refreshed_list()
        .iter()
        .map(|disk| DiskInfo {
            device: disk.name().to_string_lossy().into_owned(),
            mount_point: disk.mount_point().display().to_string(),
            file_system: disk.file_system().to_string_lossy().into_owned(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
        .collect()
}

/// Recommended compiler flags for local builds on this CPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFlags {
    pub architecture: String,
    pub optimization: String,
    pub vectorization: String,
    /// Parallel make jobs, from the logical core count
    pub make_jobs: Option<usize>,
}

impl BuildFlags {
    pub fn for_cpu(cpu: &CpuInfo) -> Self {
        let architecture = if cpu.model.to_lowercase().contains("meteor lake") {
            "-march=meteorlake -mtune=meteorlake"
        } else {
            "-march=native -mtune=native"
        };
        Self {
            architecture: architecture.to_string(),
            optimization: "-O3 -flto -fomit-frame-pointer".to_string(),
            vectorization: "-ftree-vectorize -ftree-loop-vectorize -ftree-slp-vectorize"
                .to_string(),
            make_jobs: (cpu.logical_cores > 0).then_some(cpu.logical_cores),
        }
    }

    /// Value for `CFLAGS` / `CXXFLAGS`
    pub fn cflags(&self) -> String {
        format!(
            "{} {} {}",
            self.architecture, self.optimization, self.vectorization
        )
    }
}

/// Structured result of one probe run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareReport {
    pub generated_at: DateTime<Utc>,
    pub inventory: HardwareInventory,
    pub capabilities: Capabilities,
    pub storage: Vec<DiskInfo>,
    pub build_flags: BuildFlags,
    pub probes: Vec<ProbeStatus>,
}

/// Runs the probe tools and classifies the result.
pub struct HardwareProbe {
    runner: Arc<dyn ProbeRunner>,
    signatures: SignatureTable,
}

impl HardwareProbe {
    pub fn new(runner: Arc<dyn ProbeRunner>, signatures: SignatureTable) -> Self {
        Self { runner, signatures }
    }

    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    /// Run all tools and assemble an inventory. Never fails: unavailable
    /// tools are logged and reported in the status list.
    pub async fn inventory(&self) -> (HardwareInventory, Vec<ProbeStatus>) {
        let runs = ProbeTool::ALL.map(|tool| {
            let runner = Arc::clone(&self.runner);
            async move { (tool, runner.run(tool).await) }
        });
        let results = futures::future::join_all(runs).await;

        let mut parts = Vec::with_capacity(results.len());
        let mut statuses = Vec::with_capacity(results.len());
        for (tool, result) in results {
            match result {
                Ok(raw) => {
                    parts.push(parser::parse(tool, &raw));
                    statuses.push(ProbeStatus::ok(tool));
                }
                Err(e) => {
                    tracing::warn!(tool = %tool, error = %e, "probe tool unavailable");
                    statuses.push(ProbeStatus::unavailable(tool, &e));
                }
            }
        }

        (HardwareInventory::assemble(parts), statuses)
    }

    /// Probe, classify and bundle a full report.
    ///
    /// # Errors
    /// [`ProbeError::AllUnavailable`] when not a single tool produced output.
    pub async fn report(&self) -> Result<HardwareReport, ProbeError> {
        let (inventory, probes) = self.inventory().await;
        if probes.iter().all(|p| !p.available) {
            return Err(ProbeError::AllUnavailable);
        }

        let capabilities = classify(&inventory, &self.signatures);
        let storage = tokio::task::spawn_blocking(collect_disks)
            .await
            .unwrap_or_default();

        tracing::info!(
            backends = ?capabilities.available_backends,
            devices = inventory.devices.len(),
            cores = inventory.cpu.logical_cores,
            "hardware probe complete"
        );

        Ok(HardwareReport {
            generated_at: Utc::now(),
            build_flags: BuildFlags::for_cpu(&inventory.cpu),
            inventory,
            capabilities,
            storage,
            probes,
        })
    }
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

impl fmt::Display for HardwareReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inv = &self.inventory;
        writeln!(f, "Hardware report ({})", self.generated_at.to_rfc3339())?;

        writeln!(f, "\nPlatform")?;
        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".into());
        writeln!(f, "  Manufacturer: {}", or_unknown(&inv.platform.manufacturer))?;
        writeln!(f, "  Product:      {}", or_unknown(&inv.platform.product_name))?;
        writeln!(f, "  Board:        {}", or_unknown(&inv.platform.board_name))?;
        writeln!(f, "  Kind:         {:?}", self.capabilities.platform)?;

        writeln!(f, "\nCPU")?;
        writeln!(f, "  Model:  {}", inv.cpu.model)?;
        writeln!(f, "  Vendor: {}", inv.cpu.vendor)?;
        writeln!(f, "  Cores:  {}", inv.cpu.logical_cores)?;

        writeln!(f, "\nMemory")?;
        writeln!(f, "  Total:     {:.2} GB", inv.memory.total_bytes as f64 / GIB)?;
        writeln!(f, "  Available: {:.2} GB", inv.memory.available_bytes as f64 / GIB)?;

        writeln!(f, "\nBackends")?;
        for backend in &self.capabilities.available_backends {
            writeln!(f, "  - {backend}")?;
        }
        for gpu in &self.capabilities.gpus {
            writeln!(f, "  GPU {}: {}", gpu.bus_id, gpu.name)?;
        }
        for acc in &self.capabilities.accelerators {
            writeln!(f, "  {} {}: {}", acc.kind, acc.bus_id, acc.name)?;
        }

        writeln!(f, "\nStorage")?;
        for disk in &self.storage {
            writeln!(
                f,
                "  {} at {} ({:.2} GB free of {:.2} GB)",
                disk.device,
                disk.mount_point,
                disk.available_bytes as f64 / GIB,
                disk.total_bytes as f64 / GIB
            )?;
        }

        writeln!(f, "\nBuild flags")?;
        writeln!(f, "  export CFLAGS=\"{}\"", self.build_flags.cflags())?;
        writeln!(f, "  export CXXFLAGS=\"$CFLAGS\"")?;
        if let Some(jobs) = self.build_flags.make_jobs {
            writeln!(f, "  export MAKEFLAGS=\"-j{jobs}\"")?;
        }

        for probe in self.probes.iter().filter(|p| !p.available) {
            writeln!(
                f,
                "\nwarning: {} unavailable: {}",
                probe.command,
                probe.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}
