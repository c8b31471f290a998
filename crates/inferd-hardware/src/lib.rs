//! # inferd-hardware
//!
//! Host hardware probing for inferd.
//!
//! The crate turns the text output of standard Linux utilities (`lscpu`,
//! `free`, `lspci`, `dmidecode`) into a [`HardwareInventory`], then classifies
//! its PCI devices into the compute backends the inference engine can target:
//!
//! | Backend | Detected from |
//! |---------|---------------|
//! | `CPU`   | always present |
//! | `GPU`   | Intel VGA / display controllers |
//! | `NPU`   | processing accelerators carrying an NPU marker |
//! | `GNA`   | Gaussian & Neural-Network Accelerator |
//!
//! Tool failures never abort a probe: the affected inventory fields stay
//! empty and the failure is listed in the report.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inferd_hardware::{CommandProbeRunner, HardwareProbe, SignatureTable};
//!
//! #[tokio::main]
//! async fn main() {
//!     let probe = HardwareProbe::new(
//!         Arc::new(CommandProbeRunner::default()),
//!         SignatureTable::default(),
//!     );
//!     let report = probe.report().await.expect("at least one probe tool");
//!     println!("{:?}", report.capabilities.available_backends);
//! }
//! ```

pub mod backend;
pub mod classifier;
pub mod inventory;
pub mod parser;
pub mod probe;
pub mod report;

pub use backend::BackendKind;
pub use classifier::{
    Capabilities, DetectedDevice, PlatformKind, Signature, SignatureError, SignatureTable,
    classify,
};
pub use inventory::{CpuInfo, HardwareInventory, MemoryInfo, PartialInventory, PciDevice, PlatformInfo};
pub use probe::{
    CommandProbeRunner, DEFAULT_PROBE_TIMEOUT, ProbeError, ProbeRunner, ProbeStatus, ProbeTool,
};
pub use report::{BuildFlags, DiskInfo, HardwareProbe, HardwareReport};
