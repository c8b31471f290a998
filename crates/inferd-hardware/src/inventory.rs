//! Hardware inventory snapshot
//!
//! A [`HardwareInventory`] is assembled fresh for every probe run from the
//! [`PartialInventory`] fragments the parser extracts out of each tool's
//! output. Fields a tool could not provide stay empty or zero.

use serde::{Deserialize, Serialize};

/// CPU identity as reported by `lscpu`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    /// Marketing model name, empty when unknown
    pub model: String,
    /// Vendor identifier (`GenuineIntel`, `AuthenticAMD`, ...), empty when unknown
    pub vendor: String,
    /// Logical CPU count, 0 when unknown
    pub logical_cores: usize,
    /// Instruction set architecture (`x86_64`, `aarch64`, ...)
    pub architecture: Option<String>,
    /// Maximum advertised frequency in MHz
    pub max_mhz: Option<f64>,
}

/// System memory in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
}

impl MemoryInfo {
    /// Percentage of total memory in use, `None` when the total is unknown.
    pub fn used_percent(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some(self.used_bytes as f64 * 100.0 / self.total_bytes as f64)
    }
}

/// One line of the PCI device listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PciDevice {
    /// Bus address, e.g. `00:02.0`
    pub bus_id: String,
    /// Device class, e.g. `VGA compatible controller`
    pub class_name: String,
    /// Vendor and product description
    pub description: String,
}

impl PciDevice {
    pub fn new(
        bus_id: impl Into<String>,
        class_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            bus_id: bus_id.into(),
            class_name: class_name.into(),
            description: description.into(),
        }
    }

    /// Class and description joined the way `lspci` prints them.
    pub fn signature_text(&self) -> String {
        format!("{}: {}", self.class_name, self.description)
    }
}

/// SMBIOS platform identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub manufacturer: Option<String>,
    pub product_name: Option<String>,
    pub board_name: Option<String>,
}

/// Immutable hardware snapshot produced by one probe run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareInventory {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    /// Devices in probe-tool order; duplicates are kept
    pub devices: Vec<PciDevice>,
    pub platform: PlatformInfo,
}

impl HardwareInventory {
    /// Fold parser fragments into a snapshot. The first fragment that knows a
    /// scalar field wins; device lists are concatenated in order.
    pub fn assemble<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = PartialInventory>,
    {
        let merged = parts
            .into_iter()
            .fold(PartialInventory::default(), PartialInventory::merge);

        let total = merged.memory_total.unwrap_or(0);
        let available = merged.memory_available.unwrap_or(0);
        let used = merged
            .memory_used
            .unwrap_or_else(|| total.saturating_sub(available));

        Self {
            cpu: CpuInfo {
                model: merged.cpu_model.unwrap_or_default(),
                vendor: merged.cpu_vendor.unwrap_or_default(),
                logical_cores: merged.logical_cores.unwrap_or(0),
                architecture: merged.architecture,
                max_mhz: merged.max_mhz,
            },
            memory: MemoryInfo {
                total_bytes: total,
                available_bytes: available,
                used_bytes: used,
            },
            devices: merged.devices,
            platform: PlatformInfo {
                manufacturer: merged.manufacturer,
                product_name: merged.product_name,
                board_name: merged.board_name,
            },
        }
    }

    /// Logical core count, `None` when the CPU listing was unavailable.
    pub fn known_cores(&self) -> Option<usize> {
        (self.cpu.logical_cores > 0).then_some(self.cpu.logical_cores)
    }
}

/// Fields extracted from a single tool's output. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialInventory {
    pub cpu_model: Option<String>,
    pub cpu_vendor: Option<String>,
    pub logical_cores: Option<usize>,
    pub architecture: Option<String>,
    pub max_mhz: Option<f64>,
    pub memory_total: Option<u64>,
    pub memory_available: Option<u64>,
    pub memory_used: Option<u64>,
    pub devices: Vec<PciDevice>,
    pub manufacturer: Option<String>,
    pub product_name: Option<String>,
    pub board_name: Option<String>,
}

impl PartialInventory {
    pub fn is_empty(&self) -> bool {
        *self == PartialInventory::default()
    }

    /// Combine two fragments, keeping `self`'s values where both are set.
    pub fn merge(mut self, other: PartialInventory) -> Self {
        self.cpu_model = self.cpu_model.or(other.cpu_model);
        self.cpu_vendor = self.cpu_vendor.or(other.cpu_vendor);
        self.logical_cores = self.logical_cores.or(other.logical_cores);
        self.architecture = self.architecture.or(other.architecture);
        self.max_mhz = self.max_mhz.or(other.max_mhz);
        self.memory_total = self.memory_total.or(other.memory_total);
        self.memory_available = self.memory_available.or(other.memory_available);
        self.memory_used = self.memory_used.or(other.memory_used);
        self.devices.extend(other.devices);
        self.manufacturer = self.manufacturer.or(other.manufacturer);
        self.product_name = self.product_name.or(other.product_name);
        self.board_name = self.board_name.or(other.board_name);
        self
    }
}
