//! Device classifier
//!
//! Maps PCI device descriptions to backend kinds through an ordered table of
//! substring [`Signature`]s. The table is plain serde data so deployments can
//! extend it from a configuration file without touching the provisioning
//! code. Matching is case-insensitive; the first matching signature wins and a
//! device contributes to at most one backend kind.
//!
//! Accelerator detection is best-effort. A missing entry means the engine
//! will simply fail to initialise that backend and fallback moves on.

use crate::backend::BackendKind;
use crate::inventory::{HardwareInventory, PciDevice, PlatformInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// One substring rule: a device whose `class: description` text contains
/// every marker in `all_of` is classified as `backend`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub backend: BackendKind,
    pub all_of: Vec<String>,
}

impl Signature {
    pub fn new(backend: BackendKind, markers: &[&str]) -> Self {
        Self {
            backend,
            all_of: markers.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn matches(&self, haystack_lower: &str) -> bool {
        self.all_of
            .iter()
            .all(|marker| haystack_lower.contains(&marker.to_lowercase()))
    }
}

/// Invalid signature table entries
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature #{0} has no markers and would match every device")]
    NoMarkers(usize),

    #[error("signature #{index} maps to {backend}, which is not a physical device class")]
    NotADevice { index: usize, backend: BackendKind },
}

/// Ordered signature table plus platform identity markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureTable {
    pub signatures: Vec<Signature>,
    /// Product-name markers identifying small-form-factor Intel platforms
    #[serde(default = "default_platform_markers")]
    pub platform_markers: Vec<String>,
}

fn default_platform_markers() -> Vec<String> {
    vec!["NUC".to_string(), "Compute Stick".to_string()]
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self {
            signatures: vec![
                Signature::new(BackendKind::Gpu, &["VGA compatible controller", "Intel"]),
                Signature::new(BackendKind::Gpu, &["Display controller", "Intel"]),
                Signature::new(BackendKind::Npu, &["Processing accelerators", "NPU"]),
                Signature::new(BackendKind::Gna, &["Gaussian & Neural-Network Accelerator"]),
            ],
            platform_markers: default_platform_markers(),
        }
    }
}

impl SignatureTable {
    /// Reject entries that would misclassify every device or claim a
    /// non-device backend such as `MIXED`.
    pub fn validate(&self) -> Result<(), SignatureError> {
        for (index, sig) in self.signatures.iter().enumerate() {
            if sig.all_of.iter().all(|m| m.trim().is_empty()) {
                return Err(SignatureError::NoMarkers(index));
            }
            if matches!(sig.backend, BackendKind::Mixed | BackendKind::Cpu) {
                return Err(SignatureError::NotADevice {
                    index,
                    backend: sig.backend.clone(),
                });
            }
        }
        Ok(())
    }

    /// First signature matching the device, if any.
    pub fn match_device(&self, device: &PciDevice) -> Option<&Signature> {
        let text = device.signature_text().to_lowercase();
        self.signatures.iter().find(|sig| sig.matches(&text))
    }

    fn platform_kind(&self, platform: &PlatformInfo) -> PlatformKind {
        let Some(product) = platform.product_name.as_deref() else {
            return PlatformKind::Unknown;
        };
        let lowered = product.to_lowercase();
        if self
            .platform_markers
            .iter()
            .any(|m| lowered.contains(&m.to_lowercase()))
        {
            PlatformKind::IntelNuc
        } else {
            PlatformKind::Generic
        }
    }
}

/// Platform family inferred from the SMBIOS product name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// Intel NUC or Compute Stick
    IntelNuc,
    Generic,
    Unknown,
}

/// A device that matched a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedDevice {
    pub kind: BackendKind,
    pub bus_id: String,
    pub name: String,
}

/// Backends the host can plausibly offer, derived from an inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Always contains `CPU`
    pub available_backends: BTreeSet<BackendKind>,
    pub gpus: Vec<DetectedDevice>,
    /// NPU and GNA class devices
    pub accelerators: Vec<DetectedDevice>,
    pub platform: PlatformKind,
}

impl Capabilities {
    /// The minimal capability set every host has.
    pub fn cpu_only() -> Self {
        Self {
            available_backends: BTreeSet::from([BackendKind::Cpu]),
            gpus: Vec::new(),
            accelerators: Vec::new(),
            platform: PlatformKind::Unknown,
        }
    }

    pub fn has(&self, backend: &BackendKind) -> bool {
        self.available_backends.contains(backend)
    }
}

/// Classify every device in the inventory against the signature table.
pub fn classify(inventory: &HardwareInventory, table: &SignatureTable) -> Capabilities {
    let mut caps = Capabilities::cpu_only();
    caps.platform = table.platform_kind(&inventory.platform);

    for device in &inventory.devices {
        let Some(sig) = table.match_device(device) else {
            continue;
        };
        if matches!(sig.backend, BackendKind::Mixed | BackendKind::Cpu) {
            continue;
        }

        tracing::debug!(
            bus_id = %device.bus_id,
            backend = %sig.backend,
            "device matched signature"
        );

        let detected = DetectedDevice {
            kind: sig.backend.clone(),
            bus_id: device.bus_id.clone(),
            name: device.description.clone(),
        };
        caps.available_backends.insert(sig.backend.clone());
        if sig.backend == BackendKind::Gpu {
            caps.gpus.push(detected);
        } else {
            caps.accelerators.push(detected);
        }
    }

    caps
}
