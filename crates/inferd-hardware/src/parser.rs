//! Probe text parser
//!
//! Line-oriented parsing of the tool outputs listed in [`ProbeTool`]. The
//! parser never fails: unrecognised or garbled output simply yields an empty
//! [`PartialInventory`].

use crate::inventory::{PartialInventory, PciDevice};
use crate::probe::ProbeTool;
use regex::Regex;
use std::sync::LazyLock;

/// `00:02.0 VGA compatible controller: Intel Corporation ...`
static LSPCI_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<bus>[0-9A-Fa-f][0-9A-Fa-f:.]*)\s+(?P<class>[^:]+?):\s+(?P<desc>.+)$")
        .expect("lspci pattern is valid")
});

static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("number pattern is valid"));

/// Placeholder strings firmware vendors leave in SMBIOS fields
const SMBIOS_PLACEHOLDERS: &[&str] = &[
    "to be filled by o.e.m.",
    "default string",
    "not specified",
    "system product name",
    "system manufacturer",
    "none",
];

/// Parse one tool's raw standard output.
pub fn parse(tool: ProbeTool, raw: &str) -> PartialInventory {
    match tool {
        ProbeTool::Lscpu => parse_lscpu(raw),
        ProbeTool::Free => parse_free(raw),
        ProbeTool::Lspci => parse_lspci(raw),
        ProbeTool::DmiManufacturer => PartialInventory {
            manufacturer: dmi_value(raw, &["Manufacturer"]),
            ..Default::default()
        },
        ProbeTool::DmiProduct => PartialInventory {
            product_name: dmi_value(raw, &["Product Name"]),
            ..Default::default()
        },
        ProbeTool::DmiBoard => PartialInventory {
            board_name: dmi_value(raw, &["Product Name", "Board Name"]),
            ..Default::default()
        },
    }
}

/// Split `Key:   value` lines into trimmed pairs.
fn key_values(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.lines().filter_map(|line| {
        let (key, value) = line.split_once(':')?;
        let value = value.trim();
        (!value.is_empty()).then(|| (key.trim(), value))
    })
}

fn parse_lscpu(raw: &str) -> PartialInventory {
    let mut part = PartialInventory::default();
    for (key, value) in key_values(raw) {
        match key {
            "Model name" if part.cpu_model.is_none() => part.cpu_model = Some(value.to_string()),
            "Vendor ID" if part.cpu_vendor.is_none() => part.cpu_vendor = Some(value.to_string()),
            "CPU(s)" if part.logical_cores.is_none() => {
                part.logical_cores = LEADING_NUMBER
                    .find(value)
                    .and_then(|m| m.as_str().parse().ok())
                    .filter(|&n: &usize| n > 0);
            }
            "Architecture" => part.architecture = Some(value.to_string()),
            "CPU max MHz" => part.max_mhz = value.parse().ok(),
            _ => {}
        }
    }
    part
}

/// `free -b` prints a header row naming the columns of the `Mem:` row.
/// Newer procps reports `available`; older releases print
/// `buffers cached` in its place, leaving available memory unknown.
fn parse_free(raw: &str) -> PartialInventory {
    let mut part = PartialInventory::default();
    let Some(row) = raw.lines().find(|l| l.trim_start().starts_with("Mem:")) else {
        return part;
    };

    let header: Vec<&str> = raw
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>())
        .find(|cols| cols.contains(&"total"))
        .unwrap_or_default();
    let column = |name: &str| header.iter().position(|h| *h == name);

    let values: Vec<Option<u64>> = row
        .split_whitespace()
        .skip(1)
        .map(|c| c.parse().ok())
        .collect();
    let value = |idx: Option<usize>| idx.and_then(|i| values.get(i).copied().flatten());

    part.memory_total = value(column("total").or(Some(0)));
    part.memory_used = value(column("used").or(Some(1)));
    part.memory_available = value(column("available"));
    part
}

fn parse_lspci(raw: &str) -> PartialInventory {
    let devices = raw
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let caps = LSPCI_LINE.captures(line);
            if caps.is_none() && !line.is_empty() {
                tracing::debug!(line, "skipping unrecognised lspci line");
            }
            let caps = caps?;
            Some(PciDevice::new(&caps["bus"], caps["class"].trim(), caps["desc"].trim()))
        })
        .collect();

    PartialInventory {
        devices,
        ..Default::default()
    }
}

/// `dmidecode -s` prints the bare value; full `dmidecode` dumps print
/// `Key: value` lines. Both are accepted.
fn dmi_value(raw: &str, keys: &[&str]) -> Option<String> {
    let keyed = key_values(raw)
        .find(|(k, _)| keys.contains(k))
        .map(|(_, v)| v.to_string());

    let value = keyed.or_else(|| {
        raw.lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#') && !l.contains(':'))
            .map(str::to_string)
    })?;

    let lowered = value.to_lowercase();
    if SMBIOS_PLACEHOLDERS.contains(&lowered.as_str()) {
        return None;
    }
    Some(value)
}
