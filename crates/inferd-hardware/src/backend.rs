//! Compute backend identifiers
//!
//! Backend names travel through configuration, the probe classifier and the
//! inference engine as plain strings (`"CPU"`, `"NPU"`, ...). [`BackendKind`]
//! is the closed set the rest of the workspace matches on, with
//! [`BackendKind::Other`] keeping names this build does not know about so that
//! the engine, not the parser, decides whether they are usable.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// A named compute target the inference engine can bind to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum BackendKind {
    /// Host CPU, present on every machine
    Cpu,
    /// Integrated or discrete graphics
    Gpu,
    /// Neural processing unit
    Npu,
    /// Gaussian & neural-network accelerator (low-power inference block)
    Gna,
    /// Composed target balancing work across a priority hint
    Mixed,
    /// Any other upper-cased backend name
    Other(String),
}

impl BackendKind {
    /// Parse a free-text token. Whitespace is trimmed and the name upper-cased.
    pub fn parse(token: &str) -> Self {
        let name = token.trim().to_uppercase();
        match name.as_str() {
            "CPU" => BackendKind::Cpu,
            "GPU" => BackendKind::Gpu,
            "NPU" => BackendKind::Npu,
            "GNA" => BackendKind::Gna,
            "MIXED" => BackendKind::Mixed,
            _ => BackendKind::Other(name),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BackendKind::Cpu => "CPU",
            BackendKind::Gpu => "GPU",
            BackendKind::Npu => "NPU",
            BackendKind::Gna => "GNA",
            BackendKind::Mixed => "MIXED",
            BackendKind::Other(name) => name,
        }
    }

    /// True for device classes found by scanning the PCI listing.
    pub fn is_accelerator(&self) -> bool {
        matches!(self, BackendKind::Gpu | BackendKind::Npu | BackendKind::Gna)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BackendKind::parse(s))
    }
}

impl From<String> for BackendKind {
    fn from(value: String) -> Self {
        BackendKind::parse(&value)
    }
}

impl From<BackendKind> for String {
    fn from(value: BackendKind) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(BackendKind::parse("npu"), BackendKind::Npu);
        assert_eq!(BackendKind::parse(" Gpu "), BackendKind::Gpu);
        assert_eq!(BackendKind::parse("mixed"), BackendKind::Mixed);
    }

    #[test]
    fn test_unknown_name_is_preserved_uppercased() {
        assert_eq!(
            BackendKind::parse("hetero"),
            BackendKind::Other("HETERO".to_string())
        );
        assert_eq!(BackendKind::parse("hetero").to_string(), "HETERO");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&vec![BackendKind::Cpu, BackendKind::Npu]).unwrap();
        assert_eq!(json, r#"["CPU","NPU"]"#);
        let back: Vec<BackendKind> = serde_json::from_str(r#"["gna","fpga"]"#).unwrap();
        assert_eq!(
            back,
            vec![BackendKind::Gna, BackendKind::Other("FPGA".to_string())]
        );
    }

    #[test]
    fn test_accelerator_flag() {
        assert!(BackendKind::Gpu.is_accelerator());
        assert!(BackendKind::Gna.is_accelerator());
        assert!(!BackendKind::Cpu.is_accelerator());
        assert!(!BackendKind::Mixed.is_accelerator());
    }
}
