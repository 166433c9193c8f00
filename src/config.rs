//! Run configuration: the plain struct the front ends (CLI, GUI) produce and
//! the core consumes. Loadable from and storable as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::naming;
use crate::resample::Association;

/// Export one channel into one format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSpec {
    pub channel: String,
    pub format: String,
    /// Optional subdirectory below the output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

/// Apply a registered processor to a channel's payloads before export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSpec {
    pub channel: String,
    pub processor: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

/// Align all exported channels against a master channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResampleSpec {
    pub master: String,
    pub association: Association,
    /// Maximum allowed |master - companion| time distance before the frame
    /// is dropped. Mandatory for `nearest`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discard_eps: Option<f64>,
}

fn default_naming() -> String {
    naming::DEFAULT_PATTERN.to_string()
}

fn default_cpu_percentage() -> u32 {
    100
}

/// Everything one run needs. `cpu_percentage = 0` forces fully sequential
/// execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub exports: Vec<ExportSpec>,
    #[serde(default)]
    pub processing: Vec<ProcessingSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resample: Option<ResampleSpec>,
    #[serde(default = "default_naming")]
    pub naming: String,
    pub output_dir: PathBuf,
    #[serde(default = "default_cpu_percentage")]
    pub cpu_percentage: u32,
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).with_context(|| format!("failed to write config: {}", path.display()))
    }

    /// Channels named by any export spec, deduplicated, in first-mention
    /// order.
    pub fn selected_channels(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for spec in &self.exports {
            if !seen.contains(&spec.channel.as_str()) {
                seen.push(spec.channel.as_str());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"exports":[{"channel":"/imu","format":"text/csv"}],"output_dir":"/tmp/out"}"#,
        )
        .unwrap();
        assert_eq!(cfg.naming, naming::DEFAULT_PATTERN);
        assert_eq!(cfg.cpu_percentage, 100);
        assert!(cfg.processing.is_empty());
        assert!(cfg.resample.is_none());
    }

    #[test]
    fn json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let cfg = RunConfig {
            exports: vec![ExportSpec {
                channel: "/cam".into(),
                format: "image/png".into(),
                subdir: Some("frames".into()),
            }],
            processing: vec![ProcessingSpec {
                channel: "/cam".into(),
                processor: "grayscale".into(),
                args: BTreeMap::new(),
            }],
            resample: Some(ResampleSpec {
                master: "/cam".into(),
                association: Association::Nearest,
                discard_eps: Some(0.05),
            }),
            naming: "%name_%index".into(),
            output_dir: "/tmp/out".into(),
            cpu_percentage: 50,
        };
        cfg.save(&path).unwrap();
        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.exports[0].subdir.as_deref(), Some("frames"));
        assert_eq!(loaded.resample.as_ref().unwrap().discard_eps, Some(0.05));
        assert_eq!(loaded.cpu_percentage, 50);
    }

    #[test]
    fn selected_channels_dedup() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"exports":[
                {"channel":"/a","format":"text/csv"},
                {"channel":"/a","format":"text/json"},
                {"channel":"/b","format":"text/csv"}
            ],"output_dir":"o"}"#,
        )
        .unwrap();
        assert_eq!(cfg.selected_channels(), vec!["/a", "/b"]);
    }
}
