//! Daemon configuration file.
//!
//! Every section and field is optional; a missing file section takes the
//! defaults of the library config it feeds.
//!
//! ```toml
//! [switch]
//! context = "switch"
//! mac = "02:00:00:00:00:01"
//!
//! [cpu]
//! queue_len = 1024
//! watchdog_ms = 5000
//! export = ["TRAP_ID", "INPUT_IFACE"]
//!
//! [ports.lanes]
//! 1 = "eth1"
//!
//! [aggregate]
//! queue_len = 256
//!
//! [acl]
//! banks = 8
//!
//! [log]
//! level = "info"
//! json = false
//! ```

use crate::error::{DaemonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use vdp_fwd::port::CpuPortConfig;
use vdp_fwd::FieldId;
use vdp_sai::{AclConfig, SwitchConfig};
use vdp_types::MacAddress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchSection {
    /// Forwarding context the switch lives in.
    pub context: String,
    pub mac: MacAddress,
}

impl Default for SwitchSection {
    fn default() -> Self {
        let defaults = SwitchConfig::default();
        Self {
            context: defaults.context,
            mac: defaults.mac,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuSection {
    /// Punt queue length; zero means unbounded.
    pub queue_len: usize,
    pub watchdog_ms: u64,
    /// Field names exported with every punted packet, e.g. `TRAP_ID`.
    pub export: Vec<String>,
}

impl Default for CpuSection {
    fn default() -> Self {
        let cpu = SwitchConfig::default().cpu;
        Self {
            queue_len: cpu.queue_len,
            watchdog_ms: cpu.watchdog_ms,
            export: cpu.export.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsSection {
    /// Hardware lane to host device. TOML keys are strings, so lanes are
    /// parsed when the switch config is built.
    pub lanes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateSection {
    /// Per-member queue length of LAG aggregates. Full queues tail-drop;
    /// zero means unbounded.
    pub queue_len: usize,
}

impl Default for AggregateSection {
    fn default() -> Self {
        Self {
            queue_len: SwitchConfig::default().lag_queue_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub switch: SwitchSection,
    pub cpu: CpuSection,
    pub ports: PortsSection,
    pub aggregate: AggregateSection,
    pub acl: AclConfig,
    pub log: LogSection,
}

impl DaemonConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| DaemonError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path` if given, the defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DaemonError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.switch.context.is_empty() {
            return Err(DaemonError::Config("switch.context cannot be empty".to_string()));
        }
        if self.acl.banks == 0 {
            return Err(DaemonError::Config("acl.banks must be > 0".to_string()));
        }
        if self.acl.min_priority > self.acl.max_priority {
            return Err(DaemonError::Config(format!(
                "acl.min_priority {} exceeds acl.max_priority {}",
                self.acl.min_priority, self.acl.max_priority
            )));
        }
        self.switch_config().map(|_| ())
    }

    /// The switch settings this configuration describes.
    pub fn switch_config(&self) -> Result<SwitchConfig> {
        let export = self
            .cpu
            .export
            .iter()
            .map(|name| {
                name.parse::<FieldId>()
                    .map_err(|e| DaemonError::Config(format!("cpu.export: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;
        let lanes = self
            .ports
            .lanes
            .iter()
            .map(|(lane, device)| {
                lane.parse::<u32>()
                    .map(|l| (l, device.clone()))
                    .map_err(|_| DaemonError::Config(format!("ports.lanes: bad lane {:?}", lane)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(SwitchConfig {
            context: self.switch.context.clone(),
            mac: self.switch.mac,
            cpu: CpuPortConfig {
                queue_len: self.cpu.queue_len,
                watchdog_ms: self.cpu.watchdog_ms,
                export,
            },
            lanes,
            lag_queue_len: self.aggregate.queue_len,
            acl: self.acl.clone(),
        })
    }
}
