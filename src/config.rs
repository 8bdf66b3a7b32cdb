//! Configuration types for the SOAP bus client.

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the SOAP bus client.
///
/// Loaded once per process and shared read-only between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Config version
    pub version: String,

    /// Template lookup settings
    pub templates: TemplateConfig,

    /// Values written into the WFContext header
    pub context: ContextConfig,

    /// Transport defaults
    pub transport: TransportConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            templates: TemplateConfig::default(),
            context: ContextConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl BusConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| BusError::Config(e.to_string()))
    }

    /// Read and parse a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }
}

/// Template lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Directories searched in order for template files
    pub load_paths: Vec<PathBuf>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            load_paths: vec![PathBuf::from("templates")],
        }
    }
}

/// Process-wide values for the WFContext header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Identifier of the invoking application
    pub invoker_id: String,

    /// Billing accounting unit
    pub billing_au: String,

    /// Application id (2007 context only)
    pub application_id: String,

    /// Identity used by batch processes; also written as `initiatorIdType`
    pub batch_process_identity: String,

    /// Activity source id (non-2007 contexts)
    pub activity_source_id: String,

    /// Activity source id type (non-2007 contexts)
    pub activity_source_id_type: String,

    /// Host name override; the machine host name is used when unset
    pub host_name: Option<String>,
}

/// Transport defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Read timeout applied when a call does not specify one (seconds)
    pub default_read_timeout_secs: Option<u64>,

    /// Extra namespace declarations added to every outgoing envelope (prefix -> URI)
    pub namespaces: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_read_timeout_secs: Some(60),
            namespaces: BTreeMap::new(),
        }
    }
}

/// Per-call properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallProperties {
    /// Target endpoint URL
    pub end_point: String,

    /// SOAP action
    pub action: String,

    /// Body template filename
    pub request: String,

    /// Header template variant ("2007", ...)
    pub wf_context_version: String,

    /// Optional socket read timeout (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<u64>,
}

impl CallProperties {
    /// Read timeout for this call, falling back to the transport default.
    pub fn effective_read_timeout(&self, transport: &TransportConfig) -> Option<Duration> {
        self.read_timeout
            .or(transport.default_read_timeout_secs)
            .map(Duration::from_secs)
    }

    /// Filename of the header template selected by `wf_context_version`.
    pub fn header_template(&self) -> String {
        format!("wf_context_{}.xml", self.wf_context_version)
    }
}
