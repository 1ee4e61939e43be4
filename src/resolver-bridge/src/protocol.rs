//! Line-delimited JSON protocol spoken with exec plugins.
//!
//! Every line is one JSON object. The host sends [`PluginRequest`]s; the
//! plugin answers with a [`PluginResponse`] carrying the same `id`, and may at
//! any time emit a [`PluginNotification`] (no `id`) for calls that originate
//! on the plugin side.

use crate::dispatcher::{Job, JobError, JobOutcome};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const REPORT_CAPABILITIES: &str = "reportCapabilities";
pub const CONFIG_TEST_RESULT: &str = "onConfigTestResult";

/// Host to plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRequest {
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl PluginRequest {
    pub fn from_job(id: u64, job: Job) -> Self {
        Self {
            id,
            method: job.call.name().to_string(),
            params: job.args,
        }
    }
}

/// Plugin to host, answering request `id`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<PluginError>,
}

impl PluginResponse {
    pub fn into_outcome(self) -> JobOutcome {
        match self.error {
            Some(error) => Err(JobError::Failed {
                message: error.message,
            }),
            None => Ok(self.result),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginError {
    #[serde(default)]
    pub message: String,
}

/// Plugin-initiated call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginNotification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Any line a plugin may write.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PluginMessage {
    Response(PluginResponse),
    Notification(PluginNotification),
}

/// Plugin-initiated calls the bridge understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSignal {
    ReportCapabilities(u32),
    ConfigTestResult { code: i64, message: String },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed plugin message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown plugin notification {0}")]
    UnknownMethod(String),
    #[error("invalid params for {method}: {source}")]
    InvalidParams {
        method: String,
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct CapabilitiesParams {
    capabilities: u32,
}

#[derive(Deserialize)]
struct ConfigTestParams {
    #[serde(rename = "type")]
    code: i64,
    #[serde(default)]
    message: String,
}

impl PluginNotification {
    pub fn into_signal(self) -> Result<PluginSignal, ProtocolError> {
        let invalid = |method: &str, source| ProtocolError::InvalidParams {
            method: method.to_string(),
            source,
        };
        match self.method.as_str() {
            REPORT_CAPABILITIES => {
                let params = CapabilitiesParams::deserialize(&self.params)
                    .map_err(|err| invalid(REPORT_CAPABILITIES, err))?;
                Ok(PluginSignal::ReportCapabilities(params.capabilities))
            }
            CONFIG_TEST_RESULT => {
                let params = ConfigTestParams::deserialize(&self.params)
                    .map_err(|err| invalid(CONFIG_TEST_RESULT, err))?;
                Ok(PluginSignal::ConfigTestResult {
                    code: params.code,
                    message: params.message,
                })
            }
            _ => Err(ProtocolError::UnknownMethod(self.method)),
        }
    }
}

pub fn parse_message(line: &str) -> Result<PluginMessage, ProtocolError> {
    serde_json::from_str(line).map_err(ProtocolError::Malformed)
}
