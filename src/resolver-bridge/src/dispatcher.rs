//! The call contract between the bridge and whatever executes plugin code.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Named operations a resolver plugin exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    Init,
    Settings,
    GetConfigUi,
    SaveUserConfig,
    Collection,
    Search,
    Resolve,
    GetStreamUrl,
    LookupUrl,
    Login,
    Logout,
    OnRedirectCallback,
    ConfigTest,
    GetAccessToken,
}

impl RemoteCall {
    /// Function name on the plugin side.
    pub fn name(self) -> &'static str {
        match self {
            RemoteCall::Init => "init",
            RemoteCall::Settings => "settings",
            RemoteCall::GetConfigUi => "getConfigUi",
            RemoteCall::SaveUserConfig => "saveUserConfig",
            RemoteCall::Collection => "collection",
            RemoteCall::Search => "search",
            RemoteCall::Resolve => "resolve",
            RemoteCall::GetStreamUrl => "getStreamUrl",
            RemoteCall::LookupUrl => "lookupUrl",
            RemoteCall::Login => "login",
            RemoteCall::Logout => "logout",
            RemoteCall::OnRedirectCallback => "onRedirectCallback",
            RemoteCall::ConfigTest => "configTest",
            RemoteCall::GetAccessToken => "getAccessToken",
        }
    }
}

impl fmt::Display for RemoteCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub call: RemoteCall,
    pub args: Option<Map<String, Value>>,
}

impl Job {
    pub fn new(call: RemoteCall) -> Self {
        Self { call, args: None }
    }

    /// Attach a string argument.
    pub fn arg(mut self, key: &str, value: impl Into<String>) -> Self {
        self.args
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), Value::String(value.into()));
        self
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("plugin reported an error: {message}")]
    Failed { message: String },
    #[error("plugin is no longer running")]
    Terminated,
    #[error("failed to deliver call to plugin: {0}")]
    Transport(String),
}

pub type JobOutcome = Result<Value, JobError>;

/// Completion callback; invoked at most once, on any thread.
pub type JobCallback = Box<dyn FnOnce(JobOutcome) + Send + 'static>;

/// Executes named operations on a plugin.
///
/// `invoke` must return without waiting for the plugin. When a callback is
/// supplied it is called once with the outcome; calls without a callback are
/// fire-and-forget.
pub trait JobDispatcher: Send + Sync {
    fn invoke(&self, job: Job, on_complete: Option<JobCallback>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_names_match_plugin_functions() {
        assert_eq!(RemoteCall::GetStreamUrl.name(), "getStreamUrl");
        assert_eq!(RemoteCall::OnRedirectCallback.to_string(), "onRedirectCallback");
    }

    #[test]
    fn job_builder_collects_args() {
        let job = Job::new(RemoteCall::Resolve)
            .arg("artist", "Air")
            .arg("album", "Moon Safari")
            .arg("track", "La femme d'argent");
        let args = job.args.unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args["album"], "Moon Safari");
        assert!(Job::new(RemoteCall::Init).args.is_none());
    }
}
