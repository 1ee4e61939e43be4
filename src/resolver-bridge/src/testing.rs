//! In-process fakes for exercising bridges without a plugin runtime.

use crate::dispatcher::{Job, JobCallback, JobDispatcher, JobOutcome, RemoteCall};
use crate::redirect::{RedirectError, RedirectResolver};
use crate::sink::{NotificationSink, ResolverEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
struct Script {
    jobs: Vec<Job>,
    waiting: Vec<(RemoteCall, JobCallback)>,
    canned: HashMap<RemoteCall, JobOutcome>,
}

/// Records every job and holds callbacks until the test completes them.
///
/// Calls with a canned outcome (see [`ScriptedDispatcher::respond`]) are
/// completed synchronously inside `invoke`.
#[derive(Default)]
pub struct ScriptedDispatcher {
    script: Mutex<Script>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every future `call` with `outcome`.
    pub fn respond(&self, call: RemoteCall, outcome: JobOutcome) {
        self.lock().canned.insert(call, outcome);
    }

    /// Complete the oldest waiting callback for `call`. Returns `false` when
    /// nothing was waiting.
    pub fn complete(&self, call: RemoteCall, outcome: JobOutcome) -> bool {
        let callback = {
            let mut script = self.lock();
            let Some(idx) = script.waiting.iter().position(|(c, _)| *c == call) else {
                return false;
            };
            script.waiting.remove(idx).1
        };
        callback(outcome);
        true
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().jobs.iter().map(|job| job.call).collect()
    }

    pub fn last_job(&self, call: RemoteCall) -> Option<Job> {
        self.lock()
            .jobs
            .iter()
            .rev()
            .find(|job| job.call == call)
            .cloned()
    }

    pub fn waiting(&self) -> usize {
        self.lock().waiting.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobDispatcher for ScriptedDispatcher {
    fn invoke(&self, job: Job, on_complete: Option<JobCallback>) {
        let call = job.call;
        let immediate = {
            let mut script = self.lock();
            script.jobs.push(job);
            match on_complete {
                Some(callback) => match script.canned.get(&call).cloned() {
                    Some(outcome) => Some((callback, outcome)),
                    None => {
                        script.waiting.push((call, callback));
                        None
                    }
                },
                None => None,
            }
        };
        if let Some((callback, outcome)) = immediate {
            callback(outcome);
        }
    }
}

/// Keeps every published event in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ResolverEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResolverEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ResolverEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, event: ResolverEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Redirect table lookup; unknown URLs answer with a 404 status error.
#[derive(Debug, Default)]
pub struct StaticRedirects {
    targets: Mutex<HashMap<String, String>>,
}

impl StaticRedirects {
    pub fn insert(&self, from: impl Into<String>, to: impl Into<String>) {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(from.into(), to.into());
    }
}

#[async_trait]
impl RedirectResolver for StaticRedirects {
    async fn resolve_redirect(
        &self,
        url: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<String, RedirectError> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or(RedirectError::Status { status: 404 })
    }
}
