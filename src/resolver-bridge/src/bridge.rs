//! Per-plugin state machine: initialization, call dispatch, liveness and
//! result publication.
//!
//! A [`ResolverBridge`] is owned by exactly one execution context. Dispatcher
//! callbacks, timer expiries and redirect resolutions never touch the bridge
//! directly; they are queued as [`BridgeEvent`]s on the channel returned by
//! [`ResolverBridge::new`] and applied by the owner through
//! [`ResolverBridge::handle`].

use crate::auth::AuthRegistry;
use crate::capability::{CapabilityRegistry, ResolverCapabilities};
use crate::codec::{
    decode, decode_search_results, AccessTokenResult, CollectionMetadata, ConfigUi,
    ResolverSettings, StreamUrlResult, UrlLookupResult,
};
use crate::dispatcher::{Job, JobDispatcher, JobOutcome, RemoteCall};
use crate::manifest::ResolverIdentity;
use crate::redirect::{RedirectError, RedirectResolver};
use crate::sink::{ConfigTestKind, NotificationSink, ResolverEvent};
use crate::store::{ConfigStore, ResolverConfig, ENABLED_KEY};
use crate::timeout::TimeoutMonitor;
use resolver_core::models::{AccessToken, Query, ResolverId, SearchResult};
use resolver_core::redact::redact_url;
use resolver_core::BridgeConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Upper bound on a plugin-reported liveness timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Collaborators injected into every bridge.
#[derive(Clone)]
pub struct BridgeContext {
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub sink: Arc<dyn NotificationSink>,
    pub store: Arc<dyn ConfigStore>,
    pub auth: Option<Arc<dyn AuthRegistry>>,
    pub redirects: Arc<dyn RedirectResolver>,
    pub settings: BridgeConfig,
}

/// Work delivered back onto the bridge's owning context.
#[derive(Debug)]
pub enum BridgeEvent {
    Completed {
        call_id: u64,
        outcome: JobOutcome,
    },
    TimedOut {
        generation: u64,
    },
    RedirectResolved {
        result: SearchResult,
        outcome: Result<String, RedirectError>,
    },
}

pub type BridgeEvents = mpsc::UnboundedReceiver<BridgeEvent>;

/// Initialization progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    Uninitialized,
    Initializing,
    AwaitingSettings,
    Ready,
}

/// Calls whose reply the bridge still expects.
#[derive(Debug)]
enum PendingCall {
    Init,
    Settings,
    ConfigUi,
    Collection,
    Search { query: Query },
    LookupUrl { url: String },
    StreamUrl { result: SearchResult },
    AccessToken,
}

/// Collection metadata with its icon resolved against the plugin directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub metadata: CollectionMetadata,
    pub icon_path: Option<PathBuf>,
}

/// Point-in-time view of a resolver for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverStatus {
    pub id: ResolverId,
    pub name: String,
    pub description: String,
    pub phase: InitPhase,
    pub weight: i32,
    pub timeout: Duration,
    pub enabled: bool,
    pub ready: bool,
    pub resolving: bool,
    pub stopped: bool,
    pub capabilities: ResolverCapabilities,
    pub has_config_ui: bool,
    pub collection_icon: Option<PathBuf>,
}

pub struct ResolverBridge {
    identity: ResolverIdentity,
    ctx: BridgeContext,
    events: mpsc::UnboundedSender<BridgeEvent>,
    phase: InitPhase,
    started: bool,
    weight: i32,
    timeout: Duration,
    enabled: bool,
    stopped: bool,
    capabilities: ResolverCapabilities,
    config_ui: Option<ConfigUi>,
    collection: Option<CollectionInfo>,
    timer: TimeoutMonitor,
    pending: HashMap<u64, PendingCall>,
    next_call_id: u64,
}

impl ResolverBridge {
    pub fn new(identity: ResolverIdentity, ctx: BridgeContext) -> (Self, BridgeEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let enabled = Self::initial_enabled(&identity.id, &ctx);
        let bridge = Self {
            capabilities: identity.static_capabilities(),
            timeout: ctx.settings.default_timeout().min(MAX_TIMEOUT),
            identity,
            ctx,
            events,
            phase: InitPhase::Uninitialized,
            started: false,
            weight: 0,
            enabled,
            stopped: true,
            config_ui: None,
            collection: None,
            timer: TimeoutMonitor::new(),
            pending: HashMap::new(),
            next_call_id: 1,
        };
        (bridge, receiver)
    }

    fn initial_enabled(id: &ResolverId, ctx: &BridgeContext) -> bool {
        match ctx.store.get(id, ENABLED_KEY) {
            Ok(Some(Value::Bool(enabled))) => enabled,
            Ok(Some(other)) => {
                tracing::warn!(resolver_id = %id, value = %other, "ignoring non-boolean enabled flag");
                ctx.settings.enabled_by_default(id.as_str())
            }
            Ok(None) => ctx.settings.enabled_by_default(id.as_str()),
            Err(err) => {
                tracing::warn!(resolver_id = %id, error = %err, "failed to read enabled flag");
                ctx.settings.enabled_by_default(id.as_str())
            }
        }
    }

    /// Fire the `init` call. Only the first invocation has any effect.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.phase = InitPhase::Initializing;
        tracing::debug!(resolver_id = %self.identity.id, "initializing resolver");
        self.dispatch(Job::new(RemoteCall::Init), Some(PendingCall::Init));
    }

    fn dispatch(&mut self, job: Job, pending: Option<PendingCall>) {
        let call = job.call;
        let Some(pending) = pending else {
            tracing::trace!(resolver_id = %self.identity.id, %call, "dispatching call");
            self.ctx.dispatcher.invoke(job, None);
            return;
        };

        let call_id = self.next_call_id;
        self.next_call_id += 1;
        self.pending.insert(call_id, pending);
        tracing::trace!(resolver_id = %self.identity.id, %call, call_id, "dispatching call");

        let events = self.events.clone();
        self.ctx.dispatcher.invoke(
            job,
            Some(Box::new(move |outcome| {
                // the bridge may already be gone; late replies are dropped
                let _ = events.send(BridgeEvent::Completed { call_id, outcome });
            })),
        );
    }

    /// Apply one queued event.
    pub fn handle(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::Completed { call_id, outcome } => self.on_completed(call_id, outcome),
            BridgeEvent::TimedOut { generation } => self.on_timed_out(generation),
            BridgeEvent::RedirectResolved { result, outcome } => {
                self.on_redirect_resolved(result, outcome)
            }
        }
    }

    fn on_completed(&mut self, call_id: u64, outcome: JobOutcome) {
        let Some(pending) = self.pending.remove(&call_id) else {
            tracing::debug!(
                resolver_id = %self.identity.id,
                call_id,
                "ignoring reply for a call that already completed"
            );
            return;
        };

        match pending {
            PendingCall::Init => self.on_init(outcome),
            PendingCall::Settings => self.on_settings(outcome),
            PendingCall::ConfigUi => self.on_config_ui(outcome),
            PendingCall::Collection => self.on_collection(outcome),
            PendingCall::Search { query } => self.on_search(query, outcome),
            PendingCall::LookupUrl { url } => self.on_lookup_url(url, outcome),
            PendingCall::StreamUrl { result } => self.on_stream_url(result, outcome),
            PendingCall::AccessToken => self.on_access_token(outcome),
        }
    }

    /// Unwrap a reply, logging failures with the call name.
    fn reply(&self, call: RemoteCall, outcome: JobOutcome) -> Option<Value> {
        match outcome {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(resolver_id = %self.identity.id, %call, error = %err, "plugin call failed");
                None
            }
        }
    }

    fn on_init(&mut self, outcome: JobOutcome) {
        if self.reply(RemoteCall::Init, outcome).is_none() {
            self.phase = InitPhase::Uninitialized;
            tracing::warn!(resolver_id = %self.identity.id, "resolver failed to initialize and stays unavailable");
            return;
        }
        self.phase = InitPhase::AwaitingSettings;
        self.dispatch(Job::new(RemoteCall::Settings), Some(PendingCall::Settings));
        self.dispatch(Job::new(RemoteCall::Collection), Some(PendingCall::Collection));
    }

    fn on_settings(&mut self, outcome: JobOutcome) {
        let settings = self
            .reply(RemoteCall::Settings, outcome)
            .and_then(|raw| match decode::<ResolverSettings>(&raw) {
                Ok(settings) => Some(settings),
                Err(err) => {
                    tracing::warn!(resolver_id = %self.identity.id, error = %err, "invalid settings");
                    None
                }
            });
        let Some(settings) = settings else {
            self.phase = InitPhase::Uninitialized;
            return;
        };

        self.weight = settings.weight;
        self.timeout = if settings.timeout == 0 {
            self.ctx.settings.default_timeout()
        } else {
            Duration::from_secs(settings.timeout)
        }
        .min(MAX_TIMEOUT);
        self.phase = InitPhase::Ready;
        tracing::info!(
            resolver_id = %self.identity.id,
            weight = self.weight,
            timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            "resolver ready"
        );
        self.ctx.sink.publish(ResolverEvent::ResolverReady {
            resolver_id: self.identity.id.clone(),
        });
        self.fetch_config_ui();
    }

    /// Re-fetch the plugin's configuration UI description.
    pub fn fetch_config_ui(&mut self) {
        self.dispatch(Job::new(RemoteCall::GetConfigUi), Some(PendingCall::ConfigUi));
    }

    fn on_config_ui(&mut self, outcome: JobOutcome) {
        let Some(raw) = self.reply(RemoteCall::GetConfigUi, outcome) else {
            return;
        };
        match decode::<ConfigUi>(&raw) {
            Ok(ui) => self.config_ui = Some(ui),
            Err(err) => {
                tracing::warn!(resolver_id = %self.identity.id, error = %err, "invalid config UI")
            }
        }
    }

    fn on_collection(&mut self, outcome: JobOutcome) {
        let Some(raw) = self.reply(RemoteCall::Collection, outcome) else {
            return;
        };
        match decode::<CollectionMetadata>(&raw) {
            Ok(metadata) => {
                let icon_path = metadata
                    .iconfile
                    .as_deref()
                    .map(|icon| self.identity.collection_icon_path(icon));
                self.collection = Some(CollectionInfo {
                    metadata,
                    icon_path,
                });
            }
            Err(err) => {
                tracing::warn!(resolver_id = %self.identity.id, error = %err, "invalid collection metadata")
            }
        }
    }

    /// Dispatch a search. Returns `false`, doing nothing, unless ready.
    ///
    /// Does not check whether a previous search is still outstanding; callers
    /// consult [`ResolverBridge::is_stopped`] first.
    pub fn resolve(&mut self, query: Query) -> bool {
        if !self.is_ready() {
            return false;
        }

        let events = self.events.clone();
        self.timer.arm(self.timeout, move |generation| {
            let _ = events.send(BridgeEvent::TimedOut { generation });
        });
        self.stopped = false;

        let job = match &query {
            Query::FullText { query } => Job::new(RemoteCall::Search).arg("query", query.as_str()),
            Query::Structured {
                artist,
                album,
                track,
            } => Job::new(RemoteCall::Resolve)
                .arg("artist", artist.as_str())
                .arg("album", album.as_str())
                .arg("track", track.as_str()),
        };
        tracing::debug!(resolver_id = %self.identity.id, %query, "resolving");
        self.dispatch(job, Some(PendingCall::Search { query }));
        true
    }

    fn on_search(&mut self, query: Query, outcome: JobOutcome) {
        if let Some(raw) = self.reply(RemoteCall::Search, outcome) {
            if !raw.is_null() {
                match decode_search_results(&raw, &self.identity.id, self.weight) {
                    Ok(results) => {
                        tracing::debug!(
                            resolver_id = %self.identity.id,
                            %query,
                            count = results.len(),
                            late = self.stopped,
                            "search results"
                        );
                        self.ctx.sink.publish(ResolverEvent::ResultsReported {
                            resolver_id: self.identity.id.clone(),
                            query,
                            results,
                        });
                    }
                    Err(err) => {
                        tracing::warn!(resolver_id = %self.identity.id, error = %err, "invalid search results")
                    }
                }
            }
        }
        self.timer.disarm();
        self.stopped = true;
    }

    fn on_timed_out(&mut self, generation: u64) {
        if !self.timer.expire(generation) {
            return;
        }
        tracing::debug!(
            resolver_id = %self.identity.id,
            timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            "resolver timed out"
        );
        self.stopped = true;
    }

    /// Ask the plugin to interpret an arbitrary URL (track/album/playlist link).
    pub fn lookup_url(&mut self, url: &str) {
        let job = Job::new(RemoteCall::LookupUrl).arg("url", url);
        self.dispatch(
            job,
            Some(PendingCall::LookupUrl {
                url: url.to_string(),
            }),
        );
    }

    fn on_lookup_url(&mut self, url: String, outcome: JobOutcome) {
        if let Some(raw) = self.reply(RemoteCall::LookupUrl, outcome) {
            match decode::<UrlLookupResult>(&raw) {
                Ok(result) => {
                    tracing::debug!(resolver_id = %self.identity.id, url = %redact_url(&url), "URL lookup result");
                    self.ctx.sink.publish(ResolverEvent::UrlLookupResult {
                        resolver_id: self.identity.id.clone(),
                        url,
                        result,
                    });
                }
                Err(err) => {
                    tracing::warn!(resolver_id = %self.identity.id, error = %err, "invalid URL lookup result")
                }
            }
        }
        self.stopped = true;
    }

    /// Request a playable URL for a result this resolver reported.
    pub fn get_stream_url(&mut self, result: SearchResult) {
        let job = Job::new(RemoteCall::GetStreamUrl).arg("url", result.url.as_str());
        self.dispatch(job, Some(PendingCall::StreamUrl { result }));
    }

    fn on_stream_url(&mut self, result: SearchResult, outcome: JobOutcome) {
        let Some(raw) = self.reply(RemoteCall::GetStreamUrl, outcome) else {
            return;
        };
        let StreamUrlResult { url, headers } = match decode::<StreamUrlResult>(&raw) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(resolver_id = %self.identity.id, error = %err, "invalid stream URL result");
                return;
            }
        };

        match headers {
            Some(headers) => {
                let redirects = Arc::clone(&self.ctx.redirects);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let outcome = redirects.resolve_redirect(&url, &headers).await;
                    let _ = events.send(BridgeEvent::RedirectResolved { result, outcome });
                });
            }
            None => self.publish_stream_url(result, url),
        }
    }

    fn on_redirect_resolved(&mut self, result: SearchResult, outcome: Result<String, RedirectError>) {
        match outcome {
            Ok(url) => self.publish_stream_url(result, url),
            Err(err) => tracing::warn!(
                resolver_id = %self.identity.id,
                error = %err,
                "failed to resolve stream redirect"
            ),
        }
    }

    fn publish_stream_url(&self, result: SearchResult, url: String) {
        tracing::debug!(resolver_id = %self.identity.id, url = %redact_url(&url), "stream URL resolved");
        self.ctx.sink.publish(ResolverEvent::StreamUrlResolved {
            resolver_id: self.identity.id.clone(),
            result,
            url,
        });
    }

    pub fn login(&mut self) {
        self.dispatch(Job::new(RemoteCall::Login), None);
    }

    pub fn logout(&mut self) {
        self.dispatch(Job::new(RemoteCall::Logout), None);
    }

    /// Tell the plugin to persist the values entered in its config UI.
    pub fn save_user_config(&mut self) {
        self.dispatch(Job::new(RemoteCall::SaveUserConfig), None);
    }

    /// Forward a completed OAuth-style redirect to the plugin.
    pub fn on_redirect_callback(&mut self, url: Option<&str>) {
        if let Some(url) = url {
            let job = Job::new(RemoteCall::OnRedirectCallback).arg("url", url);
            self.dispatch(job, None);
        }
    }

    /// Ask the plugin to validate its configuration; the verdict arrives via
    /// [`ResolverBridge::on_config_test_result`].
    pub fn config_test(&mut self) {
        self.dispatch(Job::new(RemoteCall::ConfigTest), None);
    }

    pub fn on_config_test_result(&mut self, code: i64, message: &str) {
        let kind = ConfigTestKind::from_code(code);
        tracing::debug!(resolver_id = %self.identity.id, ?kind, message, "config test result");
        self.set_enabled(kind.is_success());
        self.ctx.sink.publish(ResolverEvent::ConfigTestResult {
            resolver_id: self.identity.id.clone(),
            kind,
            message: message.to_string(),
        });
    }

    pub fn get_access_token(&mut self) {
        self.dispatch(
            Job::new(RemoteCall::GetAccessToken),
            Some(PendingCall::AccessToken),
        );
    }

    fn on_access_token(&mut self, outcome: JobOutcome) {
        let Some(raw) = self.reply(RemoteCall::GetAccessToken, outcome) else {
            return;
        };
        match decode::<AccessTokenResult>(&raw) {
            Ok(result) => self
                .ctx
                .sink
                .publish(ResolverEvent::AccessTokenChanged(AccessToken {
                    resolver_id: self.identity.id.clone(),
                    token: result.access_token,
                })),
            Err(err) => {
                tracing::warn!(resolver_id = %self.identity.id, error = %err, "invalid access token result")
            }
        }
    }

    /// Update the enabled flag, persist it, then notify.
    pub fn set_enabled(&mut self, enabled: bool) {
        tracing::debug!(
            resolver_id = %self.identity.id,
            "{} has been {}",
            self.identity.name(),
            if enabled { "enabled" } else { "disabled" }
        );
        self.enabled = enabled;
        if let Err(err) = self
            .ctx
            .store
            .set(&self.identity.id, ENABLED_KEY, Value::Bool(enabled))
        {
            tracing::warn!(resolver_id = %self.identity.id, error = %err, "failed to persist enabled flag");
        }
        self.ctx.sink.publish(ResolverEvent::EnabledStateChanged {
            resolver_id: self.identity.id.clone(),
            enabled,
        });
    }

    /// An external authenticator's login state wins over the stored flag.
    pub fn is_enabled(&self) -> bool {
        self.ctx
            .auth
            .as_ref()
            .and_then(|auth| auth.login_state(&self.identity.id))
            .unwrap_or(self.enabled)
    }

    pub fn report_capabilities(&mut self, mask: u32) {
        self.capabilities.merge(&CapabilityRegistry::decode(mask));
        tracing::debug!(resolver_id = %self.identity.id, mask, "capabilities reported");
    }

    /// Plugin-defined configuration, empty when unreadable.
    pub fn config(&self) -> ResolverConfig {
        self.ctx.store.load(&self.identity.id).unwrap_or_else(|err| {
            tracing::warn!(resolver_id = %self.identity.id, error = %err, "failed to load resolver config");
            ResolverConfig::new()
        })
    }

    /// Replace the plugin-defined configuration. The enabled flag is owned by
    /// the bridge and survives the replacement.
    pub fn set_config(&mut self, mut config: ResolverConfig) {
        config.insert(ENABLED_KEY.to_string(), Value::Bool(self.enabled));
        if let Err(err) = self.ctx.store.replace(&self.identity.id, config) {
            tracing::warn!(resolver_id = %self.identity.id, error = %err, "failed to store resolver config");
        }
    }

    pub fn id(&self) -> &ResolverId {
        &self.identity.id
    }

    pub fn identity(&self) -> &ResolverIdentity {
        &self.identity
    }

    pub fn phase(&self) -> InitPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == InitPhase::Ready
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_resolving(&self) -> bool {
        self.is_ready() && !self.stopped
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Duration of the pending liveness timer, if one is armed.
    pub fn armed_timeout(&self) -> Option<Duration> {
        self.timer.armed_duration()
    }

    pub fn capabilities(&self) -> &ResolverCapabilities {
        &self.capabilities
    }

    pub fn config_ui(&self) -> Option<&ConfigUi> {
        self.config_ui.as_ref()
    }

    pub fn collection(&self) -> Option<&CollectionInfo> {
        self.collection.as_ref()
    }

    pub fn status(&self) -> ResolverStatus {
        ResolverStatus {
            id: self.identity.id.clone(),
            name: self.identity.name().to_string(),
            description: self.identity.description().to_string(),
            phase: self.phase,
            weight: self.weight,
            timeout: self.timeout,
            enabled: self.is_enabled(),
            ready: self.is_ready(),
            resolving: self.is_resolving(),
            stopped: self.stopped,
            capabilities: self.capabilities.clone(),
            has_config_ui: self.config_ui.is_some(),
            collection_icon: self
                .collection
                .as_ref()
                .and_then(|info| info.icon_path.clone()),
        }
    }
}

impl std::fmt::Debug for ResolverBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverBridge")
            .field("id", &self.identity.id)
            .field("phase", &self.phase)
            .field("enabled", &self.enabled)
            .field("stopped", &self.stopped)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SharedLoginStates;
    use crate::capability::Capability;
    use crate::manifest::{ManifestFiles, PluginManifest};
    use crate::store::MemoryConfigStore;
    use crate::testing::{RecordingSink, ScriptedDispatcher, StaticRedirects};
    use serde_json::json;

    struct Harness {
        bridge: ResolverBridge,
        events: BridgeEvents,
        dispatcher: Arc<ScriptedDispatcher>,
        sink: Arc<RecordingSink>,
        store: Arc<MemoryConfigStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with(None, Arc::new(StaticRedirects::default()))
        }

        fn with(auth: Option<Arc<dyn AuthRegistry>>, redirects: Arc<StaticRedirects>) -> Self {
            let dispatcher = Arc::new(ScriptedDispatcher::new());
            let sink = Arc::new(RecordingSink::new());
            let store = Arc::new(MemoryConfigStore::new());
            let ctx = BridgeContext {
                dispatcher: dispatcher.clone(),
                sink: sink.clone(),
                store: store.clone(),
                auth,
                redirects,
                settings: BridgeConfig::default(),
            };
            let (bridge, events) = ResolverBridge::new(identity(), ctx);
            Self {
                bridge,
                events,
                dispatcher,
                sink,
                store,
            }
        }

        fn pump(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                self.bridge.handle(event);
            }
        }

        fn complete(&mut self, call: RemoteCall, outcome: JobOutcome) {
            assert!(self.dispatcher.complete(call, outcome), "no pending {call}");
            self.pump();
        }

        fn make_ready(&mut self, timeout_secs: u64) {
            self.bridge.start();
            self.complete(RemoteCall::Init, Ok(Value::Null));
            self.complete(
                RemoteCall::Settings,
                Ok(json!({"weight": 90, "timeout": timeout_secs})),
            );
            assert!(self.bridge.is_ready());
        }
    }

    fn identity() -> ResolverIdentity {
        ResolverIdentity::new(
            PluginManifest {
                plugin_name: "jamendo".into(),
                name: "Jamendo".into(),
                description: "Free music".into(),
                version: None,
                static_capabilities: vec!["configTestable".into()],
                manifest: ManifestFiles {
                    main: "contents/code/jamendo.js".into(),
                    icon: None,
                    icon_white: None,
                    icon_background: None,
                },
            },
            "/plugins/jamendo",
        )
    }

    fn sample_result() -> SearchResult {
        let raw = json!([{"artist": "A", "track": "T", "url": "jamendo://track/1"}]);
        decode_search_results(&raw, &ResolverId::new("jamendo"), 90)
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn init_sequence_reaches_ready() {
        let mut h = Harness::new();
        h.bridge.start();
        h.bridge.start();
        assert_eq!(h.dispatcher.calls(), vec![RemoteCall::Init]);
        assert_eq!(h.bridge.phase(), InitPhase::Initializing);

        h.complete(RemoteCall::Init, Ok(json!({})));
        assert_eq!(h.bridge.phase(), InitPhase::AwaitingSettings);
        assert!(!h.bridge.is_ready());

        h.complete(
            RemoteCall::Collection,
            Ok(json!({"prettyname": "Jamendo", "iconfile": "../images/icon.png"})),
        );
        h.complete(RemoteCall::Settings, Ok(json!({"weight": 90, "timeout": 8})));

        assert!(h.bridge.is_ready());
        assert_eq!(h.bridge.weight(), 90);
        assert_eq!(h.bridge.timeout(), Duration::from_secs(8));
        assert_eq!(h.sink.names(), vec!["resolver-ready"]);
        assert_eq!(
            h.bridge.collection().unwrap().icon_path,
            Some(PathBuf::from("/plugins/jamendo/content/contents/images/icon.png"))
        );

        h.complete(
            RemoteCall::GetConfigUi,
            Ok(json!({"fields": [{"name": "quality"}]})),
        );
        assert_eq!(h.bridge.config_ui().unwrap().fields.len(), 1);
        assert!(h.bridge.status().has_config_ui);
    }

    #[tokio::test]
    async fn failed_init_never_becomes_ready() {
        let mut h = Harness::new();
        h.bridge.start();
        h.complete(
            RemoteCall::Init,
            Err(crate::dispatcher::JobError::Failed {
                message: "boom".into(),
            }),
        );

        assert_eq!(h.bridge.phase(), InitPhase::Uninitialized);
        assert!(!h.bridge.resolve(Query::full_text("x")));
        h.bridge.start();
        assert_eq!(h.dispatcher.calls(), vec![RemoteCall::Init]);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn undecodable_settings_leave_resolver_not_ready() {
        let mut h = Harness::new();
        h.bridge.start();
        h.complete(RemoteCall::Init, Ok(Value::Null));
        h.complete(RemoteCall::Settings, Ok(json!("nope")));
        assert!(!h.bridge.is_ready());
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn loosely_typed_settings_still_reach_ready() {
        let mut h = Harness::new();
        h.bridge.start();
        h.complete(RemoteCall::Init, Ok(Value::Null));
        h.complete(
            RemoteCall::Settings,
            Ok(json!({"weight": "90", "timeout": 15.0})),
        );
        assert!(h.bridge.is_ready());
        assert_eq!(h.bridge.weight(), 90);
        assert_eq!(h.bridge.timeout(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn zero_timeout_falls_back_to_configured_default() {
        let mut h = Harness::new();
        h.make_ready(0);
        assert_eq!(h.bridge.timeout(), BridgeConfig::default().default_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_timeout_is_capped_and_resolve_still_arms() {
        let mut h = Harness::new();
        h.make_ready(u64::MAX);
        assert_eq!(h.bridge.timeout(), MAX_TIMEOUT);

        assert!(h.bridge.resolve(Query::full_text("x")));
        assert_eq!(h.bridge.armed_timeout(), Some(MAX_TIMEOUT));

        let event = h.events.recv().await.unwrap();
        assert!(matches!(event, BridgeEvent::TimedOut { .. }));
        h.bridge.handle(event);
        assert!(h.bridge.is_stopped());
    }

    #[tokio::test]
    async fn resolve_is_rejected_before_ready() {
        let mut h = Harness::new();
        assert!(!h.bridge.resolve(Query::full_text("air")));
        assert!(h.bridge.is_stopped());
        assert!(!h.bridge.is_resolving());
        assert!(h.bridge.armed_timeout().is_none());
        assert!(h.dispatcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_arms_timer_and_dispatches_search() {
        let mut h = Harness::new();
        h.make_ready(7);

        assert!(h.bridge.resolve(Query::full_text("air")));
        assert!(!h.bridge.is_stopped());
        assert!(h.bridge.is_resolving());
        assert_eq!(h.bridge.armed_timeout(), Some(Duration::from_secs(7)));

        let job = h.dispatcher.last_job(RemoteCall::Search).unwrap();
        assert_eq!(job.args.unwrap()["query"], "air");
    }

    #[tokio::test(start_paused = true)]
    async fn structured_query_uses_resolve_call() {
        let mut h = Harness::new();
        h.make_ready(5);
        assert!(h.bridge.resolve(Query::structured("Air", "Moon Safari", "Talisman")));

        let args = h.dispatcher.last_job(RemoteCall::Resolve).unwrap().args.unwrap();
        assert_eq!(args["artist"], "Air");
        assert_eq!(args["album"], "Moon Safari");
        assert_eq!(args["track"], "Talisman");
    }

    #[tokio::test(start_paused = true)]
    async fn callback_publishes_once_and_stops() {
        let mut h = Harness::new();
        h.make_ready(5);
        h.bridge.resolve(Query::full_text("air"));

        let raw = json!([
            {"artist": "Air", "track": "Talisman", "url": "j://1"},
            {"artist": "Air"},
            {"artist": "Air", "track": "Ce matin-là", "url": "j://3"}
        ]);
        let call_id = h.bridge.next_call_id - 1;
        h.complete(RemoteCall::Search, Ok(raw.clone()));

        assert!(h.bridge.is_stopped());
        assert!(h.bridge.armed_timeout().is_none());
        match &h.sink.events()[1] {
            ResolverEvent::ResultsReported { results, query, .. } => {
                assert_eq!(results.len(), 2);
                assert_eq!(query, &Query::full_text("air"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        // a duplicate delivery of the same reply is ignored
        h.bridge.handle(BridgeEvent::Completed {
            call_id,
            outcome: Ok(raw),
        });
        assert_eq!(h.sink.count("search-results-reported"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_stops_and_late_reply_still_publishes() {
        let mut h = Harness::new();
        h.make_ready(3);
        h.bridge.resolve(Query::full_text("slow"));

        let event = h.events.recv().await.unwrap();
        assert!(matches!(event, BridgeEvent::TimedOut { .. }));
        h.bridge.handle(event);
        assert!(h.bridge.is_stopped());
        assert!(!h.bridge.is_resolving());
        assert!(h.bridge.is_ready());
        assert!(h.sink.count("search-results-reported") == 0);

        h.complete(
            RemoteCall::Search,
            Ok(json!([{"artist": "A", "track": "T", "url": "u"}])),
        );
        assert_eq!(h.sink.count("search-results-reported"), 1);
        assert!(h.bridge.is_stopped());
        assert!(h.bridge.armed_timeout().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_search_still_clears_busy_state() {
        let mut h = Harness::new();
        h.make_ready(3);
        h.bridge.resolve(Query::full_text("x"));
        h.complete(
            RemoteCall::Search,
            Err(crate::dispatcher::JobError::Terminated),
        );
        assert!(h.bridge.is_stopped());
        assert!(h.bridge.armed_timeout().is_none());
        assert_eq!(h.sink.count("search-results-reported"), 0);
    }

    #[tokio::test]
    async fn lookup_url_publishes_and_forces_stopped() {
        let mut h = Harness::new();
        h.bridge.lookup_url("https://jamendo.com/track/1");
        h.complete(
            RemoteCall::LookupUrl,
            Ok(json!({"type": "track", "title": "T", "artist": "A"})),
        );
        assert!(h.bridge.is_stopped());
        match &h.sink.events()[0] {
            ResolverEvent::UrlLookupResult { url, result, .. } => {
                assert_eq!(url, "https://jamendo.com/track/1");
                assert_eq!(result.title.as_deref(), Some("T"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_url_without_headers_is_published_as_is() {
        let mut h = Harness::new();
        h.bridge.get_stream_url(sample_result());
        let args = h.dispatcher.last_job(RemoteCall::GetStreamUrl).unwrap().args.unwrap();
        assert_eq!(args["url"], "jamendo://track/1");

        h.complete(RemoteCall::GetStreamUrl, Ok(json!({"url": "http://cdn/1.mp3"})));
        match &h.sink.events()[0] {
            ResolverEvent::StreamUrlResolved { url, result, .. } => {
                assert_eq!(url, "http://cdn/1.mp3");
                assert_eq!(result.url, "jamendo://track/1");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_url_with_headers_follows_redirect() {
        let redirects = Arc::new(StaticRedirects::default());
        redirects.insert("http://api/stream/1", "http://cdn/final.mp3");
        let mut h = Harness::with(None, redirects);

        h.bridge.get_stream_url(sample_result());
        h.complete(
            RemoteCall::GetStreamUrl,
            Ok(json!({"url": "http://api/stream/1", "headers": {"X-Token": "t"}})),
        );
        assert!(h.sink.events().is_empty());

        let event = h.events.recv().await.unwrap();
        h.bridge.handle(event);
        match &h.sink.events()[0] {
            ResolverEvent::StreamUrlResolved { url, .. } => assert_eq!(url, "http://cdn/final.mp3"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirect_failure_publishes_nothing() {
        let mut h = Harness::new();
        h.bridge.get_stream_url(sample_result());
        h.complete(
            RemoteCall::GetStreamUrl,
            Ok(json!({"url": "http://api/unknown", "headers": {}})),
        );
        let event = h.events.recv().await.unwrap();
        h.bridge.handle(event);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn set_enabled_persists_then_notifies() {
        let mut h = Harness::new();
        assert!(!h.bridge.is_enabled());

        h.bridge.set_enabled(true);
        assert!(h.bridge.is_enabled());
        assert_eq!(
            h.store.get(h.bridge.id(), ENABLED_KEY).unwrap(),
            Some(Value::Bool(true))
        );
        assert_eq!(
            h.sink.events(),
            vec![ResolverEvent::EnabledStateChanged {
                resolver_id: ResolverId::new("jamendo"),
                enabled: true,
            }]
        );
    }

    #[tokio::test]
    async fn authenticator_overrides_enabled_flag() {
        let logins = Arc::new(SharedLoginStates::new());
        let mut h = Harness::with(
            Some(logins.clone() as Arc<dyn AuthRegistry>),
            Arc::new(StaticRedirects::default()),
        );
        h.bridge.set_enabled(true);
        assert!(h.bridge.is_enabled());

        logins.register(ResolverId::new("jamendo"), false);
        assert!(!h.bridge.is_enabled());
        assert!(!h.bridge.status().enabled);
    }

    #[tokio::test]
    async fn config_test_success_enables_and_reports() {
        let mut h = Harness::new();
        h.bridge.config_test();
        assert_eq!(h.dispatcher.calls(), vec![RemoteCall::ConfigTest]);

        h.bridge.on_config_test_result(ConfigTestKind::SUCCESS_CODE, "");
        assert!(h.bridge.is_enabled());
        assert_eq!(h.sink.count("config-test-result"), 1);
        assert_eq!(
            h.sink.events().last().unwrap(),
            &ResolverEvent::ConfigTestResult {
                resolver_id: ResolverId::new("jamendo"),
                kind: ConfigTestKind::Success,
                message: String::new(),
            }
        );

        h.bridge.on_config_test_result(4, "bad password");
        assert!(!h.bridge.is_enabled());
    }

    #[tokio::test]
    async fn access_token_is_published() {
        let mut h = Harness::new();
        h.bridge.get_access_token();
        h.complete(RemoteCall::GetAccessToken, Ok(json!({"accessToken": "tok"})));
        assert_eq!(
            h.sink.events(),
            vec![ResolverEvent::AccessTokenChanged(AccessToken {
                resolver_id: ResolverId::new("jamendo"),
                token: "tok".into(),
            })]
        );

        h.bridge.get_access_token();
        h.complete(RemoteCall::GetAccessToken, Ok(json!({})));
        assert_eq!(h.sink.events().len(), 1);
    }

    #[tokio::test]
    async fn capabilities_accumulate_over_static_ones() {
        let mut h = Harness::new();
        assert!(h.bridge.capabilities().is_config_testable());
        h.bridge.report_capabilities(0b1000);
        h.bridge.report_capabilities(0b0001);
        let caps: Vec<_> = h.bridge.capabilities().iter().collect();
        assert_eq!(
            caps,
            vec![
                Capability::Browsable,
                Capability::UrlLookup,
                Capability::ConfigTestable
            ]
        );
    }

    #[tokio::test]
    async fn redirect_callback_only_forwards_present_urls() {
        let mut h = Harness::new();
        h.bridge.on_redirect_callback(None);
        assert!(h.dispatcher.calls().is_empty());

        h.bridge.on_redirect_callback(Some("app://cb?code=1"));
        let args = h
            .dispatcher
            .last_job(RemoteCall::OnRedirectCallback)
            .unwrap()
            .args
            .unwrap();
        assert_eq!(args["url"], "app://cb?code=1");
    }

    #[tokio::test]
    async fn fire_and_forget_calls_register_no_callback() {
        let mut h = Harness::new();
        h.bridge.login();
        h.bridge.logout();
        h.bridge.save_user_config();
        assert_eq!(
            h.dispatcher.calls(),
            vec![RemoteCall::Login, RemoteCall::Logout, RemoteCall::SaveUserConfig]
        );
        assert!(!h.dispatcher.complete(RemoteCall::Login, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn set_config_keeps_enabled_flag() {
        let mut h = Harness::new();
        h.bridge.set_enabled(true);

        let mut config = ResolverConfig::new();
        config.insert("quality".into(), json!("high"));
        h.bridge.set_config(config);

        let stored = h.bridge.config();
        assert_eq!(stored["quality"], "high");
        assert_eq!(stored[ENABLED_KEY], true);
    }

    #[tokio::test]
    async fn stored_flag_wins_over_default_list() {
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        let store = Arc::new(MemoryConfigStore::new());
        store
            .set(&ResolverId::new("jamendo"), ENABLED_KEY, Value::Bool(false))
            .unwrap();
        let mut settings = BridgeConfig::default();
        settings.default_enabled = vec!["jamendo".into()];

        let ctx = BridgeContext {
            dispatcher,
            sink: Arc::new(RecordingSink::new()),
            store: store.clone(),
            auth: None,
            redirects: Arc::new(StaticRedirects::default()),
            settings,
        };
        let (bridge, _events) = ResolverBridge::new(identity(), ctx.clone());
        assert!(!bridge.is_enabled());

        let fresh = BridgeContext {
            store: Arc::new(MemoryConfigStore::new()),
            ..ctx
        };
        let (bridge, _events) = ResolverBridge::new(identity(), fresh);
        assert!(bridge.is_enabled());
    }
}
