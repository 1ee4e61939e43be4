//! Task-owned bridges and the cloneable handle used to drive them.

use crate::bridge::{BridgeEvents, ResolverBridge, ResolverStatus};
use crate::protocol::PluginSignal;
use crate::store::ResolverConfig;
use resolver_core::models::{Query, ResolverId, SearchResult};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("resolver {resolver_id} is no longer running")]
    Closed { resolver_id: ResolverId },
}

enum Command {
    Resolve {
        query: Query,
        reply: oneshot::Sender<bool>,
    },
    GetStreamUrl(SearchResult),
    LookupUrl(String),
    Login,
    Logout,
    SaveUserConfig,
    RefreshConfigUi,
    RedirectCallback(Option<String>),
    ConfigTest,
    ConfigTestResult {
        code: i64,
        message: String,
    },
    GetAccessToken,
    SetEnabled(bool),
    ReportCapabilities(u32),
    SetConfig(ResolverConfig),
    Config(oneshot::Sender<ResolverConfig>),
    IsEnabled(oneshot::Sender<bool>),
    Status(oneshot::Sender<ResolverStatus>),
}

/// Handle to a bridge running on its own task.
///
/// All mutation happens on that task; the handle only queues commands. The
/// task stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct ResolverHandle {
    id: ResolverId,
    commands: mpsc::UnboundedSender<Command>,
}

/// Start `bridge` (its `init` call included) on a new task.
pub fn spawn(bridge: ResolverBridge, events: BridgeEvents) -> (ResolverHandle, JoinHandle<()>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    let handle = ResolverHandle {
        id: bridge.id().clone(),
        commands,
    };
    let task = tokio::spawn(run(bridge, events, receiver));
    (handle, task)
}

async fn run(
    mut bridge: ResolverBridge,
    mut events: BridgeEvents,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    bridge.start();
    loop {
        tokio::select! {
            Some(event) = events.recv() => bridge.handle(event),
            command = commands.recv() => match command {
                Some(command) => apply(&mut bridge, command),
                None => break,
            },
        }
    }
    tracing::debug!(resolver_id = %bridge.id(), "resolver task stopped");
}

fn apply(bridge: &mut ResolverBridge, command: Command) {
    match command {
        Command::Resolve { query, reply } => {
            let _ = reply.send(bridge.resolve(query));
        }
        Command::GetStreamUrl(result) => bridge.get_stream_url(result),
        Command::LookupUrl(url) => bridge.lookup_url(&url),
        Command::Login => bridge.login(),
        Command::Logout => bridge.logout(),
        Command::SaveUserConfig => bridge.save_user_config(),
        Command::RefreshConfigUi => bridge.fetch_config_ui(),
        Command::RedirectCallback(url) => bridge.on_redirect_callback(url.as_deref()),
        Command::ConfigTest => bridge.config_test(),
        Command::ConfigTestResult { code, message } => {
            bridge.on_config_test_result(code, &message)
        }
        Command::GetAccessToken => bridge.get_access_token(),
        Command::SetEnabled(enabled) => bridge.set_enabled(enabled),
        Command::ReportCapabilities(mask) => bridge.report_capabilities(mask),
        Command::SetConfig(config) => bridge.set_config(config),
        Command::Config(reply) => {
            let _ = reply.send(bridge.config());
        }
        Command::IsEnabled(reply) => {
            let _ = reply.send(bridge.is_enabled());
        }
        Command::Status(reply) => {
            let _ = reply.send(bridge.status());
        }
    }
}

impl ResolverHandle {
    pub fn id(&self) -> &ResolverId {
        &self.id
    }

    fn send(&self, command: Command) -> Result<(), BridgeError> {
        self.commands.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> BridgeError {
        BridgeError::Closed {
            resolver_id: self.id.clone(),
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, BridgeError> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply))?;
        response.await.map_err(|_| self.closed())
    }

    /// Returns whether the search was dispatched.
    pub async fn resolve(&self, query: Query) -> Result<bool, BridgeError> {
        self.request(|reply| Command::Resolve { query, reply }).await
    }

    pub fn get_stream_url(&self, result: SearchResult) -> Result<(), BridgeError> {
        self.send(Command::GetStreamUrl(result))
    }

    pub fn lookup_url(&self, url: impl Into<String>) -> Result<(), BridgeError> {
        self.send(Command::LookupUrl(url.into()))
    }

    pub fn login(&self) -> Result<(), BridgeError> {
        self.send(Command::Login)
    }

    pub fn logout(&self) -> Result<(), BridgeError> {
        self.send(Command::Logout)
    }

    pub fn save_user_config(&self) -> Result<(), BridgeError> {
        self.send(Command::SaveUserConfig)
    }

    pub fn refresh_config_ui(&self) -> Result<(), BridgeError> {
        self.send(Command::RefreshConfigUi)
    }

    pub fn on_redirect_callback(&self, url: Option<String>) -> Result<(), BridgeError> {
        self.send(Command::RedirectCallback(url))
    }

    pub fn config_test(&self) -> Result<(), BridgeError> {
        self.send(Command::ConfigTest)
    }

    pub fn on_config_test_result(
        &self,
        code: i64,
        message: impl Into<String>,
    ) -> Result<(), BridgeError> {
        self.send(Command::ConfigTestResult {
            code,
            message: message.into(),
        })
    }

    pub fn get_access_token(&self) -> Result<(), BridgeError> {
        self.send(Command::GetAccessToken)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), BridgeError> {
        self.send(Command::SetEnabled(enabled))
    }

    pub fn report_capabilities(&self, mask: u32) -> Result<(), BridgeError> {
        self.send(Command::ReportCapabilities(mask))
    }

    pub fn set_config(&self, config: ResolverConfig) -> Result<(), BridgeError> {
        self.send(Command::SetConfig(config))
    }

    pub async fn config(&self) -> Result<ResolverConfig, BridgeError> {
        self.request(Command::Config).await
    }

    pub async fn is_enabled(&self) -> Result<bool, BridgeError> {
        self.request(Command::IsEnabled).await
    }

    pub async fn status(&self) -> Result<ResolverStatus, BridgeError> {
        self.request(Command::Status).await
    }

    /// Apply plugin-initiated calls from an exec dispatcher until either side
    /// goes away.
    pub fn attach_signals(
        &self,
        mut signals: mpsc::UnboundedReceiver<PluginSignal>,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let sent = match signal {
                    PluginSignal::ReportCapabilities(mask) => handle.report_capabilities(mask),
                    PluginSignal::ConfigTestResult { code, message } => {
                        handle.on_config_test_result(code, message)
                    }
                };
                if sent.is_err() {
                    break;
                }
            }
        })
    }
}
