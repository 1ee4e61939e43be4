//! Bridge between a music host and script resolver plugins.
//!
//! This crate provides:
//! - [`ResolverBridge`], the per-plugin state machine: initialization, search
//!   dispatch with a liveness timeout, stream URL and URL lookup handling,
//!   config tests, and enabled-state persistence
//! - [`actor::spawn`] and [`ResolverHandle`] to run a bridge on its own task
//! - The collaborator traits a host implements ([`JobDispatcher`],
//!   [`NotificationSink`], [`ConfigStore`], [`AuthRegistry`],
//!   [`RedirectResolver`]) with ready-made implementations
//! - [`ExecDispatcher`], which runs a plugin as a child process and speaks
//!   line-delimited JSON over its stdio
//!
//! # Exec plugin protocol
//!
//! ```text
//! host   -> plugin  {"id":1,"method":"search","params":{"query":"air"}}
//! plugin -> host    {"id":1,"result":[{"artist":"Air","track":"Talisman","url":"x://1"}]}
//! plugin -> host    {"id":2,"error":{"message":"not logged in"}}
//! plugin -> host    {"method":"reportCapabilities","params":{"capabilities":8}}
//! plugin -> host    {"method":"onConfigTestResult","params":{"type":1,"message":""}}
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let identity = ResolverIdentity::load(&plugin_dir)?;
//! let (dispatcher, signals) = ExecDispatcher::spawn(&PluginConfig::for_identity(&identity))?;
//! let ctx = BridgeContext { dispatcher: Arc::new(dispatcher), /* ... */ };
//! let (bridge, events) = ResolverBridge::new(identity, ctx);
//! let (handle, _task) = actor::spawn(bridge, events);
//! handle.attach_signals(signals);
//! handle.resolve(Query::full_text("air")).await?;
//! ```

pub mod actor;
pub mod auth;
pub mod bridge;
pub mod capability;
pub mod codec;
pub mod dispatcher;
mod host;
pub mod manifest;
pub mod protocol;
pub mod redirect;
pub mod sink;
pub mod store;
pub mod testing;
mod timeout;

pub use actor::{BridgeError, ResolverHandle};
pub use auth::{AuthRegistry, SharedLoginStates};
pub use bridge::{
    BridgeContext, BridgeEvent, BridgeEvents, CollectionInfo, InitPhase, ResolverBridge,
    ResolverStatus,
};
pub use capability::{Capability, CapabilityRegistry, ResolverCapabilities};
pub use codec::DecodeError;
pub use dispatcher::{Job, JobCallback, JobDispatcher, JobError, JobOutcome, RemoteCall};
pub use host::{ExecDispatcher, PluginConfig, PluginHostError};
pub use manifest::{ManifestError, PluginManifest, ResolverIdentity};
pub use protocol::PluginSignal;
pub use redirect::{HttpRedirectResolver, RedirectError, RedirectResolver};
pub use sink::{BroadcastSink, ConfigTestKind, NotificationSink, ResolverEvent};
pub use store::{ConfigStore, FileConfigStore, MemoryConfigStore, ResolverConfig, StoreError};
pub use timeout::TimeoutMonitor;
