//! Lifecycle and result notifications leaving the bridge.

use crate::codec::UrlLookupResult;
use resolver_core::models::{AccessToken, Query, ResolverId, SearchResult};
use std::fmt;
use tokio::sync::broadcast;

/// Outcome categories of a plugin configuration test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigTestKind {
    Success,
    Logout,
    CommunicationError,
    InvalidCredentials,
    InvalidAccount,
    PlayingElsewhere,
    AccountExpired,
    /// Any code outside the known table, including the generic "other" (0).
    Other(i64),
}

impl ConfigTestKind {
    pub const SUCCESS_CODE: i64 = 1;

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ConfigTestKind::Success,
            2 => ConfigTestKind::Logout,
            3 => ConfigTestKind::CommunicationError,
            4 => ConfigTestKind::InvalidCredentials,
            5 => ConfigTestKind::InvalidAccount,
            6 => ConfigTestKind::PlayingElsewhere,
            7 => ConfigTestKind::AccountExpired,
            other => ConfigTestKind::Other(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == ConfigTestKind::Success
    }
}

/// Everything a bridge reports to the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverEvent {
    ResolverReady {
        resolver_id: ResolverId,
    },
    ResultsReported {
        resolver_id: ResolverId,
        query: Query,
        results: Vec<SearchResult>,
    },
    UrlLookupResult {
        resolver_id: ResolverId,
        url: String,
        result: UrlLookupResult,
    },
    StreamUrlResolved {
        resolver_id: ResolverId,
        result: SearchResult,
        url: String,
    },
    EnabledStateChanged {
        resolver_id: ResolverId,
        enabled: bool,
    },
    AccessTokenChanged(AccessToken),
    ConfigTestResult {
        resolver_id: ResolverId,
        kind: ConfigTestKind,
        message: String,
    },
}

impl ResolverEvent {
    pub fn resolver_id(&self) -> &ResolverId {
        match self {
            ResolverEvent::ResolverReady { resolver_id }
            | ResolverEvent::ResultsReported { resolver_id, .. }
            | ResolverEvent::UrlLookupResult { resolver_id, .. }
            | ResolverEvent::StreamUrlResolved { resolver_id, .. }
            | ResolverEvent::EnabledStateChanged { resolver_id, .. }
            | ResolverEvent::ConfigTestResult { resolver_id, .. } => resolver_id,
            ResolverEvent::AccessTokenChanged(token) => &token.resolver_id,
        }
    }

    /// Stable event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ResolverEvent::ResolverReady { .. } => "resolver-ready",
            ResolverEvent::ResultsReported { .. } => "search-results-reported",
            ResolverEvent::UrlLookupResult { .. } => "url-lookup-result",
            ResolverEvent::StreamUrlResolved { .. } => "stream-url-resolved",
            ResolverEvent::EnabledStateChanged { .. } => "enabled-state-changed",
            ResolverEvent::AccessTokenChanged(_) => "access-token-changed",
            ResolverEvent::ConfigTestResult { .. } => "config-test-result",
        }
    }
}

impl fmt::Display for ResolverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.resolver_id())
    }
}

/// Receives bridge notifications. Shared between resolvers, so
/// implementations must tolerate concurrent callers.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: ResolverEvent);
}

/// Fan-out sink backed by a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events; publishing never blocks.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ResolverEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResolverEvent> {
        self.sender.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, event: ResolverEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            tracing::trace!(event = name, "no subscribers for resolver event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_test_codes_map_to_kinds() {
        assert!(ConfigTestKind::from_code(1).is_success());
        assert_eq!(
            ConfigTestKind::from_code(4),
            ConfigTestKind::InvalidCredentials
        );
        assert_eq!(ConfigTestKind::from_code(0), ConfigTestKind::Other(0));
        assert_eq!(ConfigTestKind::from_code(99), ConfigTestKind::Other(99));
    }

    #[tokio::test]
    async fn broadcast_sink_fans_out() {
        let sink = BroadcastSink::new(8);
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.publish(ResolverEvent::ResolverReady {
            resolver_id: ResolverId::new("jamendo"),
        });

        assert_eq!(first.recv().await.unwrap().name(), "resolver-ready");
        assert_eq!(
            second.recv().await.unwrap().resolver_id(),
            &ResolverId::new("jamendo")
        );
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let sink = BroadcastSink::new(1);
        sink.publish(ResolverEvent::EnabledStateChanged {
            resolver_id: ResolverId::new("x"),
            enabled: true,
        });
    }
}
