//! End-to-end: a shell plugin driven through the exec dispatcher and actor.
#![cfg(unix)]

use resolver_bridge::actor;
use resolver_bridge::{
    BridgeContext, BroadcastSink, ConfigStore, ConfigTestKind, ExecDispatcher, FileConfigStore,
    HttpRedirectResolver, PluginConfig, ResolverBridge, ResolverEvent, ResolverHandle,
    ResolverIdentity, ResolverStatus,
};
use resolver_core::models::{Query, ResolverId};
use resolver_core::BridgeConfig;
use serde_json::Value;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const METADATA: &str = r#"{
    "name": "Fake Tunes",
    "pluginName": "fake-tunes",
    "description": "Answers from a shell script",
    "manifest": { "main": "code/plugin.sh" }
}"#;

const PLUGIN: &str = r##"#!/bin/bash
while IFS= read -r line; do
    id=$(echo "$line" | grep -o '"id":[0-9]*' | head -1 | cut -d: -f2)
    method=$(echo "$line" | grep -o '"method":"[A-Za-z]*"' | cut -d'"' -f4)
    case "$method" in
        init) echo '{"id":'$id',"result":null}' ;;
        settings) echo '{"id":'$id',"result":{"name":"Fake Tunes","weight":75,"timeout":4}}' ;;
        collection) echo '{"id":'$id',"result":{"prettyname":"Fake","iconfile":"../images/c.png"}}' ;;
        getConfigUi) echo '{"id":'$id',"result":{"fields":[{"name":"user","widget":"userEdit"}]}}' ;;
        search)
            echo '{"method":"reportCapabilities","params":{"capabilities":8}}'
            echo '{"id":'$id',"result":[{"artist":"Air","track":"Talisman","url":"fake://1","bitrate":"320"},{"artist":"Air"}]}'
            ;;
        getStreamUrl) echo '{"id":'$id',"result":{"url":"http://cdn.example/1.mp3"}}' ;;
        configTest) echo '{"method":"onConfigTestResult","params":{"type":4,"message":"bad password"}}' ;;
        *) echo '{"id":'$id',"error":{"message":"unsupported"}}' ;;
    esac
done
"##;

fn install_plugin(root: &Path) -> ResolverIdentity {
    let content = root.join("content");
    std::fs::create_dir_all(content.join("code")).unwrap();
    std::fs::write(content.join("metadata.json"), METADATA).unwrap();
    let script = content.join("code/plugin.sh");
    std::fs::write(&script, PLUGIN).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    ResolverIdentity::load(root).unwrap()
}

struct Running {
    handle: ResolverHandle,
    events: broadcast::Receiver<ResolverEvent>,
    store: Arc<FileConfigStore>,
    _dir: TempDir,
}

fn launch() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let identity = install_plugin(dir.path());
    let (dispatcher, signals) =
        ExecDispatcher::spawn(&PluginConfig::for_identity(&identity)).unwrap();

    let sink = BroadcastSink::new(64);
    let events = sink.subscribe();
    let store = Arc::new(FileConfigStore::new(dir.path().join("state")));
    let ctx = BridgeContext {
        dispatcher: Arc::new(dispatcher),
        sink: Arc::new(sink),
        store: store.clone(),
        auth: None,
        redirects: Arc::new(HttpRedirectResolver::new().unwrap()),
        settings: BridgeConfig::default(),
    };
    let (bridge, bridge_events) = ResolverBridge::new(identity, ctx);
    let (handle, _task) = actor::spawn(bridge, bridge_events);
    handle.attach_signals(signals);

    Running {
        handle,
        events,
        store,
        _dir: dir,
    }
}

async fn next_event(events: &mut broadcast::Receiver<ResolverEvent>, name: &str) -> ResolverEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.name() == name {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {name} event"))
}

async fn wait_status(
    handle: &ResolverHandle,
    done: impl Fn(&ResolverStatus) -> bool,
) -> ResolverStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = handle.status().await.unwrap();
            if done(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("resolver status never settled")
}

#[tokio::test]
async fn search_through_a_real_process() {
    let mut plugin = launch();
    next_event(&mut plugin.events, "resolver-ready").await;

    let status = plugin.handle.status().await.unwrap();
    assert_eq!(status.name, "Fake Tunes");
    assert_eq!(status.weight, 75);
    assert_eq!(status.timeout, Duration::from_secs(4));

    assert!(plugin
        .handle
        .resolve(Query::full_text("air"))
        .await
        .unwrap());
    let ResolverEvent::ResultsReported { results, .. } =
        next_event(&mut plugin.events, "search-results-reported").await
    else {
        unreachable!()
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].track.title, "Talisman");
    assert_eq!(results[0].bitrate, Some(320));
    assert_eq!(results[0].weight, 75);
    assert_eq!(results[0].resolver_id, ResolverId::new("fake-tunes"));

    // capability reports travel through the signal forwarder
    let status = wait_status(&plugin.handle, |s| {
        s.capabilities.has_url_lookup() && s.has_config_ui && s.collection_icon.is_some()
    })
    .await;
    assert!(status.stopped);
    assert!(status
        .collection_icon
        .unwrap()
        .ends_with("content/images/c.png"));

    plugin.handle.get_stream_url(results[0].clone()).unwrap();
    let ResolverEvent::StreamUrlResolved { url, .. } =
        next_event(&mut plugin.events, "stream-url-resolved").await
    else {
        unreachable!()
    };
    assert_eq!(url, "http://cdn.example/1.mp3");
}

#[tokio::test]
async fn config_test_failure_disables_and_persists() {
    let mut plugin = launch();
    next_event(&mut plugin.events, "resolver-ready").await;
    plugin.handle.set_enabled(true).unwrap();
    next_event(&mut plugin.events, "enabled-state-changed").await;

    plugin.handle.config_test().unwrap();
    let ResolverEvent::ConfigTestResult { kind, message, .. } =
        next_event(&mut plugin.events, "config-test-result").await
    else {
        unreachable!()
    };
    assert_eq!(kind, ConfigTestKind::InvalidCredentials);
    assert_eq!(message, "bad password");

    assert!(!plugin.handle.is_enabled().await.unwrap());
    assert_eq!(
        plugin
            .store
            .get(&ResolverId::new("fake-tunes"), "enabled")
            .unwrap(),
        Some(Value::Bool(false))
    );
}
