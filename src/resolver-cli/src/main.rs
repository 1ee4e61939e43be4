use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use resolver_bridge::actor;
use resolver_bridge::{
    BridgeContext, BroadcastSink, ExecDispatcher, FileConfigStore, HttpRedirectResolver,
    PluginConfig, ResolverBridge, ResolverEvent, ResolverHandle, ResolverIdentity, ResolverStatus,
};
use resolver_core::models::{Query, SearchResult};
use resolver_core::{init_logging, AppDirs, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

const READY_TIMEOUT: Duration = Duration::from_secs(15);
// extra wait on top of the resolver's own timeout, for late replies
const LATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(
    name = "resolverctl",
    version,
    about = "Drive a script resolver plugin from the command line"
)]
struct Cli {
    /// Plugin directory (takes precedence over bridge.plugin_dir in config)
    #[arg(long, global = true)]
    plugin_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Initialize the plugin and print its status
    Info,
    /// Search by free text or by artist/album/track
    Search(SearchCommand),
    /// Ask the plugin to interpret a URL
    LookupUrl { url: String },
    /// Run the plugin's configuration test
    ConfigTest,
    /// Mark the resolver enabled
    Enable,
    /// Mark the resolver disabled
    Disable,
}

#[derive(Debug, Parser, Clone)]
struct SearchCommand {
    /// Full-text query
    text: Option<String>,
    #[arg(long)]
    artist: Option<String>,
    #[arg(long)]
    album: Option<String>,
    #[arg(long)]
    track: Option<String>,
    /// Also resolve a stream URL for the best result
    #[arg(long)]
    stream: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum QueryError {
    #[error("search requires a text query or --artist/--track")]
    Missing,
    #[error("a text query cannot be combined with --artist/--album/--track")]
    Conflict,
    #[error("structured searches need both --artist and --track")]
    Incomplete,
}

impl SearchCommand {
    fn query(&self) -> Result<Query, QueryError> {
        let structured = self.artist.is_some() || self.album.is_some() || self.track.is_some();
        match (&self.text, structured) {
            (Some(_), true) => Err(QueryError::Conflict),
            (Some(text), false) if !text.trim().is_empty() => Ok(Query::full_text(text.clone())),
            (Some(_), false) | (None, false) => Err(QueryError::Missing),
            (None, true) => match (&self.artist, &self.track) {
                (Some(artist), Some(track)) => Ok(Query::structured(
                    artist.clone(),
                    self.album.clone().unwrap_or_default(),
                    track.clone(),
                )),
                _ => Err(QueryError::Incomplete),
            },
        }
    }
}

/// A running plugin plus the event stream it publishes to.
struct Session {
    handle: ResolverHandle,
    events: broadcast::Receiver<ResolverEvent>,
    plugin: Arc<ExecDispatcher>,
}

impl Session {
    async fn open(plugin_dir: PathBuf, config: &Config, dirs: &AppDirs) -> Result<Self> {
        let identity = ResolverIdentity::load(&plugin_dir)
            .with_context(|| format!("loading plugin at {}", plugin_dir.display()))?;
        tracing::info!(
            resolver_id = %identity.id,
            dir = %plugin_dir.display(),
            "starting resolver plugin"
        );
        let (dispatcher, signals) = ExecDispatcher::spawn(&PluginConfig::for_identity(&identity))?;
        let plugin = Arc::new(dispatcher);

        let sink = BroadcastSink::new(256);
        let events = sink.subscribe();
        let ctx = BridgeContext {
            dispatcher: plugin.clone(),
            sink: Arc::new(sink),
            store: Arc::new(FileConfigStore::new(dirs.resolver_state_dir())),
            auth: None,
            redirects: Arc::new(HttpRedirectResolver::new()?),
            settings: config.bridge.clone(),
        };
        let (bridge, bridge_events) = ResolverBridge::new(identity, ctx);
        let (handle, _task) = actor::spawn(bridge, bridge_events);
        handle.attach_signals(signals);

        let mut session = Self {
            handle,
            events,
            plugin,
        };
        session
            .wait_for(READY_TIMEOUT, |event| {
                matches!(event, ResolverEvent::ResolverReady { .. })
            })
            .await
            .ok_or_else(|| anyhow!("plugin did not become ready"))?;
        Ok(session)
    }

    async fn wait_for(
        &mut self,
        limit: Duration,
        wanted: impl Fn(&ResolverEvent) -> bool,
    ) -> Option<ResolverEvent> {
        let deadline = Instant::now() + limit;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Ok(event)) if wanted(&event) => return Some(event),
                Ok(Ok(event)) => tracing::debug!(%event, "skipping event"),
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "event stream lagged")
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
            }
        }
    }

    async fn status(&self) -> Result<ResolverStatus> {
        Ok(self.handle.status().await?)
    }

    fn close(self) {
        self.plugin.shutdown();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    dirs.ensure_exists()?;
    let config = Config::load_or_default(&dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;

    let plugin_dir = cli
        .plugin_dir
        .clone()
        .or_else(|| config.bridge.plugin_dir.clone())
        .ok_or_else(|| anyhow!("no plugin directory; pass --plugin-dir or set bridge.plugin_dir"))?;

    // validate arguments before spawning anything
    let query = match &cli.command {
        Command::Search(search) => Some(search.query()?),
        _ => None,
    };

    let mut session = Session::open(plugin_dir, &config, &dirs).await?;

    match cli.command {
        Command::Info => print_status(&session.status().await?),
        Command::Search(search) => {
            let query = query.ok_or(QueryError::Missing)?;
            run_search(&mut session, query, search.stream).await?;
        }
        Command::LookupUrl { url } => {
            session.handle.lookup_url(url.clone())?;
            let limit = session.status().await?.timeout + LATE_GRACE;
            match session
                .wait_for(limit, |e| matches!(e, ResolverEvent::UrlLookupResult { .. }))
                .await
            {
                Some(ResolverEvent::UrlLookupResult { result, .. }) => {
                    println!("{url}: {:?}", result.kind);
                    for line in [&result.title, &result.name, &result.artist, &result.album]
                        .into_iter()
                        .flatten()
                    {
                        println!("  {line}");
                    }
                    for track in &result.tracks {
                        println!(
                            "  - {} - {}",
                            track.artist.as_deref().unwrap_or("?"),
                            track.track.as_deref().unwrap_or("?")
                        );
                    }
                }
                _ => println!("{url}: no answer"),
            }
        }
        Command::ConfigTest => {
            session.handle.config_test()?;
            let limit = session.status().await?.timeout + LATE_GRACE;
            match session
                .wait_for(limit, |e| matches!(e, ResolverEvent::ConfigTestResult { .. }))
                .await
            {
                Some(ResolverEvent::ConfigTestResult { kind, message, .. }) => {
                    println!("config test: {kind:?} {message}");
                }
                _ => println!("config test: no answer"),
            }
        }
        Command::Enable => set_enabled(&mut session, true).await?,
        Command::Disable => set_enabled(&mut session, false).await?,
    }

    session.close();
    Ok(())
}

async fn run_search(session: &mut Session, query: Query, stream: bool) -> Result<()> {
    if !session.handle.resolve(query.clone()).await? {
        return Err(anyhow!("resolver is not ready"));
    }

    let limit = session.status().await?.timeout + LATE_GRACE;
    let results = match session
        .wait_for(limit, |e| matches!(e, ResolverEvent::ResultsReported { .. }))
        .await
    {
        Some(ResolverEvent::ResultsReported { results, .. }) => results,
        _ => {
            println!("{query}: no results");
            return Ok(());
        }
    };

    println!("{query}: {} result(s)", results.len());
    for result in &results {
        println!("  {}", describe(result));
    }

    if stream {
        let Some(best) = best_result(&results) else {
            return Ok(());
        };
        session.handle.get_stream_url(best.clone())?;
        match session
            .wait_for(limit, |e| matches!(e, ResolverEvent::StreamUrlResolved { .. }))
            .await
        {
            Some(ResolverEvent::StreamUrlResolved { url, .. }) => println!("stream: {url}"),
            _ => println!("stream: no answer"),
        }
    }
    Ok(())
}

async fn set_enabled(session: &mut Session, enabled: bool) -> Result<()> {
    session.handle.set_enabled(enabled)?;
    session
        .wait_for(READY_TIMEOUT, |e| {
            matches!(e, ResolverEvent::EnabledStateChanged { .. })
        })
        .await;
    let state = if session.handle.is_enabled().await? {
        "enabled"
    } else {
        "disabled"
    };
    println!("{}: {state}", session.handle.id());
    Ok(())
}

fn best_result(results: &[SearchResult]) -> Option<&SearchResult> {
    results.iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

fn describe(result: &SearchResult) -> String {
    let mut line = format!(
        "[{:.2}] {} - {}",
        result.score, result.track.artist, result.track.title
    );
    if let Some(album) = &result.track.album {
        line.push_str(&format!(" ({album})"));
    }
    if let Some(bitrate) = result.bitrate {
        line.push_str(&format!(" {bitrate}kbps"));
    }
    line.push_str(&format!(" <{}>", result.url));
    line
}

fn print_status(status: &ResolverStatus) {
    println!("{} ({})", status.name, status.id);
    if !status.description.is_empty() {
        println!("  {}", status.description);
    }
    println!("  weight: {}", status.weight);
    println!("  timeout: {}s", status.timeout.as_secs_f32());
    println!("  enabled: {}", status.enabled);
    let capabilities: Vec<_> = status
        .capabilities
        .iter()
        .map(|c| c.manifest_name())
        .collect();
    if capabilities.is_empty() {
        println!("  capabilities: (none)");
    } else {
        println!("  capabilities: {}", capabilities.join(", "));
    }
    if let Some(icon) = &status.collection_icon {
        println!("  collection icon: {}", icon.display());
    }
}
