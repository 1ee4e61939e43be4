//! Shared models and ambient services for the resolver bridge workspace:
//! domain types, the TOML configuration file, logging bootstrap, app
//! directories and log redaction.

pub mod config;
pub mod logging;
pub mod models;
pub mod paths;
pub mod redact;

pub use config::{
    BridgeConfig, Config, ConfigError, LogLevel, LogRotation, LoggingConfig, ValidationError,
};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use models::{AccessToken, Query, ResolverId, SearchResult, TrackRef};
pub use paths::{AppDirs, DirsError};

pub const APP_NAME: &str = "resolver-bridge";
pub const APP_AUTHOR: &str = "ResolverBridge";
pub const APP_QUALIFIER: &str = "io";
