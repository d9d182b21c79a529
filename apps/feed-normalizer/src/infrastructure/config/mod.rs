//! Configuration Module
//!
//! Configuration loading for the feed engine and the binary.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, NormalizerConfig, SnapshotSettings, WebSocketSettings,
};
