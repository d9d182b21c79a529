//! Application Services
//!
//! - [`dispatcher`]: routes raw messages to the first mapper that claims them
//! - [`registry`]: exchange id to feed plugin lookup
//! - [`feed`]: connection lifecycle and snapshot injection
//! - [`normalize`]: the `stream_normalized` entry point

pub mod dispatcher;
pub mod feed;
pub mod normalize;
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;
