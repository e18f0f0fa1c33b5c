// Media inspection
//
// The service never decodes video itself. It only needs the dimensions and
// frame count of an upload to parameterize the pipeline:
// - Command: external tool invocation shared with the pipeline
// - Probe: ffprobe-backed implementation of MediaProber

pub mod command;
pub mod probe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use command::ExternalCommand;
pub use probe::FfprobeProber;

use crate::config::ProbeConfig;
use crate::error::Result;

/// Basic metadata of a stored upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
}

/// Reads basic metadata from a media file
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Probe the file at `path`; the file is only read
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;
}

/// Factory for creating media prober instances
pub struct MediaProberFactory;

impl MediaProberFactory {
    /// Create the default prober (ffprobe-based)
    pub fn create_prober(config: ProbeConfig) -> Box<dyn MediaProber> {
        Box::new(FfprobeProber::new(config))
    }
}
