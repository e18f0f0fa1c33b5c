//! ffprobe-backed media metadata.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::config::ProbeConfig;
use crate::error::{FlowEditError, Result};
use super::command::{stderr_tail, ExternalCommand};
use super::{MediaInfo, MediaProber};

/// ffprobe JSON output, reduced to what we read.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    nb_read_frames: Option<String>,
    nb_frames: Option<String>,
}

pub struct FfprobeProber {
    config: ProbeConfig,
}

impl FfprobeProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    fn command(&self, path: &Path) -> ExternalCommand {
        ExternalCommand::new(&self.config.binary_path, "Media probe")
            .args(["-v", "error", "-select_streams", "v:0", "-count_frames"])
            .args(["-show_entries", "stream=codec_type,width,height,nb_read_frames,nb_frames"])
            .args(["-of", "json"])
            .path(path)
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        // Opened read-only to surface unreadable files early; closed at the end of the block.
        {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| FlowEditError::probe(path, format!("cannot open file: {}", e)))?;
            let metadata = file
                .metadata()
                .await
                .map_err(|e| FlowEditError::probe(path, format!("cannot stat file: {}", e)))?;
            if !metadata.is_file() {
                return Err(FlowEditError::probe(path, "not a regular file"));
            }
        }

        let output = self
            .command(path)
            .execute()
            .await
            .map_err(|e| FlowEditError::probe(path, format!("failed to run {}: {}", self.config.binary_path, e)))?;

        if !output.status.success() {
            return Err(FlowEditError::probe(
                path,
                format!("{} exited with {}: {}", self.config.binary_path, output.status, stderr_tail(&output, 3)),
            ));
        }

        let info = parse_probe_output(&output.stdout).map_err(|reason| FlowEditError::probe(path, reason))?;
        info!(
            "Probed {}: {}x{}, {} frames",
            path.display(),
            info.width,
            info.height,
            info.frame_count
        );
        Ok(info)
    }
}

/// Extract dimensions and frame count from ffprobe's JSON.
fn parse_probe_output(stdout: &[u8]) -> std::result::Result<MediaInfo, String> {
    let probe: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unreadable probe output: {}", e))?;

    let stream = probe
        .streams
        .into_iter()
        .find(|s| s.codec_type.as_deref().unwrap_or("video") == "video")
        .ok_or_else(|| "no video stream found".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };

    // nb_read_frames comes from -count_frames; nb_frames is container metadata
    let frame_count = [stream.nb_read_frames.as_deref(), stream.nb_frames.as_deref()]
        .into_iter()
        .flatten()
        .filter_map(|n| n.trim().parse::<u32>().ok())
        .find(|n| *n > 0)
        .ok_or_else(|| "frame count unavailable".to_string())?;

    debug!("Parsed probe output: {}x{} {} frames", width, height, frame_count);

    Ok(MediaInfo {
        width,
        height,
        frame_count,
    })
}
