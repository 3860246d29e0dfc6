use anyhow::{ensure, Result};
use std::path::PathBuf;
use tracing::info;

use super::AudioAnalyzer;

pub const NO_AUDIO_FILES: &str = "No audio files to process";

/// Stands in for the emotion model until one is wired up.
///
/// Confirms the files arrived and reports a fixed label.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderAudio;

impl AudioAnalyzer for PlaceholderAudio {
    fn analyze(&self, paths: &[PathBuf]) -> Result<String> {
        if paths.is_empty() {
            return Ok(NO_AUDIO_FILES.to_string());
        }
        for path in paths {
            ensure!(path.is_file(), "audio file {} is missing", path.display());
        }
        info!(files = paths.len(), "Audio files received");
        Ok("audio model result".to_string())
    }
}
