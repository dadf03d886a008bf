//! Application state management

use crate::pipeline::{OutputLayout, PipelineConfig};
use std::path::PathBuf;

use super::error::{Result, ServerError};
use super::ServerConfig;

/// Application state shared across handlers
///
/// Requests share nothing beyond this; every session trains into and
/// predicts from its own folder under `output_folder`.
pub struct AppState {
    pub config: ServerConfig,
    pub pipeline: PipelineConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_pipeline(config, PipelineConfig::default())
    }

    pub fn with_pipeline(config: ServerConfig, pipeline: PipelineConfig) -> Self {
        Self { config, pipeline }
    }

    /// Folder of a session; ids that could escape the output folder are rejected
    pub fn session_layout(&self, session_id: &str) -> Result<OutputLayout> {
        let valid = !session_id.is_empty()
            && session_id != "."
            && session_id != ".."
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(ServerError::BadRequest(format!("invalid user-session-id '{}'", session_id)));
        }
        Ok(OutputLayout::new(PathBuf::from(&self.config.output_folder).join(session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_layout_rejects_traversal() {
        let state = AppState::new(ServerConfig {
            output_folder: "/srv/outputs".to_string(),
            ..ServerConfig::default()
        });
        assert_eq!(
            state.session_layout("abc-123").unwrap().root(),
            std::path::Path::new("/srv/outputs/abc-123")
        );
        assert!(state.session_layout("..").is_err());
        assert!(state.session_layout("a/b").is_err());
        assert!(state.session_layout("").is_err());
    }
}
