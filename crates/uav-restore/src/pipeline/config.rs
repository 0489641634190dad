use std::time::Duration;

use crate::config::{ProcessingConfig, RestoreConfig};

/// Engine settings derived from the application config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stage_timeout: Option<Duration>,
    pub processing: ProcessingConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &RestoreConfig) -> Self {
        Self {
            stage_timeout: config.stage_timeout_secs.map(Duration::from_secs),
            processing: config.processing.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: None,
            processing: ProcessingConfig::default(),
        }
    }
}
