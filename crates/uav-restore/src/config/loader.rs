use std::path::Path;

use crate::config::schema::RestoreConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RestoreConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<RestoreConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: RestoreConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks beyond what the schema expresses.
pub fn validate_config(config: &RestoreConfig) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.version != "1.0" {
        return invalid(format!("Unsupported config version: {}", config.version));
    }
    if config.data_directory.trim().is_empty() {
        return invalid("data_directory must not be empty".to_string());
    }
    if config.worker_count == 0 {
        return invalid("worker_count must be at least 1".to_string());
    }
    if config.queue_capacity == 0 {
        return invalid("queue_capacity must be at least 1".to_string());
    }
    if config.stage_timeout_secs == Some(0) {
        return invalid("stage_timeout_secs must be greater than 0".to_string());
    }

    let processing = &config.processing;
    if processing.deblur_kernel % 2 == 0 {
        return invalid(format!(
            "deblur_kernel must be odd, got {}",
            processing.deblur_kernel
        ));
    }
    if !processing.depth_blur_sigma.is_finite() || processing.depth_blur_sigma < 0.0 {
        return invalid("depth_blur_sigma must be a non-negative number".to_string());
    }
    if processing.mesh_grid < 2 {
        return invalid("mesh_grid must be at least 2".to_string());
    }
    if !processing.depth_scale.is_finite() || processing.depth_scale < 0.0 {
        return invalid("depth_scale must be a non-negative number".to_string());
    }
    if !processing.hallucination_scale.is_finite() || processing.hallucination_scale <= 0.0 {
        return invalid("hallucination_scale must be greater than 0".to_string());
    }
    if processing.comparison_height < 16 {
        return invalid("comparison_height must be at least 16".to_string());
    }

    Ok(())
}
