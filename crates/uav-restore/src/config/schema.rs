use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    pub version: String,
    #[serde(default = "default_data_directory")]
    pub data_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-stage time limit. No limit when absent.
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_data_directory() -> String {
    dirs::home_dir()
        .map(|h| h.join(".uav-restore"))
        .unwrap_or_else(|| PathBuf::from(".uav-restore"))
        .to_string_lossy()
        .to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_directory: default_data_directory(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            stage_timeout_secs: None,
            database: DatabaseConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl RestoreConfig {
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_directory)
    }

    /// Database file to use, or `None` when persistence is off.
    pub fn database_path(&self) -> Option<PathBuf> {
        if !self.database.enabled {
            return None;
        }
        Some(match self.database.path {
            Some(ref path) => PathBuf::from(path),
            None => crate::db::database_path_in(&self.data_dir()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `<data_directory>/uav-restore.db`.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Parameters of the built-in stage implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Box filter size for deblurring. Must be odd.
    #[serde(default = "default_deblur_kernel")]
    pub deblur_kernel: u32,
    /// Gaussian sigma applied to the depth map.
    #[serde(default = "default_depth_blur_sigma")]
    pub depth_blur_sigma: f32,
    /// Depth samples per side of the generated mesh.
    #[serde(default = "default_mesh_grid")]
    pub mesh_grid: u32,
    /// Height of the mesh relief relative to its width.
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f64,
    #[serde(default = "default_hallucination_scale")]
    pub hallucination_scale: f64,
    /// Pixel height of each half of the comparison image.
    #[serde(default = "default_comparison_height")]
    pub comparison_height: u32,
}

fn default_deblur_kernel() -> u32 {
    5
}

fn default_depth_blur_sigma() -> f32 {
    1.1
}

fn default_mesh_grid() -> u32 {
    64
}

fn default_depth_scale() -> f64 {
    0.3
}

fn default_hallucination_scale() -> f64 {
    1.15
}

fn default_comparison_height() -> u32 {
    300
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            deblur_kernel: default_deblur_kernel(),
            depth_blur_sigma: default_depth_blur_sigma(),
            mesh_grid: default_mesh_grid(),
            depth_scale: default_depth_scale(),
            hallucination_scale: default_hallucination_scale(),
            comparison_height: default_comparison_height(),
        }
    }
}
