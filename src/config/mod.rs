//! Configuration types for loading and plotting normalized worms.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for PNG plots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Image width in pixels
    #[serde(default = "default_plot_width")]
    pub width: u32,

    /// Image height in pixels
    #[serde(default = "default_plot_height")]
    pub height: u32,

    /// Radius of skeleton point markers
    #[serde(default = "default_point_radius")]
    pub point_radius: u32,

    /// RGB colors for skeleton, vulva contour and non-vulva contour
    #[serde(default = "default_skeleton_color")]
    pub skeleton_color: [u8; 3],

    #[serde(default = "default_vulva_color")]
    pub vulva_color: [u8; 3],

    #[serde(default = "default_non_vulva_color")]
    pub non_vulva_color: [u8; 3],
}

fn default_plot_width() -> u32 {
    800
}

fn default_plot_height() -> u32 {
    600
}

fn default_point_radius() -> u32 {
    3
}

fn default_skeleton_color() -> [u8; 3] {
    [0, 114, 255] // blue
}

fn default_vulva_color() -> [u8; 3] {
    [0, 200, 83] // green
}

fn default_non_vulva_color() -> [u8; 3] {
    [255, 87, 34] // orange
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: default_plot_width(),
            height: default_plot_height(),
            point_radius: default_point_radius(),
            skeleton_color: default_skeleton_color(),
            vulva_color: default_vulva_color(),
            non_vulva_color: default_non_vulva_color(),
        }
    }
}

/// Main configuration for a normalized worm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WormConfig {
    /// Use the legacy midbody partition [20, 29) instead of [16, 33)
    #[serde(default)]
    pub mimic_old_behaviour: bool,

    /// Name of the struct variable in the data file
    #[serde(default = "default_record_name")]
    pub record_name: String,

    /// Name of the basis variable in the eigenworm file
    #[serde(default = "default_eigenworm_variable")]
    pub eigenworm_variable: String,

    /// Frame-code table to use instead of the bundled one
    #[serde(default)]
    pub frame_codes_path: Option<PathBuf>,

    #[serde(default)]
    pub plot: PlotConfig,
}

fn default_record_name() -> String {
    "s".to_string()
}

fn default_eigenworm_variable() -> String {
    "eigenWorms".to_string()
}

impl Default for WormConfig {
    fn default() -> Self {
        Self {
            mimic_old_behaviour: false,
            record_name: default_record_name(),
            eigenworm_variable: default_eigenworm_variable(),
            frame_codes_path: None,
            plot: PlotConfig::default(),
        }
    }
}

impl WormConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: WormConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
