//! Job configuration
//!
//! Stored as RON by default; files ending in `.json` are read and written as
//! JSON. Every field has a default, so partial files are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::placement::LayoutPolicy;
use crate::projection::ViewDirection;

/// Output format of the flattener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Dxf,
}

/// Header fields written into exported STEP files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    pub author: Option<String>,
    pub organization: Option<String>,
}

/// Settings shared by assembly and conversion jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub layout: LayoutPolicy,
    /// Views in drawing order, left to right
    pub views: Vec<ViewDirection>,
    /// Maximum chord deviation for approximated curves
    pub curve_tolerance: f64,
    /// Distance under which projected geometry is merged
    pub dedup_tolerance: f64,
    /// View pitch as a multiple of the largest model extent
    pub view_spacing: f64,
    pub format: OutputFormat,
    /// Import parts on worker threads
    pub parallel_loads: bool,
    /// Write `<output>.manifest.json` next to assembled STEP files
    pub write_manifest: bool,
    pub step: StepConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layout: LayoutPolicy::default(),
            views: vec![ViewDirection::Top, ViewDirection::Front, ViewDirection::Right],
            curve_tolerance: 0.5,
            dedup_tolerance: 1e-6,
            view_spacing: 1.5,
            format: OutputFormat::Dxf,
            parallel_loads: true,
            write_manifest: true,
            step: StepConfig::default(),
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

impl Config {
    /// Check ranges and consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.views.is_empty() {
            return Err(ConfigError::Invalid("at least one view is required".into()));
        }
        if let Some((i, view)) = self
            .views
            .iter()
            .enumerate()
            .find(|(i, v)| self.views[..*i].contains(v))
        {
            return Err(ConfigError::Invalid(format!(
                "view '{}' is listed twice (position {})",
                view,
                i + 1
            )));
        }

        for (name, value) in [
            ("curve_tolerance", self.curve_tolerance),
            ("dedup_tolerance", self.dedup_tolerance),
            ("view_spacing", self.view_spacing),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a positive length, got {}",
                    name, value
                )));
            }
        }
        if self.dedup_tolerance >= self.curve_tolerance {
            return Err(ConfigError::Invalid(format!(
                "dedup_tolerance ({}) must be smaller than curve_tolerance ({})",
                self.dedup_tolerance, self.curve_tolerance
            )));
        }
        Ok(())
    }

    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            ron::from_str(content).map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron(&self) -> Result<String, ConfigError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        if is_json(path) {
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Self::from_ron(&content)
        }
    }

    /// Save the configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            self.to_ron()?
        };
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }
}
