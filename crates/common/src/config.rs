//! Test and runner configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::guard::{self, NumberBounds};
use crate::types::*;

/// Per-test configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Application under test
    pub app_name: Option<String>,

    /// Test name
    pub test_name: Option<String>,

    /// Explicit viewport size (wins over every other source)
    pub viewport_size: Option<ViewportSize>,

    /// Render targets to check against
    pub browsers: Vec<RenderTarget>,

    /// Responsive breakpoints for multi-width capture
    pub layout_breakpoints: Option<LayoutBreakpoints>,

    /// Cross-origin iframe handling
    pub cors_iframe_handling: CorsIframeHandling,

    /// Ask the snapshot collaborator not to fetch resources in-browser
    pub disable_browser_fetching: bool,

    /// Disabled lifecycles make no driver or remote calls on check
    pub is_disabled: bool,

    /// Default match level for checks
    pub match_level: MatchLevel,

    /// Batch info
    pub batch: BatchInfo,

    /// Baseline branch
    pub branch_name: Option<String>,

    /// Batch runner options
    pub runner: RunnerOptions,
}

/// Options for the concurrent batch runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// Maximum number of test units in flight
    pub concurrency: usize,

    /// Branch handed to each unit's setup hook
    pub branch_name: String,

    /// Remote browser host handed to each unit's setup hook
    pub host: Option<String>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            concurrency: 15,
            branch_name: "master".to_string(),
            host: None,
        }
    }
}

impl Configuration {
    pub fn new(app_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            app_name: Some(app_name.into()),
            test_name: Some(test_name.into()),
            ..Default::default()
        }
    }

    pub fn with_browser(mut self, target: RenderTarget) -> Self {
        self.browsers.push(target);
        self
    }

    pub fn with_viewport_size(mut self, size: ViewportSize) -> Self {
        self.viewport_size = Some(size);
        self
    }

    pub fn with_layout_breakpoints(mut self, breakpoints: LayoutBreakpoints) -> Self {
        self.layout_breakpoints = Some(breakpoints);
        self
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check numeric settings
    pub fn validate(&self) -> Result<()> {
        if let Some(vs) = &self.viewport_size {
            guard::number(vs.width as f64, "viewportSize.width", NumberBounds::positive())?;
            guard::number(vs.height as f64, "viewportSize.height", NumberBounds::positive())?;
        }
        if let Some(LayoutBreakpoints::Widths(widths)) = &self.layout_breakpoints {
            for width in widths {
                guard::number(*width as f64, "layoutBreakpoints", NumberBounds::positive())?;
            }
        }
        self.runner.validate()
    }
}

impl RunnerOptions {
    /// Largest concurrency the runner's semaphore can hold
    pub const MAX_CONCURRENCY: usize = usize::MAX >> 3;

    pub fn validate(&self) -> Result<()> {
        guard::number(self.concurrency as f64, "concurrency", NumberBounds::positive())?;
        if self.concurrency > Self::MAX_CONCURRENCY {
            return Err(Error::IllegalArgument(format!(
                "concurrency must be <= {}",
                Self::MAX_CONCURRENCY
            )));
        }
        Ok(())
    }
}
