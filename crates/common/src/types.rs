//! Core types for snapgrid

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Geometry
// ============================================================================

/// Axis-aligned rectangle in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Shift into the coordinate space of an image that was cropped by
    /// `offset`. Position is pinned at 0, size is untouched.
    pub fn with_crop_offset(&self, offset: ImageCropOffset) -> Self {
        Self {
            left: (self.left - offset.left).max(0.0),
            top: (self.top - offset.top).max(0.0),
            width: self.width,
            height: self.height,
        }
    }
}

/// Offset by which the compared image was cropped relative to the full page
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageCropOffset {
    pub left: f64,
    pub top: f64,
}

impl ImageCropOffset {
    pub fn new(left: f64, top: f64) -> Self {
        Self { left, top }
    }
}

/// Allowed movement of a floating region
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatingOffsets {
    pub max_up_offset: f64,
    pub max_down_offset: f64,
    pub max_left_offset: f64,
    pub max_right_offset: f64,
}

impl FloatingOffsets {
    pub fn uniform(offset: f64) -> Self {
        Self {
            max_up_offset: offset,
            max_down_offset: offset,
            max_left_offset: offset,
            max_right_offset: offset,
        }
    }
}

/// Browser viewport size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for ViewportSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ============================================================================
// Render targets
// ============================================================================

/// Browser engine used by the render service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrowserKind {
    Chrome,
    Firefox,
    Safari,
    EdgeChromium,
    Ie11,
}

impl Default for BrowserKind {
    fn default() -> Self {
        Self::Chrome
    }
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserKind::Chrome => write!(f, "chrome"),
            BrowserKind::Firefox => write!(f, "firefox"),
            BrowserKind::Safari => write!(f, "safari"),
            BrowserKind::EdgeChromium => write!(f, "edge-chromium"),
            BrowserKind::Ie11 => write!(f, "ie11"),
        }
    }
}

/// Screen orientation of an emulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenOrientation {
    Portrait,
    Landscape,
}

impl Default for ScreenOrientation {
    fn default() -> Self {
        Self::Portrait
    }
}

/// One browser/device configuration a check is rendered against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderTarget {
    /// Desktop browser with an explicit window size
    Desktop {
        width: u32,
        height: u32,
        #[serde(default)]
        browser: BrowserKind,
    },

    /// Chrome device emulation
    ChromeEmulation {
        device_name: String,
        #[serde(default)]
        orientation: ScreenOrientation,
    },

    /// Native iOS simulator
    IosDevice {
        device_name: String,
        #[serde(default)]
        orientation: ScreenOrientation,
    },
}

impl RenderTarget {
    pub fn desktop(width: u32, height: u32, browser: BrowserKind) -> Self {
        RenderTarget::Desktop {
            width,
            height,
            browser,
        }
    }

    /// Explicit size, when the target carries one
    pub fn explicit_size(&self) -> Option<ViewportSize> {
        match self {
            RenderTarget::Desktop { width, height, .. } => Some(ViewportSize::new(*width, *height)),
            _ => None,
        }
    }
}

/// Portrait and landscape sizes of an emulated device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceSizes {
    pub portrait: ViewportSize,
    pub landscape: ViewportSize,
}

impl DeviceSizes {
    pub fn for_orientation(&self, orientation: ScreenOrientation) -> ViewportSize {
        match orientation {
            ScreenOrientation::Portrait => self.portrait,
            ScreenOrientation::Landscape => self.landscape,
        }
    }
}

/// Device name -> sizes, as published by the render service
pub type DeviceCatalog = HashMap<String, DeviceSizes>;

/// Responsive breakpoints used to bucket render targets onto shared snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayoutBreakpoints {
    /// `true` snapshots every target at its own width
    Enabled(bool),
    /// Snapshot at the largest breakpoint not exceeding each target's width
    Widths(Vec<u32>),
}

impl LayoutBreakpoints {
    pub fn is_active(&self) -> bool {
        match self {
            LayoutBreakpoints::Enabled(enabled) => *enabled,
            LayoutBreakpoints::Widths(widths) => !widths.is_empty(),
        }
    }
}

/// What to do with cross-origin iframes found in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorsIframeHandling {
    Keep,
    Snapshot,
    Blank,
}

impl Default for CorsIframeHandling {
    fn default() -> Self {
        Self::Blank
    }
}

/// Comparison strictness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLevel {
    None,
    Layout,
    Content,
    Strict,
    Exact,
}

impl Default for MatchLevel {
    fn default() -> Self {
        Self::Strict
    }
}

/// Batch the tests of a run are grouped under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for BatchInfo {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: None,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Result of a single check
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchResult {
    pub as_expected: bool,
    #[serde(default)]
    pub window_id: Option<u32>,
}

/// Final state of a test on the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Unresolved,
    Failed,
    Aborted,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Unresolved => write!(f, "unresolved"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Results of one test on one render target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub name: String,
    pub status: TestStatus,
    #[serde(default)]
    pub steps: u32,
    #[serde(default)]
    pub mismatches: u32,
    #[serde(default)]
    pub url: Option<String>,
}

impl TestResults {
    pub fn new(name: impl Into<String>, status: TestStatus) -> Self {
        Self {
            name: name.into(),
            status,
            steps: 0,
            mismatches: 0,
            url: None,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_offset_shifts_and_pins() {
        let rect = Rectangle::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(
            rect.with_crop_offset(ImageCropOffset::new(3.0, 4.0)),
            Rectangle::new(7.0, 16.0, 30.0, 40.0)
        );
        assert_eq!(
            rect.with_crop_offset(ImageCropOffset::new(50.0, 4.0)),
            Rectangle::new(0.0, 16.0, 30.0, 40.0)
        );
    }

    #[test]
    fn test_render_target_explicit_size() {
        let desktop = RenderTarget::desktop(800, 600, BrowserKind::Firefox);
        assert_eq!(desktop.explicit_size(), Some(ViewportSize::new(800, 600)));

        let device = RenderTarget::ChromeEmulation {
            device_name: "Pixel 4".to_string(),
            orientation: ScreenOrientation::Portrait,
        };
        assert_eq!(device.explicit_size(), None);
    }

    #[test]
    fn test_breakpoints_activity() {
        assert!(LayoutBreakpoints::Enabled(true).is_active());
        assert!(!LayoutBreakpoints::Enabled(false).is_active());
        assert!(!LayoutBreakpoints::Widths(vec![]).is_active());
        assert!(LayoutBreakpoints::Widths(vec![768]).is_active());
    }
}
