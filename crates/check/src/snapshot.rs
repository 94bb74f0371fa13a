//! DOM snapshot capture across render-target widths

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use snapgrid_common::{
    BrowserKind, DeviceCatalog, Error, LayoutBreakpoints, RenderTarget, Result, ViewportSize,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::service::RenderService;

/// Attribute of a serialized DOM node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdtAttribute {
    pub name: String,
    pub value: String,
}

/// Serialized DOM node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdtNode {
    pub node_type: u32,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_value: Option<String>,
    #[serde(default)]
    pub attributes: Vec<CdtAttribute>,
    #[serde(default)]
    pub child_node_indexes: Vec<usize>,
}

impl CdtNode {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }
}

/// Serialized DOM of a page and its same-origin frames
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSnapshot {
    pub url: String,
    /// `src` attribute of the iframe this snapshot was taken from
    #[serde(default)]
    pub src: Option<String>,
    pub cdt: Vec<CdtNode>,
    #[serde(default)]
    pub frames: Vec<DomSnapshot>,
    #[serde(default)]
    pub resource_urls: Vec<String>,
}

impl DomSnapshot {
    /// Clear the `src` of every iframe whose document was not captured
    /// (cross-origin frames), recursing into captured frames
    pub fn blank_cross_origin_iframes(&mut self) {
        let captured: HashSet<String> = self
            .frames
            .iter()
            .filter_map(|frame| frame.src.clone())
            .collect();

        for node in &mut self.cdt {
            let is_iframe = node
                .node_name
                .as_deref()
                .map_or(false, |name| name.eq_ignore_ascii_case("iframe"));
            if !is_iframe {
                continue;
            }
            if let Some(src) = node.attributes.iter_mut().find(|attr| attr.name == "src") {
                if !captured.contains(&src.value) {
                    debug!("Blanking cross-origin iframe src '{}'", src.value);
                    src.value.clear();
                }
            }
        }

        for frame in &mut self.frames {
            frame.blank_cross_origin_iframes();
        }
    }
}

/// Options forwarded to the snapshot collaborator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    pub disable_browser_fetching: bool,
}

/// Serializes the live DOM
#[async_trait]
pub trait SnapshotTaker: Send + Sync {
    async fn take_snapshot(
        &self,
        driver: &dyn Driver,
        browser: BrowserKind,
        options: &SnapshotOptions,
    ) -> Result<DomSnapshot>;
}

/// Width at which a target of `width` pixels is snapshotted
pub fn breakpoint_width(breakpoints: &LayoutBreakpoints, width: u32) -> u32 {
    match breakpoints {
        LayoutBreakpoints::Enabled(_) => width,
        LayoutBreakpoints::Widths(widths) => {
            let fitting = widths.iter().copied().filter(|bp| *bp <= width).max();
            fitting
                .or_else(|| widths.iter().copied().min())
                .unwrap_or(width)
        }
    }
}

/// Snapshots captured for one check, shared between render targets
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSet {
    snapshots: Vec<DomSnapshot>,
    /// Index into `snapshots` for each render target
    assignment: Vec<usize>,
}

impl SnapshotSet {
    /// One snapshot serving `targets` render targets
    pub fn shared(snapshot: DomSnapshot, targets: usize) -> Self {
        Self {
            snapshots: vec![snapshot],
            assignment: vec![0; targets],
        }
    }

    /// Number of render targets served
    pub fn len(&self) -> usize {
        self.assignment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignment.is_empty()
    }

    /// URL of the first target's snapshot
    pub fn url(&self) -> Option<&str> {
        self.assignment
            .first()
            .map(|index| self.snapshots[*index].url.as_str())
    }

    pub fn scrub_cross_origin_iframes(&mut self) {
        for snapshot in &mut self.snapshots {
            snapshot.blank_cross_origin_iframes();
        }
    }

    /// One snapshot per render target; targets sharing a width share the
    /// same allocation
    pub fn per_target(self) -> Vec<Arc<DomSnapshot>> {
        let shared: Vec<Arc<DomSnapshot>> = self.snapshots.into_iter().map(Arc::new).collect();
        self.assignment
            .iter()
            .map(|index| Arc::clone(&shared[*index]))
            .collect()
    }
}

/// Lazily fetched device catalogs, one lookup per catalog
#[derive(Default)]
pub struct DeviceSizeCache {
    emulated: OnceCell<DeviceCatalog>,
    ios: OnceCell<DeviceCatalog>,
}

impl DeviceSizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Viewport size a render target renders at
    pub async fn size_of(
        &self,
        service: &dyn RenderService,
        target: &RenderTarget,
    ) -> Result<ViewportSize> {
        match target {
            RenderTarget::Desktop { width, height, .. } => Ok(ViewportSize::new(*width, *height)),
            RenderTarget::ChromeEmulation {
                device_name,
                orientation,
            } => {
                let catalog = self
                    .emulated
                    .get_or_try_init(|| async {
                        debug!("Fetching emulated device sizes");
                        service.emulated_device_sizes().await
                    })
                    .await?;
                lookup(catalog, device_name).map(|sizes| sizes.for_orientation(*orientation))
            }
            RenderTarget::IosDevice {
                device_name,
                orientation,
            } => {
                let catalog = self
                    .ios
                    .get_or_try_init(|| async {
                        debug!("Fetching iOS device sizes");
                        service.ios_device_sizes().await
                    })
                    .await?;
                lookup(catalog, device_name).map(|sizes| sizes.for_orientation(*orientation))
            }
        }
    }
}

fn lookup<'a>(
    catalog: &'a DeviceCatalog,
    device_name: &str,
) -> Result<&'a snapgrid_common::DeviceSizes> {
    catalog
        .get(device_name)
        .ok_or_else(|| Error::IllegalArgument(format!("unknown device '{}'", device_name)))
}

/// Captures the snapshots a check needs, one per distinct breakpoint width
pub struct SnapshotCapturer {
    taker: Arc<dyn SnapshotTaker>,
    service: Arc<dyn RenderService>,
    device_sizes: DeviceSizeCache,
}

impl SnapshotCapturer {
    pub fn new(taker: Arc<dyn SnapshotTaker>, service: Arc<dyn RenderService>) -> Self {
        Self {
            taker,
            service,
            device_sizes: DeviceSizeCache::new(),
        }
    }

    /// Viewport size of a render target (device sizes are cached)
    pub async fn target_size(&self, target: &RenderTarget) -> Result<ViewportSize> {
        self.device_sizes.size_of(self.service.as_ref(), target).await
    }

    /// Capture snapshots for `targets`.
    ///
    /// Without active breakpoints a single snapshot serves every target. With
    /// breakpoints, one snapshot is taken per distinct breakpoint width; the
    /// current viewport is reused when its width is needed, and the original
    /// viewport is restored after any resize.
    pub async fn capture(
        &self,
        driver: &dyn Driver,
        targets: &[RenderTarget],
        breakpoints: Option<&LayoutBreakpoints>,
        options: &SnapshotOptions,
    ) -> Result<SnapshotSet> {
        let browser = driver.browser();

        let Some(breakpoints) = breakpoints.filter(|bp| bp.is_active()) else {
            debug!("Taking a single dom snapshot for {} target(s)", targets.len());
            let snapshot = self.taker.take_snapshot(driver, browser, options).await?;
            return Ok(SnapshotSet::shared(snapshot, targets.len()));
        };

        let sizes = try_join_all(targets.iter().map(|target| self.target_size(target))).await?;
        let widths: Vec<u32> = sizes
            .iter()
            .map(|size| breakpoint_width(breakpoints, size.width))
            .collect();
        info!(
            "Taking multiple dom snapshots for widths {:?} (breakpoints={:?})",
            widths, breakpoints
        );

        let viewport = driver.viewport_size().await?;
        let mut resized = false;
        let captured = self
            .capture_widths(driver, browser, options, &widths, viewport, &mut resized)
            .await;

        if resized {
            debug!("Restoring viewport to {}", viewport);
            let restored = driver.set_viewport_size(viewport).await;
            match (&captured, restored) {
                (Ok(_), Err(e)) => return Err(e),
                (Err(_), Err(e)) => warn!("Failed to restore viewport {}: {}", viewport, e),
                _ => {}
            }
        }

        captured
    }

    async fn capture_widths(
        &self,
        driver: &dyn Driver,
        browser: BrowserKind,
        options: &SnapshotOptions,
        widths: &[u32],
        viewport: ViewportSize,
        resized: &mut bool,
    ) -> Result<SnapshotSet> {
        let mut snapshots = Vec::new();
        let mut by_width: HashMap<u32, usize> = HashMap::new();

        if widths.contains(&viewport.width) {
            debug!("Taking dom snapshot for existing width {}", viewport.width);
            snapshots.push(self.taker.take_snapshot(driver, browser, options).await?);
            by_width.insert(viewport.width, 0);
        }

        for &width in widths {
            if by_width.contains_key(&width) {
                continue;
            }
            debug!("Taking dom snapshot for width {}", width);
            *resized = true;
            driver
                .set_viewport_size(ViewportSize::new(width, viewport.height))
                .await?;
            snapshots.push(self.taker.take_snapshot(driver, browser, options).await?);
            by_width.insert(width, snapshots.len() - 1);
        }

        let assignment = widths.iter().map(|width| by_width[width]).collect();
        Ok(SnapshotSet {
            snapshots,
            assignment,
        })
    }
}
