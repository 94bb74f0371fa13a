//! Selector resolution collaborator

use async_trait::async_trait;
use snapgrid_common::{ImageCropOffset, Result};

use crate::driver::{Driver, ElementMark};
use crate::regions::ResolvedValue;

/// Output of a selector lookup against the live DOM
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectorResolution {
    /// Where the checked target starts on the full page, when a target
    /// region was requested
    pub crop_offset: Option<ImageCropOffset>,

    /// One slot per requested mark, in request order
    pub table: Vec<Vec<ResolvedValue>>,
}

/// Locates marked elements and reports their geometry
#[async_trait]
pub trait SelectorResolver: Send + Sync {
    /// Resolve every mark, order-aligned to `marks`. `target` is the mark of
    /// the checked region, if the check targets one.
    async fn resolve(
        &self,
        driver: &dyn Driver,
        marks: &[ElementMark],
        target: Option<&ElementMark>,
    ) -> Result<SelectorResolution>;
}
