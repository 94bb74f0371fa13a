//! Match-region resolution
//!
//! Turns the regions declared on a check (literal rectangles, opaque tokens,
//! selector references and floating offset-regions) into the final per-category
//! region lists sent to the render service.
//!
//! Selector references are resolved by an external collaborator into a flat
//! table with one slot per selector, aligned to the selector order produced by
//! [`selectors`]. Each slot may hold any number of values (zero when the
//! selector matched nothing).

use serde::Serialize;
use serde_json::Value;
use snapgrid_common::{FloatingOffsets, ImageCropOffset, Rectangle};
use tracing::debug;

use crate::driver::SelectorRef;

/// Region categories, in the order the render service expects them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionCategory {
    Ignore,
    Layout,
    Strict,
    Content,
    Accessibility,
    Floating,
}

impl RegionCategory {
    pub const COUNT: usize = 6;

    pub const ALL: [RegionCategory; Self::COUNT] = [
        RegionCategory::Ignore,
        RegionCategory::Layout,
        RegionCategory::Strict,
        RegionCategory::Content,
        RegionCategory::Accessibility,
        RegionCategory::Floating,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Where an offset-region sits on the page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegionTarget {
    Rect(Rectangle),
    Selector(SelectorRef),
    Token(Value),
}

/// Region with tolerated movement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetRegion {
    pub target: RegionTarget,
    #[serde(flatten)]
    pub offsets: FloatingOffsets,
}

/// A region as declared by the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegionSpec {
    Rect(Rectangle),
    Selector(SelectorRef),
    Offset(OffsetRegion),
    Token(Value),
}

impl RegionSpec {
    pub fn selector(selector: impl Into<String>) -> Self {
        RegionSpec::Selector(SelectorRef::new(selector))
    }

    pub fn offset(target: RegionTarget, offsets: FloatingOffsets) -> Self {
        RegionSpec::Offset(OffsetRegion { target, offsets })
    }

    /// Selector that needs resolving, if any
    pub fn selector_ref(&self) -> Option<&SelectorRef> {
        match self {
            RegionSpec::Selector(selector) => Some(selector),
            RegionSpec::Offset(OffsetRegion {
                target: RegionTarget::Selector(selector),
                ..
            }) => Some(selector),
            _ => None,
        }
    }
}

/// What the selector collaborator found for one match of a selector
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    /// Element geometry in full-page coordinates
    Geometry(Rectangle),
    /// Serialized form only; copied through untouched
    Serialized(Value),
}

/// Region area inside a resolved floating region
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegionArea {
    Rect(Rectangle),
    Serialized(Value),
}

impl From<&ResolvedValue> for RegionArea {
    fn from(value: &ResolvedValue) -> Self {
        match value {
            ResolvedValue::Geometry(rect) => RegionArea::Rect(*rect),
            ResolvedValue::Serialized(value) => RegionArea::Serialized(value.clone()),
        }
    }
}

/// Floating region with its offsets preserved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatingRegion {
    pub region: RegionArea,
    #[serde(flatten)]
    pub offsets: FloatingOffsets,
}

/// A region as sent to the render service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MatchRegion {
    Rect(Rectangle),
    Serialized(Value),
    Floating(FloatingRegion),
}

/// One optional region list per [`RegionCategory`]
///
/// An absent slot means nothing was declared for that category and is kept
/// distinct from a declared-but-empty list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CategorizedRegions<T> {
    slots: [Option<Vec<T>>; RegionCategory::COUNT],
}

impl<T> Default for CategorizedRegions<T> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl<T> CategorizedRegions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: RegionCategory) -> Option<&[T]> {
        self.slots[category.index()].as_deref()
    }

    pub fn set(&mut self, category: RegionCategory, regions: Vec<T>) {
        self.slots[category.index()] = Some(regions);
    }

    pub fn push(&mut self, category: RegionCategory, region: T) {
        self.slots[category.index()]
            .get_or_insert_with(Vec::new)
            .push(region);
    }

    /// Slots in category order
    pub fn iter(&self) -> impl Iterator<Item = (RegionCategory, Option<&[T]>)> + '_ {
        RegionCategory::ALL
            .into_iter()
            .map(move |category| (category, self.get(category)))
    }

    /// True when no category has a declared slot
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

/// Selectors needing resolution, flattened in category then declaration order
pub fn selectors(regions: &CategorizedRegions<RegionSpec>) -> Vec<&SelectorRef> {
    regions
        .iter()
        .filter_map(|(_, specs)| specs)
        .flatten()
        .filter_map(RegionSpec::selector_ref)
        .collect()
}

/// Resolve declared regions into final match regions.
///
/// Literal entries are emitted verbatim in place; each selector entry is
/// replaced in place by every value of its resolution slot. With a crop
/// offset, geometric selector results are shifted into the cropped image and
/// pinned at 0. Offset-regions keep their offsets and are never shifted.
pub fn resolve(
    regions: &CategorizedRegions<RegionSpec>,
    resolutions: &[Vec<ResolvedValue>],
    crop_offset: Option<ImageCropOffset>,
) -> CategorizedRegions<MatchRegion> {
    let mut slots = resolutions.iter();
    let mut resolved = CategorizedRegions::new();

    for (category, specs) in regions.iter() {
        let Some(specs) = specs else { continue };

        let mut out = Vec::with_capacity(specs.len());
        for spec in specs {
            match spec {
                RegionSpec::Rect(rect) => out.push(MatchRegion::Rect(*rect)),
                RegionSpec::Token(value) => out.push(MatchRegion::Serialized(value.clone())),
                RegionSpec::Selector(selector) => {
                    let values = next_slot(&mut slots, category, selector);
                    out.extend(values.iter().map(|value| plain_region(value, crop_offset)));
                }
                RegionSpec::Offset(offset_region) => {
                    let offsets = offset_region.offsets;
                    match &offset_region.target {
                        RegionTarget::Rect(rect) => out.push(MatchRegion::Floating(FloatingRegion {
                            region: RegionArea::Rect(*rect),
                            offsets,
                        })),
                        RegionTarget::Token(value) => {
                            out.push(MatchRegion::Floating(FloatingRegion {
                                region: RegionArea::Serialized(value.clone()),
                                offsets,
                            }))
                        }
                        RegionTarget::Selector(selector) => {
                            let values = next_slot(&mut slots, category, selector);
                            out.extend(values.iter().map(|value| {
                                MatchRegion::Floating(FloatingRegion {
                                    region: value.into(),
                                    offsets,
                                })
                            }));
                        }
                    }
                }
            }
        }
        resolved.set(category, out);
    }

    resolved
}

fn next_slot<'a>(
    slots: &mut std::slice::Iter<'a, Vec<ResolvedValue>>,
    category: RegionCategory,
    selector: &SelectorRef,
) -> &'a [ResolvedValue] {
    match slots.next() {
        Some(values) => values,
        None => {
            debug!(
                "No resolution for {:?} selector '{}', skipping",
                category, selector
            );
            &[]
        }
    }
}

fn plain_region(value: &ResolvedValue, crop_offset: Option<ImageCropOffset>) -> MatchRegion {
    match (value, crop_offset) {
        (ResolvedValue::Geometry(rect), Some(offset)) => {
            MatchRegion::Rect(rect.with_crop_offset(offset))
        }
        (ResolvedValue::Geometry(rect), None) => MatchRegion::Rect(*rect),
        (ResolvedValue::Serialized(value), _) => MatchRegion::Serialized(value.clone()),
    }
}
