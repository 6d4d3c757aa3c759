//! Decode parameter resolution.
//!
//! The caller's tile, reduction and area requests live in host state. They
//! are read once the main header is parsed, checked against what the
//! codestream can offer, and turned into a single [`Resolution`]. The
//! codestream limits are published back so the caller can size its next
//! request.

use crate::engine::CapacityInfo;
use crate::error::{DecodeError, HostError, Result};
use crate::host::{Field, HostAccess};

/// Region of interest on the reference grid, `x1`/`y1` exclusive.
/// All zeros selects the whole image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Region {
    pub const WHOLE: Region = Region {
        x0: 0,
        y0: 0,
        x1: 0,
        y1: 0,
    };

    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn is_whole_image(&self) -> bool {
        *self == Region::WHOLE
    }
}

/// What the engine is asked to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Tile(u32),
    Area(Region),
}

/// Caller request, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeRequest {
    pub tile_index: Option<u32>,
    pub reduction_factor: Option<u32>,
    pub region: Option<Region>,
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub selection: Selection,
    pub reduction: Option<u32>,
    /// Adjustments made to the request, worth telling the caller about.
    pub warnings: Vec<String>,
}

impl DecodeRequest {
    pub fn tile(index: u32) -> Self {
        Self {
            tile_index: Some(index),
            ..Self::default()
        }
    }

    pub fn area(region: Region) -> Self {
        Self {
            region: Some(region),
            ..Self::default()
        }
    }

    pub fn with_reduction(mut self, factor: u32) -> Self {
        self.reduction_factor = Some(factor);
        self
    }

    /// Checks the request against the codestream limits.
    ///
    /// A tile index wins over a region. Out-of-range tiles are an error;
    /// an oversized reduction is clamped to the coarsest available level.
    pub fn resolve(&self, capacity: &CapacityInfo) -> Result<Resolution> {
        let mut warnings = Vec::new();

        let reduction = match self.reduction_factor {
            Some(0) | None => None,
            Some(r) if capacity.max_resolution_levels == 0 => {
                warnings.push(format!(
                    "reduction {r} ignored: codestream reports no resolution levels"
                ));
                None
            }
            Some(r) if r >= capacity.max_resolution_levels => {
                let clamped = capacity.max_resolution_levels - 1;
                warnings.push(format!(
                    "reduction {r} exceeds the {} available resolution levels, using {clamped}",
                    capacity.max_resolution_levels
                ));
                Some(clamped).filter(|&c| c > 0)
            }
            Some(r) => Some(r),
        };

        let selection = match self.tile_index {
            Some(tile) => {
                if u64::from(tile) >= capacity.tile_count() {
                    return Err(DecodeError::Decode(format!(
                        "tile {tile} out of range, codestream has {} tiles",
                        capacity.tile_count()
                    )));
                }
                Selection::Tile(tile)
            }
            None => Selection::Area(self.region.unwrap_or(Region::WHOLE)),
        };

        Ok(Resolution {
            selection,
            reduction,
            warnings,
        })
    }
}

fn saturate(v: u64) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

/// Reads the request from host state and publishes the codestream limits.
///
/// `tileIn` and `reductionIn` are only trusted when the caller flagged both
/// as changed. Limits are written back unless the caller already holds valid
/// ones for an explicit request. The area is only read when no tile is
/// selected.
pub fn read_request<H: HostAccess + ?Sized>(
    host: &mut H,
    capacity: &CapacityInfo,
) -> std::result::Result<DecodeRequest, HostError> {
    let mut request = DecodeRequest::default();

    let user_changed_tile = host.get(Field::UserChangedTile)? != 0;
    let user_changed_reduction = host.get(Field::UserChangedReduction)? != 0;
    let explicit = user_changed_tile && user_changed_reduction;
    if explicit {
        let tile = host.get(Field::TileIn)?;
        let reduction = host.get(Field::ReductionIn)?;
        request.tile_index = u32::try_from(tile).ok();
        request.reduction_factor = u32::try_from(reduction).ok();
    }

    let max_tiles = host.get(Field::MaxTiles)?;
    let max_reduction = host.get(Field::MaxReduction)?;
    if !explicit || max_tiles <= 0 || max_reduction <= 0 {
        host.set(Field::MaxTiles, saturate(capacity.tile_count()))?;
        host.set(
            Field::MaxReduction,
            saturate(u64::from(capacity.max_resolution_levels)),
        )?;
        host.set(Field::UserChangedTile, 1)?;
        host.set(Field::UserChangedReduction, 1)?;
    }

    if request.tile_index.is_none() && host.get(Field::UserChangedArea)? != 0 {
        request.region = Some(Region {
            x0: host.get(Field::AreaX0)?,
            y0: host.get(Field::AreaY0)?,
            x1: host.get(Field::AreaX1)?,
            y1: host.get(Field::AreaY1)?,
        });
    }

    tracing::debug!(
        tile = ?request.tile_index,
        reduction = ?request.reduction_factor,
        region = ?request.region,
        "decode request read from host"
    );
    Ok(request)
}
