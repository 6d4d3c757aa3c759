//! Host-side state shared with the decoder.
//!
//! The decoder never touches caller state directly. It goes through
//! [`HostAccess`], one call per field, and every call may fail: a host that
//! raised an error during the call reports it through the returned `Result`,
//! and the session aborts before doing anything else.

use std::fmt;

use crate::convert::PixelFormat;
use crate::error::HostError;

/// The fixed set of caller fields the decoder reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    UserChangedTile,
    UserChangedReduction,
    TileIn,
    ReductionIn,
    MaxTiles,
    MaxReduction,
    UserChangedArea,
    AreaX0,
    AreaY0,
    AreaX1,
    AreaY1,
    Width,
    Height,
    BitsPerSample,
}

impl Field {
    /// Name of the field as the host knows it.
    pub fn name(self) -> &'static str {
        match self {
            Field::UserChangedTile => "userChangedTile",
            Field::UserChangedReduction => "userChangedReduction",
            Field::TileIn => "tileIn",
            Field::ReductionIn => "reductionIn",
            Field::MaxTiles => "maxTiles",
            Field::MaxReduction => "maxReduction",
            Field::UserChangedArea => "userChangedArea",
            Field::AreaX0 => "areaX0",
            Field::AreaY0 => "areaY0",
            Field::AreaX1 => "areaX1",
            Field::AreaY1 => "areaY1",
            Field::Width => "width",
            Field::Height => "height",
            Field::BitsPerSample => "bitsPerSample",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of a diagnostic pushed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// Boundary between the decoder and the caller that owns the decode state.
pub trait HostAccess {
    fn get(&mut self, field: Field) -> Result<i32, HostError>;

    fn set(&mut self, field: Field, value: i32) -> Result<(), HostError>;

    /// Called once the output layout is known and before it is filled.
    fn prepare_output(
        &mut self,
        _format: PixelFormat,
        _width: u32,
        _height: u32,
    ) -> Result<(), HostError> {
        Ok(())
    }

    /// Fire-and-forget diagnostic sink.
    fn notify(&mut self, _level: Level, _message: &str) {}
}

/// Plain in-memory decode state.
///
/// Mirrors the record a caller keeps between decodes: the requested tile,
/// reduction and area, plus the maxima and dimensions the decoder publishes
/// back after each successful call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub user_changed_tile: i32,
    pub user_changed_reduction: i32,
    pub tile_in: i32,
    pub reduction_in: i32,
    pub max_tiles: i32,
    pub max_reduction: i32,
    pub user_changed_area: i32,
    pub area_x0: i32,
    pub area_y0: i32,
    pub area_x1: i32,
    pub area_y1: i32,
    pub width: i32,
    pub height: i32,
    pub bits_per_sample: i32,
    /// Diagnostics received through [`HostAccess::notify`]. They accumulate
    /// across decodes until drained with [`HostState::take_messages`] or
    /// cleared by [`HostState::reset`].
    pub messages: Vec<(Level, String)>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            user_changed_tile: 0,
            user_changed_reduction: 0,
            tile_in: -1,
            reduction_in: 0,
            max_tiles: 0,
            max_reduction: 0,
            user_changed_area: 0,
            area_x0: 0,
            area_y0: 0,
            area_x1: 0,
            area_y1: 0,
            width: 0,
            height: 0,
            bits_per_sample: 0,
            messages: Vec::new(),
        }
    }
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Drains the collected diagnostics, keeping the request and limits.
    pub fn take_messages(&mut self) -> Vec<(Level, String)> {
        std::mem::take(&mut self.messages)
    }

    /// Requests a single tile. Takes precedence over any area.
    pub fn set_tile(&mut self, tile: i32) {
        self.tile_in = tile;
        self.user_changed_tile = 1;
    }

    pub fn set_reduction(&mut self, reduction: i32) {
        self.reduction_in = reduction;
        self.user_changed_reduction = 1;
    }

    /// Requests a region decode. `0,0,0,0` decodes the whole image.
    pub fn set_area(&mut self, x0: i32, y0: i32, x1: i32, y1: i32) {
        self.area_x0 = x0;
        self.area_y0 = y0;
        self.area_x1 = x1;
        self.area_y1 = y1;
        self.user_changed_area = 1;
    }

    fn slot(&mut self, field: Field) -> &mut i32 {
        match field {
            Field::UserChangedTile => &mut self.user_changed_tile,
            Field::UserChangedReduction => &mut self.user_changed_reduction,
            Field::TileIn => &mut self.tile_in,
            Field::ReductionIn => &mut self.reduction_in,
            Field::MaxTiles => &mut self.max_tiles,
            Field::MaxReduction => &mut self.max_reduction,
            Field::UserChangedArea => &mut self.user_changed_area,
            Field::AreaX0 => &mut self.area_x0,
            Field::AreaY0 => &mut self.area_y0,
            Field::AreaX1 => &mut self.area_x1,
            Field::AreaY1 => &mut self.area_y1,
            Field::Width => &mut self.width,
            Field::Height => &mut self.height,
            Field::BitsPerSample => &mut self.bits_per_sample,
        }
    }
}

impl HostAccess for HostState {
    fn get(&mut self, field: Field) -> Result<i32, HostError> {
        Ok(*self.slot(field))
    }

    fn set(&mut self, field: Field, value: i32) -> Result<(), HostError> {
        *self.slot(field) = value;
        Ok(())
    }

    fn notify(&mut self, level: Level, message: &str) {
        self.messages.push((level, message.to_owned()));
    }
}
