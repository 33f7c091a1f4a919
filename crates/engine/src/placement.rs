//! Placement rules for new buildings.
//!
//! `validate` is the single source of truth: construction and "can I build here"
//! previews both go through it, so they never disagree.

use crate::{BuildingRegistry, Catalog, GameError};
use skyhaven_protocol::{Building, BuildingType, GridPos, Size};

/// Axis-aligned cell rectangle anchored at `position`, extending +x/+y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub position: GridPos,
    pub size: Size,
}

impl Footprint {
    pub fn new(position: GridPos, size: Size) -> Self {
        Self { position, size }
    }

    pub fn of(building: &Building) -> Self {
        Self::new(building.position, building.size)
    }

    // Saturates so positions near i64::MAX still compare sensibly.
    fn right(&self) -> i64 {
        self.position.x.saturating_add(self.size.width)
    }

    fn bottom(&self) -> i64 {
        self.position.y.saturating_add(self.size.height)
    }

    /// Bounds test written as subtractions; `position` may be any client-supplied value.
    pub fn fits_within(&self, grid: Size) -> bool {
        self.position.x >= 0
            && self.position.y >= 0
            && self.size.width <= grid.width
            && self.size.height <= grid.height
            && self.position.x <= grid.width - self.size.width
            && self.position.y <= grid.height - self.size.height
    }

    /// Open-interval intersection on both axes; touching edges do not overlap.
    pub fn overlaps(&self, other: &Footprint) -> bool {
        self.position.x < other.right()
            && other.position.x < self.right()
            && self.position.y < other.bottom()
            && other.position.y < self.bottom()
    }

    /// True when the two rectangles share a stretch of grid edge. Corner contact
    /// alone does not count.
    pub fn shares_edge(&self, other: &Footprint) -> bool {
        let spans_x = self.position.x < other.right() && other.position.x < self.right();
        let spans_y = self.position.y < other.bottom() && other.position.y < self.bottom();
        let touch_x = self.right() == other.position.x || other.right() == self.position.x;
        let touch_y = self.bottom() == other.position.y || other.bottom() == self.position.y;
        (touch_x && spans_y) || (touch_y && spans_x)
    }
}

/// Where the first building on an island must go.
pub fn origin_cell(grid: Size) -> GridPos {
    GridPos::new(grid.width / 2, grid.height / 2)
}

/// Ordered legality check: catalog, bounds, overlap, adjacency. The first failure wins.
pub fn validate(
    catalog: &Catalog,
    grid: Size,
    registry: &BuildingRegistry,
    kind: BuildingType,
    position: GridPos,
) -> Result<(), GameError> {
    let info = catalog.lookup(kind)?;
    let proposed = Footprint::new(position, info.size);

    if !proposed.fits_within(grid) {
        return Err(GameError::OutOfBounds {
            position,
            size: info.size,
            grid,
        });
    }

    if let Some(hit) = registry
        .iter()
        .find(|b| proposed.overlaps(&Footprint::of(b)))
    {
        return Err(GameError::Overlaps {
            position,
            building_id: hit.id.clone(),
        });
    }

    let connected = if registry.is_empty() {
        position == origin_cell(grid)
    } else {
        registry
            .iter()
            .any(|b| proposed.shares_edge(&Footprint::of(b)))
    };
    if !connected {
        return Err(GameError::NotAdjacent { position });
    }

    Ok(())
}

/// Every anchor cell at which `kind` could be placed right now, row by row.
pub fn candidate_positions(
    catalog: &Catalog,
    grid: Size,
    registry: &BuildingRegistry,
    kind: BuildingType,
) -> Result<Vec<GridPos>, GameError> {
    catalog.lookup(kind)?;
    let mut out = Vec::new();
    for y in 0..grid.height {
        for x in 0..grid.width {
            let pos = GridPos::new(x, y);
            if validate(catalog, grid, registry, kind, pos).is_ok() {
                out.push(pos);
            }
        }
    }
    Ok(out)
}
