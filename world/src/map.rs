//! Layered terrain map owned by the world.

use std::collections::BTreeMap;

use terrain_conditions_core::{
    CellCoord, CustomMovementLayer, LayerIndex, RejectionReason, TerrainIndex, TerrainMap,
    TerrainTypeName, TileSet,
};

/// Ground grid, tile set, and custom movement layers of the world.
#[derive(Clone, Debug)]
pub struct GameMap {
    grid: TerrainGrid,
    tile_set: TileSet,
    layers: BTreeMap<LayerIndex, OverlayLayer>,
}

impl GameMap {
    pub(crate) fn empty() -> Self {
        Self {
            grid: TerrainGrid::empty(),
            tile_set: TileSet::default(),
            layers: BTreeMap::new(),
        }
    }

    pub(crate) fn filled(
        columns: u32,
        rows: u32,
        tile_set: TileSet,
        fill: TerrainIndex,
    ) -> Result<Self, RejectionReason> {
        if !tile_set.contains_index(fill) {
            return Err(RejectionReason::UnknownTerrain(fill));
        }

        Ok(Self {
            grid: TerrainGrid::new(columns, rows, fill)?,
            tile_set,
            layers: BTreeMap::new(),
        })
    }

    /// Dimensions of the ground grid as `(columns, rows)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.grid.columns, self.grid.rows)
    }

    /// Layers registered above the ground, in ascending index order.
    pub fn layer_indices(&self) -> impl Iterator<Item = LayerIndex> + '_ {
        self.layers.keys().copied()
    }

    pub(crate) fn set_ground(
        &mut self,
        cell: CellCoord,
        terrain: TerrainIndex,
    ) -> Result<(), RejectionReason> {
        self.check_terrain(terrain)?;
        self.grid.set(cell, terrain)
    }

    pub(crate) fn register_layer(
        &mut self,
        layer: LayerIndex,
        default_terrain: TerrainIndex,
    ) -> Result<(), RejectionReason> {
        if layer.is_ground() {
            return Err(RejectionReason::ReservedLayer);
        }
        if self.layers.contains_key(&layer) {
            return Err(RejectionReason::DuplicateLayer(layer));
        }
        self.check_terrain(default_terrain)?;

        let _ = self.layers.insert(layer, OverlayLayer::new(default_terrain));
        Ok(())
    }

    pub(crate) fn set_layer_terrain(
        &mut self,
        layer: LayerIndex,
        cell: CellCoord,
        terrain: TerrainIndex,
    ) -> Result<(), RejectionReason> {
        self.check_terrain(terrain)?;
        if !self.grid.contains(cell) {
            return Err(RejectionReason::CellOutOfBounds(cell));
        }
        let overlay = self
            .layers
            .get_mut(&layer)
            .ok_or(RejectionReason::UnknownLayer(layer))?;
        overlay.set(cell, terrain);
        Ok(())
    }

    fn check_terrain(&self, terrain: TerrainIndex) -> Result<(), RejectionReason> {
        if self.tile_set.contains_index(terrain) {
            Ok(())
        } else {
            Err(RejectionReason::UnknownTerrain(terrain))
        }
    }
}

impl TerrainMap for GameMap {
    fn contains(&self, cell: CellCoord) -> bool {
        self.grid.contains(cell)
    }

    fn terrain_type_at(&self, cell: CellCoord) -> Option<&TerrainTypeName> {
        let index = self.grid.get(cell)?;
        self.tile_set.terrain_type_name(index)
    }

    fn custom_layer(&self, layer: LayerIndex) -> Option<&dyn CustomMovementLayer> {
        self.layers
            .get(&layer)
            .map(|overlay| overlay as &dyn CustomMovementLayer)
    }

    fn tile_set(&self) -> &TileSet {
        &self.tile_set
    }
}

/// Upper bound on the number of ground cells a map may hold.
const MAX_GRID_CELLS: usize = 1 << 24;

#[derive(Clone, Debug)]
struct TerrainGrid {
    columns: u32,
    rows: u32,
    cells: Vec<TerrainIndex>,
}

impl TerrainGrid {
    fn empty() -> Self {
        Self {
            columns: 0,
            rows: 0,
            cells: Vec::new(),
        }
    }

    fn new(columns: u32, rows: u32, fill: TerrainIndex) -> Result<Self, RejectionReason> {
        let capacity = usize::try_from(columns)
            .ok()
            .zip(usize::try_from(rows).ok())
            .and_then(|(columns, rows)| columns.checked_mul(rows))
            .filter(|capacity| *capacity <= MAX_GRID_CELLS)
            .ok_or(RejectionReason::MapTooLarge { columns, rows })?;
        Ok(Self {
            columns,
            rows,
            cells: vec![fill; capacity],
        })
    }

    fn contains(&self, cell: CellCoord) -> bool {
        self.index(cell).is_some()
    }

    fn get(&self, cell: CellCoord) -> Option<TerrainIndex> {
        self.index(cell)
            .and_then(|index| self.cells.get(index).copied())
    }

    fn set(&mut self, cell: CellCoord, terrain: TerrainIndex) -> Result<(), RejectionReason> {
        let slot = self
            .index(cell)
            .and_then(|index| self.cells.get_mut(index))
            .ok_or(RejectionReason::CellOutOfBounds(cell))?;
        *slot = terrain;
        Ok(())
    }

    fn index(&self, cell: CellCoord) -> Option<usize> {
        let column = u32::try_from(cell.column()).ok()?;
        let row = u32::try_from(cell.row()).ok()?;
        if column < self.columns && row < self.rows {
            let row = usize::try_from(row).ok()?;
            let column = usize::try_from(column).ok()?;
            let width = usize::try_from(self.columns).ok()?;
            Some(row * width + column)
        } else {
            None
        }
    }
}

/// Sparse overlay such as a bridge network. Unlisted cells report the
/// layer's default terrain.
#[derive(Clone, Debug)]
struct OverlayLayer {
    default_terrain: TerrainIndex,
    cells: BTreeMap<CellCoord, TerrainIndex>,
}

impl OverlayLayer {
    fn new(default_terrain: TerrainIndex) -> Self {
        Self {
            default_terrain,
            cells: BTreeMap::new(),
        }
    }

    fn set(&mut self, cell: CellCoord, terrain: TerrainIndex) {
        let _ = self.cells.insert(cell, terrain);
    }
}

impl CustomMovementLayer for OverlayLayer {
    fn terrain_index_at(&self, cell: CellCoord) -> TerrainIndex {
        self.cells
            .get(&cell)
            .copied()
            .unwrap_or(self.default_terrain)
    }
}
