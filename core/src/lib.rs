#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the terrain conditions engine.
//!
//! This crate defines the message surface that connects adapters, the
//! authoritative world, and pure systems. Adapters submit [`Command`] values
//! describing desired mutations, the world executes those commands via its
//! `apply` entry point, and then broadcasts [`Event`] values for systems to
//! react to deterministically. Systems read the map through [`TerrainMap`]
//! and assert entity conditions through a [`ConditionRegistry`] handle that
//! is injected once when they are wired to an entity.

use std::{cell::RefCell, fmt, rc::Rc};

use serde::{Deserialize, Serialize};

/// Commands that express all permissible world mutations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Replaces the ground grid and tile set with a uniformly filled map.
    ConfigureMap {
        /// Number of cell columns laid out in the ground grid.
        columns: u32,
        /// Number of cell rows laid out in the ground grid.
        rows: u32,
        /// Ordered terrain definitions addressed by [`TerrainIndex`].
        tile_set: TileSet,
        /// Terrain assigned to every ground cell.
        fill: TerrainIndex,
    },
    /// Registers a custom movement layer stacked above the ground grid.
    RegisterLayer {
        /// Index identifying the layer. Must not be [`LayerIndex::GROUND`].
        layer: LayerIndex,
        /// Terrain reported for cells without an explicit layer entry.
        default_terrain: TerrainIndex,
    },
    /// Creates a new entity at the provided location.
    SpawnEntity {
        /// Kind of entity, used to look up the rules that apply to it.
        kind: EntityKind,
        /// Location the entity occupies after spawning. May be off-map.
        location: Location,
        /// Whether the entity participates in the condition ledger.
        tracks_conditions: bool,
    },
    /// Relocates an existing entity.
    MoveEntity {
        /// Identifier of the entity to relocate.
        entity: EntityId,
        /// Destination location. May be off-map.
        location: Location,
    },
    /// Removes an entity from the world.
    DespawnEntity {
        /// Identifier of the entity to remove.
        entity: EntityId,
    },
    /// Rewrites the terrain of a single ground cell.
    SetGroundTerrain {
        /// Cell whose terrain is replaced.
        cell: CellCoord,
        /// Terrain assigned to the cell.
        terrain: TerrainIndex,
    },
    /// Rewrites the terrain of a single cell on a custom movement layer.
    SetLayerTerrain {
        /// Layer containing the cell.
        layer: LayerIndex,
        /// Cell whose terrain is replaced.
        cell: CellCoord,
        /// Terrain assigned to the cell.
        terrain: TerrainIndex,
    },
    /// Advances the simulation by a single step.
    Tick,
}

/// Events broadcast by the world after processing commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Confirms that the ground grid was replaced.
    MapConfigured {
        /// Number of cell columns in the new grid.
        columns: u32,
        /// Number of cell rows in the new grid.
        rows: u32,
    },
    /// Confirms that a custom movement layer was registered.
    LayerRegistered {
        /// Index of the registered layer.
        layer: LayerIndex,
    },
    /// Confirms that an entity was created.
    EntitySpawned {
        /// Identifier allocated to the entity by the world.
        entity: EntityId,
        /// Kind of the spawned entity.
        kind: EntityKind,
        /// Location the entity occupies after spawning.
        location: Location,
    },
    /// Confirms that an entity changed location.
    EntityMoved {
        /// Identifier of the relocated entity.
        entity: EntityId,
        /// Location occupied before the move.
        from: Location,
        /// Location occupied after the move.
        to: Location,
    },
    /// Confirms that an entity was removed.
    EntityDespawned {
        /// Identifier of the removed entity.
        entity: EntityId,
    },
    /// Reports that the terrain of a cell was rewritten.
    TerrainChanged {
        /// Layer containing the rewritten cell.
        layer: LayerIndex,
        /// Cell that changed.
        cell: CellCoord,
        /// Terrain now assigned to the cell.
        terrain: TerrainIndex,
    },
    /// Indicates that the simulation advanced by one step.
    TimeAdvanced {
        /// Zero-based index of the step that just started.
        tick: u64,
    },
    /// Reports that a command could not be applied.
    CommandRejected {
        /// Specific reason the command failed.
        reason: RejectionReason,
    },
}

/// Reasons the world may refuse a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    /// No entity with the provided identifier exists.
    UnknownEntity(EntityId),
    /// No custom movement layer is registered under the provided index.
    UnknownLayer(LayerIndex),
    /// The ground layer index cannot be registered as a custom layer.
    ReservedLayer,
    /// A custom movement layer is already registered under the index.
    DuplicateLayer(LayerIndex),
    /// The terrain index has no entry in the active tile set.
    UnknownTerrain(TerrainIndex),
    /// The cell lies outside the configured map.
    CellOutOfBounds(CellCoord),
    /// The requested ground grid holds more cells than the world supports.
    MapTooLarge {
        /// Requested number of columns.
        columns: u32,
        /// Requested number of rows.
        rows: u32,
    },
}

/// Unique identifier assigned to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u32);

impl EntityId {
    /// Creates a new entity identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of an entity type. Rules are configured per kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKind(String);

impl EntityKind {
    /// Creates a new entity kind from the provided name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Location of a single grid cell expressed as column and row coordinates.
///
/// Coordinates are signed so that positions beyond the top-left map edge can
/// be represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    column: i32,
    row: i32,
}

impl CellCoord {
    /// Creates a new grid cell coordinate.
    #[must_use]
    pub const fn new(column: i32, row: i32) -> Self {
        Self { column, row }
    }

    /// Column index of the cell.
    #[must_use]
    pub const fn column(&self) -> i32 {
        self.column
    }

    /// Row index of the cell.
    #[must_use]
    pub const fn row(&self) -> i32 {
        self.row
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.column, self.row)
    }
}

/// Identifies the movement layer an entity stands on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerIndex(u8);

impl LayerIndex {
    /// The base ground layer.
    pub const GROUND: Self = Self(0);

    /// Creates a new layer index.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the index.
    #[must_use]
    pub const fn get(&self) -> u8 {
        self.0
    }

    /// Reports whether the index refers to the base ground layer.
    #[must_use]
    pub const fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

impl Default for LayerIndex {
    fn default() -> Self {
        Self::GROUND
    }
}

/// Cell plus movement layer describing where an entity stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    cell: CellCoord,
    layer: LayerIndex,
}

impl Location {
    /// Creates a location on the provided layer.
    #[must_use]
    pub const fn new(cell: CellCoord, layer: LayerIndex) -> Self {
        Self { cell, layer }
    }

    /// Creates a location on the ground layer.
    #[must_use]
    pub const fn on_ground(cell: CellCoord) -> Self {
        Self {
            cell,
            layer: LayerIndex::GROUND,
        }
    }

    /// Cell component of the location.
    #[must_use]
    pub const fn cell(&self) -> CellCoord {
        self.cell
    }

    /// Layer component of the location.
    #[must_use]
    pub const fn layer(&self) -> LayerIndex {
        self.layer
    }
}

/// Index into a [`TileSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerrainIndex(u8);

impl TerrainIndex {
    /// Creates a new terrain index.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the index.
    #[must_use]
    pub const fn get(&self) -> u8 {
        self.0
    }
}

/// Classification of the terrain at a cell, such as `Water` or `Clear`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerrainTypeName(String);

impl TerrainTypeName {
    /// Creates a new terrain type name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of the terrain type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TerrainTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a boolean condition tracked for an entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionName(String);

impl ConditionName {
    /// Creates a new condition name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of the condition.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reports whether the name is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConditionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle returned by a [`ConditionRegistry`] when granting a condition.
///
/// The handle is required to revoke the grant it represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConditionToken(u32);

impl ConditionToken {
    /// Creates a token from its numeric representation.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the token.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Ordered terrain definitions. A terrain's [`TerrainIndex`] is its position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileSet {
    terrain_types: Vec<TerrainTypeName>,
}

impl TileSet {
    /// Creates a tile set from ordered terrain names.
    #[must_use]
    pub fn new(terrain_types: Vec<TerrainTypeName>) -> Self {
        Self { terrain_types }
    }

    /// Resolves a terrain index to its terrain type name.
    #[must_use]
    pub fn terrain_type_name(&self, index: TerrainIndex) -> Option<&TerrainTypeName> {
        self.terrain_types.get(usize::from(index.get()))
    }

    /// Finds the index of the first terrain type with the provided name.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<TerrainIndex> {
        let position = self
            .terrain_types
            .iter()
            .position(|terrain| terrain.as_str() == name)?;
        u8::try_from(position).ok().map(TerrainIndex::new)
    }

    /// Reports whether the index has an entry in the tile set.
    #[must_use]
    pub fn contains_index(&self, index: TerrainIndex) -> bool {
        usize::from(index.get()) < self.terrain_types.len()
    }

    /// Number of terrain types defined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terrain_types.len()
    }

    /// Reports whether no terrain types are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terrain_types.is_empty()
    }
}

/// Overlay grid stacked above the ground, such as a bridge or tunnel network.
pub trait CustomMovementLayer {
    /// Terrain index the layer reports for the provided cell.
    fn terrain_index_at(&self, cell: CellCoord) -> TerrainIndex;
}

/// Read-only terrain queries consumed by systems.
pub trait TerrainMap {
    /// Reports whether the cell lies within the map's valid bounds.
    fn contains(&self, cell: CellCoord) -> bool;

    /// Terrain type of the ground layer at the cell.
    fn terrain_type_at(&self, cell: CellCoord) -> Option<&TerrainTypeName>;

    /// Handler registered for a custom movement layer, if any.
    fn custom_layer(&self, layer: LayerIndex) -> Option<&dyn CustomMovementLayer>;

    /// Tile set used to resolve custom layer terrain indices.
    fn tile_set(&self) -> &TileSet;
}

/// Ledger of named boolean conditions keyed by grant tokens.
///
/// Implementations must process calls for an entity in the order they are
/// issued and must return tokens that can be revoked exactly once.
pub trait ConditionRegistry {
    /// Asserts the condition for the entity and returns the grant's handle.
    fn grant(&mut self, entity: EntityId, condition: &ConditionName) -> ConditionToken;

    /// Withdraws a grant. Returns `None` once the grant no longer exists.
    fn revoke(&mut self, entity: EntityId, token: ConditionToken) -> Option<ConditionToken>;
}

impl<R> ConditionRegistry for Rc<RefCell<R>>
where
    R: ConditionRegistry + ?Sized,
{
    fn grant(&mut self, entity: EntityId, condition: &ConditionName) -> ConditionToken {
        self.borrow_mut().grant(entity, condition)
    }

    fn revoke(&mut self, entity: EntityId, token: ConditionToken) -> Option<ConditionToken> {
        self.borrow_mut().revoke(entity, token)
    }
}

/// Notification journaled by a condition ledger when a condition toggles.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionChange {
    /// The condition became active for the entity.
    Enabled {
        /// Entity whose condition toggled.
        entity: EntityId,
        /// Condition that toggled.
        condition: ConditionName,
    },
    /// The condition stopped being active for the entity.
    Disabled {
        /// Entity whose condition toggled.
        entity: EntityId,
        /// Condition that toggled.
        condition: ConditionName,
    },
}

impl ConditionChange {
    /// Entity whose condition toggled.
    #[must_use]
    pub fn entity(&self) -> EntityId {
        match self {
            Self::Enabled { entity, .. } | Self::Disabled { entity, .. } => *entity,
        }
    }

    /// Condition that toggled.
    #[must_use]
    pub fn condition(&self) -> &ConditionName {
        match self {
            Self::Enabled { condition, .. } | Self::Disabled { condition, .. } => condition,
        }
    }

    /// Reports whether the condition became active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

/// Immutable representation of a single entity's state used for queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitySnapshot {
    /// Unique identifier assigned to the entity.
    pub id: EntityId,
    /// Kind of the entity.
    pub kind: EntityKind,
    /// Location currently occupied by the entity.
    pub location: Location,
}

/// Read-only snapshot describing all entities in the world.
#[derive(Clone, Debug, Default)]
pub struct EntityView {
    snapshots: Vec<EntitySnapshot>,
}

impl EntityView {
    /// Creates a new entity view from the provided snapshots.
    #[must_use]
    pub fn from_snapshots(mut snapshots: Vec<EntitySnapshot>) -> Self {
        snapshots.sort_by_key(|snapshot| snapshot.id);
        Self { snapshots }
    }

    /// Iterator over the captured snapshots in ascending identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.snapshots.iter()
    }

    /// Looks up the snapshot of a single entity.
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&EntitySnapshot> {
        self.snapshots
            .binary_search_by_key(&entity, |snapshot| snapshot.id)
            .ok()
            .map(|index| &self.snapshots[index])
    }
}
