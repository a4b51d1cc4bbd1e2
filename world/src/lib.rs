#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative world state for the terrain conditions engine.
//!
//! The world owns the layered map, every entity, and the condition ledger.
//! It is only mutated through [`apply`]; systems read it through [`query`].

mod ledger;
mod map;

use std::collections::BTreeMap;

use terrain_conditions_core::{
    Command, ConditionChange, EntityId, EntityKind, Event, LayerIndex, Location, RejectionReason,
};
use tracing::debug;

pub use ledger::{ConditionLedger, LedgerError, SharedLedger};
pub use map::GameMap;

/// Represents the authoritative world state.
#[derive(Debug)]
pub struct World {
    map: GameMap,
    entities: BTreeMap<EntityId, Entity>,
    next_entity_id: u32,
    ledger: SharedLedger,
    tick_index: u64,
}

impl World {
    /// Creates an empty world with no map and no entities.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: GameMap::empty(),
            entities: BTreeMap::new(),
            next_entity_id: 0,
            ledger: ConditionLedger::shared(),
            tick_index: 0,
        }
    }

    fn allocate_entity_id(&mut self) -> EntityId {
        let id = EntityId::new(self.next_entity_id);
        self.next_entity_id = self.next_entity_id.saturating_add(1);
        id
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
struct Entity {
    kind: EntityKind,
    location: Location,
}

/// Applies the provided command to the world, mutating state deterministically.
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    let outcome = match command {
        Command::ConfigureMap {
            columns,
            rows,
            tile_set,
            fill,
        } => GameMap::filled(columns, rows, tile_set, fill).map(|map| {
            world.map = map;
            Event::MapConfigured { columns, rows }
        }),
        Command::RegisterLayer {
            layer,
            default_terrain,
        } => world
            .map
            .register_layer(layer, default_terrain)
            .map(|()| Event::LayerRegistered { layer }),
        Command::SpawnEntity {
            kind,
            location,
            tracks_conditions,
        } => {
            let entity = world.allocate_entity_id();
            if tracks_conditions {
                world.ledger.borrow_mut().enroll(entity);
            }
            debug!(entity = entity.get(), kind = %kind, tracks_conditions, "spawned entity");
            let _ = world.entities.insert(
                entity,
                Entity {
                    kind: kind.clone(),
                    location,
                },
            );
            Ok(Event::EntitySpawned {
                entity,
                kind,
                location,
            })
        }
        Command::MoveEntity { entity, location } => world
            .entities
            .get_mut(&entity)
            .ok_or(RejectionReason::UnknownEntity(entity))
            .map(|state| {
                let from = std::mem::replace(&mut state.location, location);
                Event::EntityMoved {
                    entity,
                    from,
                    to: location,
                }
            }),
        Command::DespawnEntity { entity } => world
            .entities
            .remove(&entity)
            .ok_or(RejectionReason::UnknownEntity(entity))
            .map(|_| {
                let released = world.ledger.borrow_mut().release(entity);
                debug!(entity = entity.get(), released, "despawned entity");
                Event::EntityDespawned { entity }
            }),
        Command::SetGroundTerrain { cell, terrain } => world
            .map
            .set_ground(cell, terrain)
            .map(|()| Event::TerrainChanged {
                layer: LayerIndex::GROUND,
                cell,
                terrain,
            }),
        Command::SetLayerTerrain {
            layer,
            cell,
            terrain,
        } => world
            .map
            .set_layer_terrain(layer, cell, terrain)
            .map(|()| Event::TerrainChanged {
                layer,
                cell,
                terrain,
            }),
        Command::Tick => {
            let tick = world.tick_index;
            world.tick_index = world.tick_index.saturating_add(1);
            Ok(Event::TimeAdvanced { tick })
        }
    };

    match outcome {
        Ok(event) => out_events.push(event),
        Err(reason) => {
            debug!(?reason, "rejected command");
            out_events.push(Event::CommandRejected { reason });
        }
    }
}

/// Hands over every condition toggle recorded by the ledger since the last call.
pub fn drain_condition_changes(world: &mut World) -> Vec<ConditionChange> {
    world.ledger.borrow_mut().drain_changes()
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use std::rc::Rc;

    use terrain_conditions_core::{
        ConditionName, EntityId, EntitySnapshot, EntityView,
    };

    use super::{GameMap, SharedLedger, World};

    /// Provides read-only access to the layered terrain map.
    #[must_use]
    pub fn terrain_map(world: &World) -> &GameMap {
        &world.map
    }

    /// Captures a read-only view of every entity in the world.
    #[must_use]
    pub fn entity_view(world: &World) -> EntityView {
        let snapshots = world
            .entities
            .iter()
            .map(|(id, entity)| EntitySnapshot {
                id: *id,
                kind: entity.kind.clone(),
                location: entity.location,
            })
            .collect();
        EntityView::from_snapshots(snapshots)
    }

    /// Ledger handle for an entity that participates in condition tracking.
    ///
    /// Returns `None` for unknown entities and for entities spawned without
    /// condition tracking.
    #[must_use]
    pub fn condition_registry(world: &World, entity: EntityId) -> Option<SharedLedger> {
        if !world.entities.contains_key(&entity) {
            return None;
        }
        if !world.ledger.borrow().is_enrolled(entity) {
            return None;
        }
        Some(Rc::clone(&world.ledger))
    }

    /// Conditions currently active for the entity, in name order.
    #[must_use]
    pub fn active_conditions(world: &World, entity: EntityId) -> Vec<ConditionName> {
        world.ledger.borrow().active_conditions(entity)
    }

    /// Number of condition grants outstanding for the entity.
    #[must_use]
    pub fn outstanding_grants(world: &World, entity: EntityId) -> usize {
        world.ledger.borrow().outstanding_tokens(entity)
    }

    /// Index of the next simulation step.
    #[must_use]
    pub fn tick_index(world: &World) -> u64 {
        world.tick_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrain_conditions_core::{
        CellCoord, ConditionName, ConditionRegistry, TerrainIndex, TerrainMap, TerrainTypeName,
        TileSet,
    };

    fn configure(world: &mut World, events: &mut Vec<Event>) {
        apply(
            world,
            Command::ConfigureMap {
                columns: 4,
                rows: 3,
                tile_set: TileSet::new(vec![
                    TerrainTypeName::new("Clear"),
                    TerrainTypeName::new("Water"),
                ]),
                fill: TerrainIndex::new(0),
            },
            events,
        );
    }

    fn spawn(world: &mut World, tracks_conditions: bool) -> EntityId {
        let mut events = Vec::new();
        apply(
            world,
            Command::SpawnEntity {
                kind: EntityKind::new("infantry"),
                location: Location::on_ground(CellCoord::new(0, 0)),
                tracks_conditions,
            },
            &mut events,
        );
        match events.as_slice() {
            [Event::EntitySpawned { entity, .. }] => *entity,
            other => panic!("unexpected spawn events: {other:?}"),
        }
    }

    #[test]
    fn apply_configures_map() {
        let mut world = World::new();
        let mut events = Vec::new();
        configure(&mut world, &mut events);

        assert_eq!(events, vec![Event::MapConfigured { columns: 4, rows: 3 }]);
        let map = query::terrain_map(&world);
        assert_eq!(map.dimensions(), (4, 3));
        assert!(map.contains(CellCoord::new(3, 2)));
        assert!(!map.contains(CellCoord::new(4, 2)));
    }

    #[test]
    fn configure_rejects_unknown_fill() {
        let mut world = World::new();
        let mut events = Vec::new();

        apply(
            &mut world,
            Command::ConfigureMap {
                columns: 2,
                rows: 2,
                tile_set: TileSet::new(vec![TerrainTypeName::new("Clear")]),
                fill: TerrainIndex::new(4),
            },
            &mut events,
        );

        assert_eq!(
            events,
            vec![Event::CommandRejected {
                reason: RejectionReason::UnknownTerrain(TerrainIndex::new(4)),
            }]
        );
        assert_eq!(query::terrain_map(&world).dimensions(), (0, 0));
    }

    #[test]
    fn oversized_map_is_rejected_and_previous_map_kept() {
        let mut world = World::new();
        let mut events = Vec::new();
        configure(&mut world, &mut events);
        events.clear();

        apply(
            &mut world,
            Command::ConfigureMap {
                columns: u32::MAX,
                rows: u32::MAX,
                tile_set: TileSet::new(vec![TerrainTypeName::new("Clear")]),
                fill: TerrainIndex::new(0),
            },
            &mut events,
        );

        assert_eq!(
            events,
            vec![Event::CommandRejected {
                reason: RejectionReason::MapTooLarge {
                    columns: u32::MAX,
                    rows: u32::MAX,
                },
            }]
        );
        let map = query::terrain_map(&world);
        assert_eq!(map.dimensions(), (4, 3));
        assert!(!map.contains(CellCoord::new(4, 0)));
    }

    #[test]
    fn entity_identifiers_are_allocated_sequentially() {
        let mut world = World::new();
        let first = spawn(&mut world, false);
        let second = spawn(&mut world, true);

        assert_eq!(first, EntityId::new(0));
        assert_eq!(second, EntityId::new(1));
        assert_eq!(query::entity_view(&world).iter().count(), 2);
    }

    #[test]
    fn registry_is_only_exposed_to_tracking_entities() {
        let mut world = World::new();
        let plain = spawn(&mut world, false);
        let tracked = spawn(&mut world, true);

        assert!(query::condition_registry(&world, plain).is_none());
        assert!(query::condition_registry(&world, tracked).is_some());
        assert!(query::condition_registry(&world, EntityId::new(42)).is_none());
    }

    #[test]
    fn moving_unknown_entity_is_rejected() {
        let mut world = World::new();
        let mut events = Vec::new();

        apply(
            &mut world,
            Command::MoveEntity {
                entity: EntityId::new(7),
                location: Location::on_ground(CellCoord::new(1, 1)),
            },
            &mut events,
        );

        assert_eq!(
            events,
            vec![Event::CommandRejected {
                reason: RejectionReason::UnknownEntity(EntityId::new(7)),
            }]
        );
    }

    #[test]
    fn move_reports_previous_location() {
        let mut world = World::new();
        let entity = spawn(&mut world, false);
        let mut events = Vec::new();
        let destination = Location::new(CellCoord::new(-2, 5), LayerIndex::new(1));

        apply(
            &mut world,
            Command::MoveEntity {
                entity,
                location: destination,
            },
            &mut events,
        );

        assert_eq!(
            events,
            vec![Event::EntityMoved {
                entity,
                from: Location::on_ground(CellCoord::new(0, 0)),
                to: destination,
            }]
        );
        let view = query::entity_view(&world);
        assert_eq!(view.get(entity).map(|snapshot| snapshot.location), Some(destination));
    }

    #[test]
    fn despawn_releases_ledger_grants() {
        let mut world = World::new();
        let entity = spawn(&mut world, true);
        let mut registry = query::condition_registry(&world, entity).expect("tracked entity");
        let _ = registry.grant(entity, &ConditionName::new("SwimBonus"));
        assert_eq!(query::outstanding_grants(&world, entity), 1);

        let mut events = Vec::new();
        apply(&mut world, Command::DespawnEntity { entity }, &mut events);

        assert_eq!(events, vec![Event::EntityDespawned { entity }]);
        assert_eq!(query::outstanding_grants(&world, entity), 0);
        assert!(query::active_conditions(&world, entity).is_empty());
        let changes = drain_condition_changes(&mut world);
        assert_eq!(changes.len(), 2);
        assert!(changes[0].is_enabled());
        assert!(!changes[1].is_enabled());
    }

    #[test]
    fn terrain_edits_are_broadcast() {
        let mut world = World::new();
        let mut events = Vec::new();
        configure(&mut world, &mut events);
        events.clear();

        apply(
            &mut world,
            Command::SetGroundTerrain {
                cell: CellCoord::new(1, 1),
                terrain: TerrainIndex::new(1),
            },
            &mut events,
        );
        apply(
            &mut world,
            Command::SetLayerTerrain {
                layer: LayerIndex::new(2),
                cell: CellCoord::new(1, 1),
                terrain: TerrainIndex::new(1),
            },
            &mut events,
        );

        assert_eq!(
            events,
            vec![
                Event::TerrainChanged {
                    layer: LayerIndex::GROUND,
                    cell: CellCoord::new(1, 1),
                    terrain: TerrainIndex::new(1),
                },
                Event::CommandRejected {
                    reason: RejectionReason::UnknownLayer(LayerIndex::new(2)),
                },
            ]
        );
        assert_eq!(
            query::terrain_map(&world).terrain_type_at(CellCoord::new(1, 1)),
            Some(&TerrainTypeName::new("Water"))
        );
    }

    #[test]
    fn ticks_advance_sequentially() {
        let mut world = World::new();
        let mut events = Vec::new();

        apply(&mut world, Command::Tick, &mut events);
        apply(&mut world, Command::Tick, &mut events);

        assert_eq!(
            events,
            vec![
                Event::TimeAdvanced { tick: 0 },
                Event::TimeAdvanced { tick: 1 },
            ]
        );
        assert_eq!(query::tick_index(&world), 2);
    }
}
