#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Pure system that grants entity conditions based on the terrain underneath them.
//!
//! Every entity whose kind carries terrain condition rules receives one
//! [`TerrainConditionGate`] per rule when it spawns. On each simulation step
//! the gates sample the terrain under their entity and grant or revoke their
//! condition through the entity's condition registry when the observed
//! terrain changes.

mod config;
mod gate;

use std::collections::BTreeMap;

use terrain_conditions_core::{
    ConditionRegistry, EntityId, EntityKind, EntityView, Event, TerrainMap,
};
use tracing::debug;

pub use config::{ConfigError, RuleBook, TerrainConditionConfig};
pub use gate::{sample_terrain, GateStep, SkipReason, TerrainConditionGate};

/// Owns the terrain condition gates of every entity in the simulation.
#[derive(Debug)]
pub struct TerrainConditions<R> {
    rules: RuleBook,
    gates: BTreeMap<EntityId, Vec<TerrainConditionGate<R>>>,
}

impl<R> TerrainConditions<R>
where
    R: ConditionRegistry + Clone,
{
    /// Creates a system applying the provided rules.
    #[must_use]
    pub fn new(rules: RuleBook) -> Self {
        Self {
            rules,
            gates: BTreeMap::new(),
        }
    }

    /// Consumes world events and steps every gate once per elapsed tick.
    ///
    /// `registry_for` is consulted exactly once per spawned entity; returning
    /// `None` wires the entity's gates without a registry, which leaves them
    /// permanently inactive.
    pub fn handle<M, F>(
        &mut self,
        events: &[Event],
        map: &M,
        entities: &EntityView,
        mut registry_for: F,
    ) where
        M: TerrainMap + ?Sized,
        F: FnMut(EntityId) -> Option<R>,
    {
        for event in events {
            match event {
                Event::EntitySpawned { entity, kind, .. } => {
                    self.attach(*entity, kind, &mut registry_for);
                }
                Event::EntityDespawned { entity } => {
                    if self.gates.remove(entity).is_some() {
                        debug!(entity = entity.get(), "dropped terrain condition gates");
                    }
                }
                Event::TimeAdvanced { .. } => self.step_all(map, entities),
                _ => {}
            }
        }
    }

    fn attach<F>(&mut self, entity: EntityId, kind: &EntityKind, registry_for: &mut F)
    where
        F: FnMut(EntityId) -> Option<R>,
    {
        let rules = self.rules.rules_for(kind);
        if rules.is_empty() {
            return;
        }

        let registry = registry_for(entity);
        debug!(
            entity = entity.get(),
            kind = %kind,
            rules = rules.len(),
            registry = registry.is_some(),
            "attached terrain condition gates"
        );
        let gates = rules
            .iter()
            .map(|config| TerrainConditionGate::new(config.clone(), entity, registry.clone()))
            .collect();
        let _ = self.gates.insert(entity, gates);
    }

    fn step_all<M>(&mut self, map: &M, entities: &EntityView)
    where
        M: TerrainMap + ?Sized,
    {
        for (entity, gates) in &mut self.gates {
            let Some(snapshot) = entities.get(*entity) else {
                continue;
            };
            for gate in gates.iter_mut() {
                let _ = gate.step(snapshot.location, map);
            }
        }
    }
}

impl<R> TerrainConditions<R> {
    /// Gates attached to the entity, in rule order.
    #[must_use]
    pub fn gates_for(&self, entity: EntityId) -> &[TerrainConditionGate<R>] {
        self.gates.get(&entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of gates across all entities.
    #[must_use]
    pub fn gate_count(&self) -> usize {
        self.gates.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    use terrain_conditions_core::{
        CellCoord, ConditionName, ConditionToken, CustomMovementLayer, EntitySnapshot, LayerIndex,
        Location, TerrainTypeName, TileSet,
    };

    #[derive(Debug, Default)]
    struct Counter {
        grants: usize,
        revokes: usize,
    }

    impl ConditionRegistry for Counter {
        fn grant(&mut self, _entity: EntityId, _condition: &ConditionName) -> ConditionToken {
            self.grants += 1;
            ConditionToken::new(u32::try_from(self.grants).unwrap_or(u32::MAX))
        }

        fn revoke(&mut self, _entity: EntityId, _token: ConditionToken) -> Option<ConditionToken> {
            self.revokes += 1;
            None
        }
    }

    struct AllWater {
        water: TerrainTypeName,
        tile_set: TileSet,
    }

    impl TerrainMap for AllWater {
        fn contains(&self, cell: CellCoord) -> bool {
            cell.column() >= 0 && cell.row() >= 0
        }

        fn terrain_type_at(&self, _cell: CellCoord) -> Option<&TerrainTypeName> {
            Some(&self.water)
        }

        fn custom_layer(&self, _layer: LayerIndex) -> Option<&dyn CustomMovementLayer> {
            None
        }

        fn tile_set(&self) -> &TileSet {
            &self.tile_set
        }
    }

    fn water_map() -> AllWater {
        AllWater {
            water: TerrainTypeName::new("Water"),
            tile_set: TileSet::default(),
        }
    }

    fn rules() -> RuleBook {
        let mut rules = RuleBook::new();
        for condition in ["SwimBonus", "Wet"] {
            rules.insert(
                EntityKind::new("infantry"),
                TerrainConditionConfig::new(
                    ConditionName::new(condition),
                    [TerrainTypeName::new("Water")],
                )
                .expect("valid rule"),
            );
        }
        rules
    }

    fn view(entity: EntityId, kind: &str) -> EntityView {
        EntityView::from_snapshots(vec![EntitySnapshot {
            id: entity,
            kind: EntityKind::new(kind),
            location: Location::on_ground(CellCoord::new(0, 0)),
        }])
    }

    fn spawned(entity: EntityId, kind: &str) -> Event {
        Event::EntitySpawned {
            entity,
            kind: EntityKind::new(kind),
            location: Location::on_ground(CellCoord::new(0, 0)),
        }
    }

    #[test]
    fn spawn_attaches_one_gate_per_rule() {
        let counter = Rc::new(RefCell::new(Counter::default()));
        let mut system = TerrainConditions::new(rules());
        let entity = EntityId::new(0);
        let mut lookups = 0;

        system.handle(
            &[spawned(entity, "infantry"), Event::TimeAdvanced { tick: 0 }],
            &water_map(),
            &view(entity, "infantry"),
            |_| {
                lookups += 1;
                Some(Rc::clone(&counter))
            },
        );

        assert_eq!(lookups, 1);
        assert_eq!(system.gates_for(entity).len(), 2);
        assert!(system.gates_for(entity).iter().all(TerrainConditionGate::is_granted));
        assert_eq!(counter.borrow().grants, 2);
    }

    #[test]
    fn kinds_without_rules_get_no_gates() {
        let mut system: TerrainConditions<Rc<RefCell<Counter>>> =
            TerrainConditions::new(rules());
        let entity = EntityId::new(4);
        let mut lookups = 0;

        system.handle(
            &[spawned(entity, "tank")],
            &water_map(),
            &view(entity, "tank"),
            |_| {
                lookups += 1;
                None
            },
        );

        assert_eq!(lookups, 0);
        assert_eq!(system.gate_count(), 0);
    }

    #[test]
    fn despawn_drops_gates_without_revoking() {
        let counter = Rc::new(RefCell::new(Counter::default()));
        let mut system = TerrainConditions::new(rules());
        let entity = EntityId::new(2);
        let map = water_map();

        system.handle(
            &[spawned(entity, "infantry"), Event::TimeAdvanced { tick: 0 }],
            &map,
            &view(entity, "infantry"),
            |_| Some(Rc::clone(&counter)),
        );
        system.handle(
            &[Event::EntityDespawned { entity }],
            &map,
            &EntityView::default(),
            |_| Some(Rc::clone(&counter)),
        );

        assert_eq!(system.gate_count(), 0);
        assert_eq!(counter.borrow().revokes, 0);
    }

    #[test]
    fn gates_without_registry_stay_idle() {
        let mut system: TerrainConditions<Rc<RefCell<Counter>>> =
            TerrainConditions::new(rules());
        let entity = EntityId::new(1);

        system.handle(
            &[
                spawned(entity, "infantry"),
                Event::TimeAdvanced { tick: 0 },
                Event::TimeAdvanced { tick: 1 },
            ],
            &water_map(),
            &view(entity, "infantry"),
            |_| None,
        );

        let gates = system.gates_for(entity);
        assert_eq!(gates.len(), 2);
        assert!(gates.iter().all(|gate| !gate.has_registry() && !gate.is_granted()));
    }
}
