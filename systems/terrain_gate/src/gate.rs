//! Terrain sampling and the per-entity grant/revoke state machine.

use std::sync::Arc;

use terrain_conditions_core::{
    ConditionRegistry, ConditionToken, EntityId, Location, TerrainMap, TerrainTypeName,
};
use tracing::{debug, warn};

use crate::config::TerrainConditionConfig;

/// Resolves the terrain type underneath a location.
///
/// Ground locations read the base grid directly. Locations on a custom
/// movement layer ask that layer for a terrain index and resolve it through
/// the tile set. Returns `None` when the cell is off-map or the layer or
/// index cannot be resolved.
pub fn sample_terrain<M>(map: &M, location: Location) -> Option<&TerrainTypeName>
where
    M: TerrainMap + ?Sized,
{
    if !map.contains(location.cell()) {
        return None;
    }
    sample_in_bounds(map, location)
}

/// Resolves terrain for a location already known to lie on the map.
fn sample_in_bounds<M>(map: &M, location: Location) -> Option<&TerrainTypeName>
where
    M: TerrainMap + ?Sized,
{
    let cell = location.cell();
    let layer = location.layer();
    if layer.is_ground() {
        return map.terrain_type_at(cell);
    }

    let Some(handler) = map.custom_layer(layer) else {
        warn!(layer = layer.get(), %cell, "no custom movement layer registered");
        return None;
    };
    let index = handler.terrain_index_at(cell);
    let terrain = map.tile_set().terrain_type_name(index);
    if terrain.is_none() {
        warn!(layer = layer.get(), %cell, index = index.get(), "terrain index missing from tile set");
    }
    terrain
}

/// Why a gate step made no observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The entity stands outside the map.
    OutOfBounds,
    /// The gate was wired without a condition registry.
    NoRegistry,
    /// The terrain under the entity could not be resolved.
    Unresolved,
}

/// Outcome of a single gate step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GateStep {
    /// Nothing was sampled and no state changed.
    Skipped(SkipReason),
    /// Terrain was sampled without a registry call.
    Observed,
    /// The condition was granted and the token stored.
    Granted(ConditionToken),
    /// The stored token was revoked.
    Revoked(ConditionToken),
}

/// Grants a condition to one entity while it stands on a trigger terrain.
///
/// Transitions are edge-triggered: the registry is only consulted when the
/// sampled terrain differs from the previous observation.
#[derive(Debug)]
pub struct TerrainConditionGate<R> {
    config: Arc<TerrainConditionConfig>,
    entity: EntityId,
    registry: Option<R>,
    grant_token: Option<ConditionToken>,
    last_observed: Option<TerrainTypeName>,
}

impl<R> TerrainConditionGate<R>
where
    R: ConditionRegistry,
{
    /// Wires a gate for `entity`. A gate without a registry never acts.
    #[must_use]
    pub fn new(config: Arc<TerrainConditionConfig>, entity: EntityId, registry: Option<R>) -> Self {
        Self {
            config,
            entity,
            registry,
            grant_token: None,
            last_observed: None,
        }
    }

    /// Runs one simulation step for an entity standing at `location`.
    pub fn step<M>(&mut self, location: Location, map: &M) -> GateStep
    where
        M: TerrainMap + ?Sized,
    {
        if !map.contains(location.cell()) {
            return GateStep::Skipped(SkipReason::OutOfBounds);
        }

        let Some(registry) = self.registry.as_mut() else {
            return GateStep::Skipped(SkipReason::NoRegistry);
        };

        let Some(current) = sample_in_bounds(map, location) else {
            return GateStep::Skipped(SkipReason::Unresolved);
        };

        if self.last_observed.as_ref() == Some(current) {
            return GateStep::Observed;
        }

        let wants_granted = self.config.triggers_on(current);
        let outcome = match (wants_granted, self.grant_token) {
            (true, None) => {
                let token = registry.grant(self.entity, self.config.condition());
                debug!(
                    entity = self.entity.get(),
                    condition = %self.config.condition(),
                    terrain = %current,
                    token = token.get(),
                    "granted terrain condition"
                );
                self.grant_token = Some(token);
                GateStep::Granted(token)
            }
            (false, Some(token)) => {
                self.grant_token = registry.revoke(self.entity, token);
                debug!(
                    entity = self.entity.get(),
                    condition = %self.config.condition(),
                    terrain = %current,
                    token = token.get(),
                    "revoked terrain condition"
                );
                GateStep::Revoked(token)
            }
            _ => GateStep::Observed,
        };

        self.last_observed = Some(current.clone());
        outcome
    }
}

impl<R> TerrainConditionGate<R> {
    /// Reports whether the gate was wired with a registry.
    #[must_use]
    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    /// Token of the grant the gate currently holds.
    #[must_use]
    pub fn grant_token(&self) -> Option<ConditionToken> {
        self.grant_token
    }

    /// Reports whether the gate currently holds a grant.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.grant_token.is_some()
    }

    /// Terrain observed by the most recent completed step.
    #[must_use]
    pub fn last_observed(&self) -> Option<&TerrainTypeName> {
        self.last_observed.as_ref()
    }
}
