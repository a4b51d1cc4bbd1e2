//! Plays a scenario script against the world and reports condition changes.

use std::{collections::BTreeMap, io::Write};

use anyhow::{bail, Context, Result};
use terrain_conditions_core::{Command, ConditionChange, EntityId, EntityKind, Event};
use terrain_conditions_system_terrain_gate::TerrainConditions;
use terrain_conditions_world::{self as world, query, SharedLedger, World};
use tracing::{debug, warn};

use crate::scenario::{Scenario, ScriptCommand};

#[derive(Clone, Debug)]
struct Member {
    name: String,
    kind: EntityKind,
    alive: bool,
}

/// World, terrain condition system, and the roster of scripted entities.
pub(crate) struct Replay<'a> {
    scenario: &'a Scenario,
    world: World,
    system: TerrainConditions<SharedLedger>,
    names: BTreeMap<String, EntityId>,
    roster: BTreeMap<EntityId, Member>,
}

impl<'a> Replay<'a> {
    /// Builds the scenario map. Any rejected setup command aborts the replay.
    pub(crate) fn new(scenario: &'a Scenario) -> Result<Self> {
        let mut replay = Self {
            scenario,
            world: World::new(),
            system: TerrainConditions::new(scenario.rules.clone()),
            names: BTreeMap::new(),
            roster: BTreeMap::new(),
        };

        let mut events = Vec::new();
        for command in &scenario.setup {
            world::apply(&mut replay.world, command.clone(), &mut events);
        }
        if let Some(Event::CommandRejected { reason }) = events
            .iter()
            .find(|event| matches!(event, Event::CommandRejected { .. }))
        {
            bail!("world rejected scenario map setup: {reason:?}");
        }
        Ok(replay)
    }

    /// Runs the scripted actions of `tick`, advances time, and writes one
    /// line per condition change.
    pub(crate) fn advance<W: Write>(&mut self, tick: u64, out: &mut W) -> Result<()> {
        let scenario = self.scenario;
        let mut events = Vec::new();
        let actions = scenario.script.get(&tick).map(Vec::as_slice).unwrap_or(&[]);
        for action in actions {
            let Some(command) = self.resolve(action) else {
                continue;
            };
            let spawning = match action {
                ScriptCommand::Spawn { name, .. } => Some(name.clone()),
                _ => None,
            };
            let first = events.len();
            world::apply(&mut self.world, command, &mut events);
            for event in &events[first..] {
                match event {
                    Event::EntitySpawned { entity, kind, .. } => {
                        if let Some(name) = spawning.clone() {
                            let _ = self.names.insert(name.clone(), *entity);
                            let _ = self.roster.insert(
                                *entity,
                                Member {
                                    name,
                                    kind: kind.clone(),
                                    alive: true,
                                },
                            );
                        }
                    }
                    Event::EntityDespawned { entity } => {
                        if let Some(member) = self.roster.get_mut(entity) {
                            member.alive = false;
                        }
                    }
                    Event::CommandRejected { reason } => {
                        warn!(tick, ?action, ?reason, "world rejected scripted action");
                    }
                    _ => {}
                }
            }
        }
        world::apply(&mut self.world, Command::Tick, &mut events);

        let map = query::terrain_map(&self.world);
        let entities = query::entity_view(&self.world);
        let state = &self.world;
        self.system.handle(&events, map, &entities, |entity| {
            query::condition_registry(state, entity)
        });

        for change in world::drain_condition_changes(&mut self.world) {
            self.write_change(tick, &change, out)?;
        }
        Ok(())
    }

    /// Writes the active conditions of every entity still alive.
    pub(crate) fn write_summary<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "summary after {} ticks:", query::tick_index(&self.world))?;
        for (entity, member) in self.roster.iter().filter(|(_, member)| member.alive) {
            let conditions = if self.scenario.tracking_kinds.contains(&member.kind) {
                let active = query::active_conditions(&self.world, *entity);
                if active.is_empty() {
                    "none".to_owned()
                } else {
                    active
                        .iter()
                        .map(|condition| condition.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                }
            } else {
                "untracked".to_owned()
            };
            writeln!(
                out,
                "  entity {entity} {} ({}): {conditions}",
                member.name, member.kind
            )?;
        }
        Ok(())
    }

    fn resolve(&self, action: &ScriptCommand) -> Option<Command> {
        let entity = |name: &str| {
            let entity = self.names.get(name).copied();
            if entity.is_none() {
                debug!(name, "scripted entity never spawned");
            }
            entity
        };
        match action {
            ScriptCommand::Spawn { kind, location, .. } => Some(Command::SpawnEntity {
                kind: kind.clone(),
                location: *location,
                tracks_conditions: self.scenario.tracking_kinds.contains(kind),
            }),
            ScriptCommand::Move { name, location } => Some(Command::MoveEntity {
                entity: entity(name)?,
                location: *location,
            }),
            ScriptCommand::Despawn { name } => Some(Command::DespawnEntity {
                entity: entity(name)?,
            }),
            ScriptCommand::World(command) => Some(command.clone()),
        }
    }

    fn write_change<W: Write>(
        &self,
        tick: u64,
        change: &ConditionChange,
        out: &mut W,
    ) -> Result<()> {
        let entity = change.entity();
        let kind = self
            .roster
            .get(&entity)
            .map_or("unknown", |member| member.kind.as_str());
        let sign = if change.is_enabled() { '+' } else { '-' };
        writeln!(
            out,
            "tick {tick}: entity {entity} ({kind}) {sign}{}",
            change.condition()
        )
        .context("failed to write condition change")
    }
}

/// Replays `ticks` ticks of the scenario and writes the report to `out`.
pub(crate) fn run<W: Write>(scenario: &Scenario, ticks: u64, out: &mut W) -> Result<()> {
    let mut replay = Replay::new(scenario)?;
    for tick in 0..ticks {
        replay.advance(tick, out)?;
    }
    replay.write_summary(out)
}
