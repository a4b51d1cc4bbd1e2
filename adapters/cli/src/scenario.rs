//! Declarative scenario files replayed by the command-line adapter.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use terrain_conditions_core::{
    CellCoord, Command, ConditionName, EntityKind, LayerIndex, Location, TerrainIndex,
    TerrainTypeName, TileSet,
};
use terrain_conditions_system_terrain_gate::{RuleBook, TerrainConditionConfig};
use tracing::warn;

/// Scenario resolved into world commands, rules, and a timed script.
#[derive(Debug)]
pub(crate) struct Scenario {
    /// Commands that build the map before the first tick.
    pub(crate) setup: Vec<Command>,
    /// Terrain condition rules keyed by entity kind.
    pub(crate) rules: RuleBook,
    /// Kinds whose entities participate in the condition ledger.
    pub(crate) tracking_kinds: BTreeSet<EntityKind>,
    /// Script actions grouped by the tick they run on, in file order.
    pub(crate) script: BTreeMap<u64, Vec<ScriptCommand>>,
}

impl Scenario {
    /// Loads and validates the scenario stored at `path`.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario at {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("invalid scenario at {}", path.display()))
    }

    /// Parses and validates scenario TOML.
    pub(crate) fn parse(contents: &str) -> Result<Self> {
        let document: ScenarioDocument =
            toml::from_str(contents).context("failed to parse scenario toml contents")?;
        compile(document)
    }

    /// Number of ticks needed to play every scripted action.
    pub(crate) fn script_length(&self) -> u64 {
        self.script
            .keys()
            .next_back()
            .map_or(0, |last| last.saturating_add(1))
    }

    /// Number of scripted actions.
    pub(crate) fn action_count(&self) -> usize {
        self.script.values().map(Vec::len).sum()
    }
}

/// Scripted action with entity names still unresolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ScriptCommand {
    /// Spawns a named entity.
    Spawn {
        /// Name used by later actions to refer to the entity.
        name: String,
        /// Kind of the spawned entity.
        kind: EntityKind,
        /// Spawn location.
        location: Location,
    },
    /// Moves a named entity.
    Move {
        /// Name of the entity to move.
        name: String,
        /// Destination location.
        location: Location,
    },
    /// Despawns a named entity.
    Despawn {
        /// Name of the entity to remove.
        name: String,
    },
    /// Command that does not reference entities.
    World(Command),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ScenarioDocument {
    map: MapSection,
    #[serde(default)]
    layers: Vec<LayerSection>,
    #[serde(default)]
    kinds: BTreeMap<String, KindSection>,
    #[serde(default)]
    script: Vec<ScriptStep>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct MapSection {
    tile_set: Vec<String>,
    legend: BTreeMap<String, String>,
    ground: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct LayerSection {
    index: u8,
    default: String,
    #[serde(default)]
    cells: Vec<LayerCell>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayerCell {
    at: [i32; 2],
    terrain: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct KindSection {
    #[serde(default)]
    conditions: Option<Vec<String>>,
    #[serde(default)]
    rules: Vec<TerrainConditionConfig>,
}

#[derive(Debug, Deserialize)]
struct ScriptStep {
    tick: u64,
    #[serde(flatten)]
    action: ScriptAction,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
enum ScriptAction {
    Spawn {
        entity: String,
        kind: String,
        at: [i32; 2],
        #[serde(default)]
        layer: u8,
    },
    Move {
        entity: String,
        at: [i32; 2],
        #[serde(default)]
        layer: u8,
    },
    Despawn {
        entity: String,
    },
    Paint {
        at: [i32; 2],
        terrain: String,
    },
    PaintLayer {
        layer: u8,
        at: [i32; 2],
        terrain: String,
    },
}

fn compile(document: ScenarioDocument) -> Result<Scenario> {
    let tile_set = TileSet::new(
        document
            .map
            .tile_set
            .iter()
            .map(TerrainTypeName::new)
            .collect(),
    );
    ensure!(!tile_set.is_empty(), "map tile-set must define at least one terrain");
    ensure!(
        tile_set.len() <= usize::from(u8::MAX) + 1,
        "map tile-set defines {} terrains; at most 256 are supported",
        tile_set.len()
    );

    let mut setup = compile_ground(&document.map, &tile_set)?;
    let (columns, rows) = match setup.first() {
        Some(Command::ConfigureMap { columns, rows, .. }) => (*columns, *rows),
        _ => (0, 0),
    };
    let bounds = Bounds { columns, rows };

    let mut registered = BTreeSet::new();
    for layer in &document.layers {
        ensure!(layer.index != 0, "layer index 0 is reserved for the ground");
        ensure!(
            registered.insert(layer.index),
            "layer {} is declared more than once",
            layer.index
        );
        let index = LayerIndex::new(layer.index);
        setup.push(Command::RegisterLayer {
            layer: index,
            default_terrain: terrain_index(&tile_set, &layer.default)?,
        });
        for cell in &layer.cells {
            setup.push(Command::SetLayerTerrain {
                layer: index,
                cell: bounds.cell(cell.at)?,
                terrain: terrain_index(&tile_set, &cell.terrain)?,
            });
        }
    }

    let declared: BTreeSet<String> = document.kinds.keys().cloned().collect();
    let mut rules = RuleBook::new();
    let mut tracking_kinds = BTreeSet::new();
    for (name, section) in document.kinds {
        let kind = EntityKind::new(name);
        for config in section.rules {
            rules.insert(kind.clone(), config);
        }
        if let Some(conditions) = section.conditions {
            let tracked: BTreeSet<ConditionName> =
                conditions.into_iter().map(ConditionName::new).collect();
            rules.ensure_tracked(&kind, &tracked)?;
            let _ = tracking_kinds.insert(kind);
        } else if !rules.rules_for(&kind).is_empty() {
            warn!(
                kind = %kind,
                "kind has terrain rules but tracks no conditions; its rules stay idle"
            );
        }
    }

    let script = compile_script(document.script, &tile_set, bounds, &registered, |kind| {
        declared.contains(kind)
    })?;

    Ok(Scenario {
        setup,
        rules,
        tracking_kinds,
        script,
    })
}

fn compile_ground(map: &MapSection, tile_set: &TileSet) -> Result<Vec<Command>> {
    let mut legend = BTreeMap::new();
    for (glyph, terrain) in &map.legend {
        let mut chars = glyph.chars();
        let (Some(symbol), None) = (chars.next(), chars.next()) else {
            bail!("legend key `{glyph}` must be a single character");
        };
        let _ = legend.insert(symbol, terrain_index(tile_set, terrain)?);
    }

    let rows = u32::try_from(map.ground.len()).context("ground has too many rows")?;
    let columns = map.ground.first().map_or(0, |row| row.chars().count());
    let columns = u32::try_from(columns).context("ground has too many columns")?;
    ensure!(rows > 0 && columns > 0, "ground must contain at least one cell");

    let fill = TerrainIndex::new(0);
    let mut commands = vec![Command::ConfigureMap {
        columns,
        rows,
        tile_set: tile_set.clone(),
        fill,
    }];

    for (row, line) in (0_i32..).zip(&map.ground) {
        let width = line.chars().count();
        ensure!(
            u32::try_from(width).is_ok_and(|width| width == columns),
            "ground row {row} has {width} cells; expected {columns}"
        );
        for (column, glyph) in (0_i32..).zip(line.chars()) {
            let Some(terrain) = legend.get(&glyph).copied() else {
                bail!("ground glyph `{glyph}` at ({column}, {row}) is missing from the legend");
            };
            if terrain != fill {
                commands.push(Command::SetGroundTerrain {
                    cell: CellCoord::new(column, row),
                    terrain,
                });
            }
        }
    }

    Ok(commands)
}

fn compile_script<F>(
    mut steps: Vec<ScriptStep>,
    tile_set: &TileSet,
    bounds: Bounds,
    layers: &BTreeSet<u8>,
    kind_declared: F,
) -> Result<BTreeMap<u64, Vec<ScriptCommand>>>
where
    F: Fn(&str) -> bool,
{
    steps.sort_by_key(|step| step.tick);

    let layer_known = |layer: u8| -> Result<LayerIndex> {
        ensure!(
            layer == 0 || layers.contains(&layer),
            "layer {layer} is not declared"
        );
        Ok(LayerIndex::new(layer))
    };

    let mut spawned = BTreeSet::new();
    let mut alive = BTreeSet::new();
    let mut script: BTreeMap<u64, Vec<ScriptCommand>> = BTreeMap::new();
    for step in steps {
        let command = match step.action {
            ScriptAction::Spawn {
                entity,
                kind,
                at,
                layer,
            } => {
                ensure!(kind_declared(&kind), "entity `{entity}` uses undeclared kind `{kind}`");
                ensure!(
                    spawned.insert(entity.clone()),
                    "entity `{entity}` is spawned more than once"
                );
                let _ = alive.insert(entity.clone());
                ScriptCommand::Spawn {
                    name: entity,
                    kind: EntityKind::new(kind),
                    location: Location::new(CellCoord::new(at[0], at[1]), layer_known(layer)?),
                }
            }
            ScriptAction::Move { entity, at, layer } => {
                ensure!(
                    alive.contains(&entity),
                    "tick {}: entity `{entity}` is not alive",
                    step.tick
                );
                ScriptCommand::Move {
                    name: entity,
                    location: Location::new(CellCoord::new(at[0], at[1]), layer_known(layer)?),
                }
            }
            ScriptAction::Despawn { entity } => {
                ensure!(
                    alive.remove(&entity),
                    "tick {}: entity `{entity}` is not alive",
                    step.tick
                );
                ScriptCommand::Despawn { name: entity }
            }
            ScriptAction::Paint { at, terrain } => ScriptCommand::World(Command::SetGroundTerrain {
                cell: bounds.cell(at)?,
                terrain: terrain_index(tile_set, &terrain)?,
            }),
            ScriptAction::PaintLayer { layer, at, terrain } => {
                ensure!(layer != 0, "paint-layer targets the ground; use paint instead");
                ScriptCommand::World(Command::SetLayerTerrain {
                    layer: layer_known(layer)?,
                    cell: bounds.cell(at)?,
                    terrain: terrain_index(tile_set, &terrain)?,
                })
            }
        };
        script.entry(step.tick).or_default().push(command);
    }

    Ok(script)
}

#[derive(Clone, Copy, Debug)]
struct Bounds {
    columns: u32,
    rows: u32,
}

impl Bounds {
    fn cell(self, at: [i32; 2]) -> Result<CellCoord> {
        let [column, row] = at;
        let inside = u32::try_from(column).is_ok_and(|column| column < self.columns)
            && u32::try_from(row).is_ok_and(|row| row < self.rows);
        ensure!(
            inside,
            "cell ({column}, {row}) lies outside the {}x{} map",
            self.columns,
            self.rows
        );
        Ok(CellCoord::new(column, row))
    }
}

fn terrain_index(tile_set: &TileSet, name: &str) -> Result<TerrainIndex> {
    tile_set
        .index_of(name)
        .with_context(|| format!("terrain `{name}` is not part of the tile-set"))
}
