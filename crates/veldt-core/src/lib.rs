//! Core types for the Veldt predator-prey simulation.
//!
//! The world advances through a fixed stage pipeline each tick: controller
//! decisions, action application, integration, index rebuild, capture
//! resolution, energy accounting, death cleanup, sensing, and breeding.
//! `World::step` is the only mutating entry point.

use ordered_float::OrderedFloat;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SecondaryMap, SlotMap};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use thiserror::Error;
use veldt_index::{ProximityIndex, QuadTree};

pub use veldt_index::TreeParams;

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

/// Convenience alias for associating side data with agents.
pub type AgentMap<T> = SecondaryMap<AgentId, T>;

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

fn wrap_signed_angle(mut angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// Monotonic tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Monotonic per-world agent number. Serials are never reused, which makes
/// them the basis for every deterministic ordering in the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct AgentSerial(pub u64);

/// Which side of the predator-prey split an agent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Hunter,
    Prey,
}

impl AgentKind {
    /// Single-letter prefix used in external entity ids.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Hunter => "h",
            Self::Prey => "p",
        }
    }

    /// Lowercase label used in the interchange schema.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hunter => "hunter",
            Self::Prey => "prey",
        }
    }

    /// Parse an interchange label, returning `None` for unknown kinds.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "hunter" => Some(Self::Hunter),
            "prey" => Some(Self::Prey),
            _ => None,
        }
    }
}

/// Scalar state carried by every live agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub serial: AgentSerial,
    pub kind: AgentKind,
    pub x: f32,
    pub y: f32,
    /// Heading in radians, wrapped to `(-pi, pi]`.
    pub heading: f32,
    pub speed: f32,
    /// Turn rate in radians per second.
    pub angular_velocity: f32,
    pub radius: f32,
    /// Field of view in degrees; seeded from the kind's tuning block but
    /// carried per agent so imported overrides persist.
    pub fov_deg: f32,
    pub view_distance: f32,
    pub energy: f32,
    /// Lifetime in simulated seconds.
    pub age: f32,
    pub generation: u32,
    pub offspring: u32,
    pub captures: u32,
    /// Seconds remaining before this hunter can capture again.
    pub digestion: f32,
    /// Seconds remaining before this agent can breed again.
    pub breed_cooldown: f32,
}

impl Agent {
    /// Stable external id of the form `h_000001` / `p_000042`.
    #[must_use]
    pub fn external_id(&self) -> String {
        format!("{}_{:06}", self.kind.prefix(), self.serial.0)
    }
}

/// One neighbor visible to an agent this tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeenAgent {
    pub serial: AgentSerial,
    pub kind: AgentKind,
    pub distance: f32,
    /// Signed bearing relative to the observer's heading, in radians.
    pub bearing: f32,
}

/// Per-agent sensing output, split by kind and sorted nearest-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Perception {
    pub visible_hunters: Vec<SeenAgent>,
    pub visible_prey: Vec<SeenAgent>,
}

impl Perception {
    /// Nearest visible agent of `kind`, if any.
    #[must_use]
    pub fn nearest(&self, kind: AgentKind) -> Option<&SeenAgent> {
        match kind {
            AgentKind::Hunter => self.visible_hunters.first(),
            AgentKind::Prey => self.visible_prey.first(),
        }
    }
}

/// Normalized control input for one agent over one tick.
///
/// Both components are clamped to `[-1, 1]` and scaled by the per-kind
/// delta maxima before application. Non-finite values are treated as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionInput {
    pub speed_delta: f32,
    pub angular_delta: f32,
}

/// Read-only view handed to controllers when they decide an action.
#[derive(Debug)]
pub struct AgentView<'a> {
    pub agent: &'a Agent,
    pub perception: &'a Perception,
    pub dt: f32,
}

/// Decision logic attached to agents. Controllers run sequentially in dense
/// arena order, so any internal randomness stays reproducible.
pub trait Controller: Send + Sync {
    /// Static identifier of the controller implementation.
    fn kind(&self) -> &'static str;

    /// Produce the action for one agent this tick.
    fn decide(&mut self, view: &AgentView<'_>) -> ActionInput;
}

/// Registry owning controllers keyed by opaque handles.
#[derive(Default)]
pub struct ControllerRegistry {
    next_key: u64,
    entries: HashMap<u64, Box<dyn Controller>>,
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl ControllerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a controller, returning its key.
    pub fn register(&mut self, controller: Box<dyn Controller>) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        self.entries.insert(key, controller);
        key
    }

    /// Remove a controller by key.
    pub fn unregister(&mut self, key: u64) -> Option<Box<dyn Controller>> {
        self.entries.remove(&key)
    }

    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    #[must_use]
    pub fn kind(&self, key: u64) -> Option<&'static str> {
        self.entries.get(&key).map(|entry| entry.kind())
    }

    fn get_mut(&mut self, key: u64) -> Option<&mut Box<dyn Controller>> {
        self.entries.get_mut(&key)
    }
}

/// Dense agent storage with generational handles and serial lookup.
#[derive(Debug, Default)]
pub struct Arena {
    slots: SlotMap<AgentId, usize>,
    handles: Vec<AgentId>,
    rows: Vec<Agent>,
    by_serial: HashMap<u64, AgentId>,
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over live handles in dense order.
    pub fn iter_handles(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.handles.iter().copied()
    }

    #[must_use]
    pub fn rows(&self) -> &[Agent] {
        &self.rows
    }

    #[must_use]
    pub fn rows_mut(&mut self) -> &mut [Agent] {
        &mut self.rows
    }

    /// Dense index for `id`, if live.
    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    /// Borrow the row for `id`.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.index_of(id).map(|idx| &self.rows[idx])
    }

    /// Mutably borrow the row for `id`.
    #[must_use]
    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        let idx = self.index_of(id)?;
        Some(&mut self.rows[idx])
    }

    /// Handle for a serial, if that agent is live.
    #[must_use]
    pub fn lookup_serial(&self, serial: AgentSerial) -> Option<AgentId> {
        self.by_serial.get(&serial.0).copied()
    }

    /// Row for a raw serial number, if that agent is live.
    #[must_use]
    pub fn row_by_serial(&self, serial: u64) -> Option<&Agent> {
        let id = *self.by_serial.get(&serial)?;
        self.get(id)
    }

    /// Insert a new agent and return its handle.
    pub fn insert(&mut self, agent: Agent) -> AgentId {
        let index = self.rows.len();
        let serial = agent.serial.0;
        self.rows.push(agent);
        let id = self.slots.insert(index);
        self.handles.push(id);
        self.by_serial.insert(serial, id);
        id
    }

    /// Remove `id`, returning its row if it was present.
    pub fn remove(&mut self, id: AgentId) -> Option<Agent> {
        let index = self.slots.remove(id)?;
        let removed = self.rows.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        self.by_serial.remove(&removed.serial.0);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        Some(removed)
    }

    /// Remove all agents whose ids are in `dead`, preserving dense order.
    pub fn remove_many(&mut self, dead: &HashSet<AgentId>) -> usize {
        if dead.is_empty() {
            return 0;
        }
        let mut write = 0;
        for read in 0..self.handles.len() {
            let id = self.handles[read];
            if dead.contains(&id) {
                self.by_serial.remove(&self.rows[read].serial.0);
                self.slots.remove(id);
                continue;
            }
            if write != read {
                self.handles[write] = id;
                self.rows[write] = self.rows[read];
            }
            if let Some(slot) = self.slots.get_mut(id) {
                *slot = write;
            }
            write += 1;
        }
        let removed = self.handles.len().saturating_sub(write);
        self.handles.truncate(write);
        self.rows.truncate(write);
        removed
    }

    /// Clear all stored agents.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.handles.clear();
        self.rows.clear();
        self.by_serial.clear();
    }
}

/// Errors that can occur when constructing a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Spatial index construction failed.
    #[error(transparent)]
    Index(#[from] veldt_index::IndexError),
    /// The worker pool could not be built.
    #[error("worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Tuning for one agent kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KindParams {
    pub speed_min: f32,
    pub speed_max: f32,
    /// Magnitude bound on the turn rate, in radians per second.
    pub angular_velocity_max: f32,
    /// Maximum speed change per second at full input.
    pub speed_delta_max: f32,
    /// Maximum turn-rate change per second at full input, in radians.
    pub angular_delta_max: f32,
    /// Field of view in degrees, centered on the heading.
    pub fov_deg: f32,
    pub view_distance: f32,
    pub radius: f32,
    /// Baseline energy drain per second.
    pub metabolism: f32,
    pub energy_start: f32,
    pub energy_max: f32,
    /// Energy level at which the agent splits.
    pub split_energy: f32,
    /// Seconds between splits.
    pub breed_cooldown: f32,
}

impl KindParams {
    /// Defaults for the hunter side: a narrow, short-range cone and a high
    /// metabolism paid back through captures.
    #[must_use]
    pub fn hunter_defaults() -> Self {
        Self {
            speed_min: 0.0,
            speed_max: 180.0,
            angular_velocity_max: 3.0,
            speed_delta_max: 120.0,
            angular_delta_max: 3.5,
            fov_deg: 70.0,
            view_distance: 150.0,
            radius: 11.0,
            metabolism: 2.5,
            energy_start: 100.0,
            energy_max: 220.0,
            split_energy: 150.0,
            breed_cooldown: 12.0,
        }
    }

    /// Defaults for the prey side: near-panoramic vision and fast breeding.
    #[must_use]
    pub fn prey_defaults() -> Self {
        Self {
            speed_min: 0.0,
            speed_max: 150.0,
            angular_velocity_max: 4.0,
            speed_delta_max: 140.0,
            angular_delta_max: 4.5,
            fov_deg: 300.0,
            view_distance: 280.0,
            radius: 7.0,
            metabolism: 1.2,
            energy_start: 80.0,
            energy_max: 160.0,
            split_energy: 120.0,
            breed_cooldown: 2.0,
        }
    }

    fn validate(&self) -> Result<(), WorldError> {
        if !(self.speed_min >= 0.0 && self.speed_max >= self.speed_min) {
            return Err(WorldError::InvalidConfig(
                "speed bounds must satisfy 0 <= min <= max",
            ));
        }
        if self.angular_velocity_max < 0.0 {
            return Err(WorldError::InvalidConfig(
                "angular_velocity_max must be non-negative",
            ));
        }
        if self.speed_delta_max < 0.0 || self.angular_delta_max < 0.0 {
            return Err(WorldError::InvalidConfig(
                "action delta maxima must be non-negative",
            ));
        }
        if !(self.fov_deg > 0.0 && self.fov_deg <= 360.0) {
            return Err(WorldError::InvalidConfig("fov_deg must be in (0, 360]"));
        }
        if self.view_distance <= 0.0 {
            return Err(WorldError::InvalidConfig("view_distance must be positive"));
        }
        if self.radius <= 0.0 {
            return Err(WorldError::InvalidConfig("radius must be positive"));
        }
        if self.metabolism < 0.0 {
            return Err(WorldError::InvalidConfig("metabolism must be non-negative"));
        }
        if self.energy_max <= 0.0
            || self.energy_start <= 0.0
            || self.energy_start > self.energy_max
        {
            return Err(WorldError::InvalidConfig(
                "energy_start must be in (0, energy_max]",
            ));
        }
        if self.split_energy <= 0.0 || self.breed_cooldown < 0.0 {
            return Err(WorldError::InvalidConfig(
                "split_energy must be positive and breed_cooldown non-negative",
            ));
        }
        Ok(())
    }
}

/// Static configuration for a Veldt world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub world_width: f32,
    pub world_height: f32,
    /// Fixed timestep in seconds.
    pub dt: f32,
    /// Hard population cap; spawns beyond it are rejected and counted.
    pub max_agents: usize,
    /// Multiplicative per-tick speed retention, in `(0, 1]`.
    pub friction: f32,
    /// Multiplicative per-tick turn-rate retention, in `(0, 1]`.
    pub angular_friction: f32,
    /// A hunter captures any prey whose center is within this distance.
    pub capture_radius: f32,
    /// Energy credited to a hunter per capture, after that tick's decay.
    pub capture_gain: f32,
    /// Seconds a hunter spends digesting after a capture.
    pub digestion_duration: f32,
    /// Energy cost per unit of speed per second.
    pub move_cost: f32,
    /// Energy cost per radian-per-second of turn rate, per second.
    pub turn_cost: f32,
    /// Upper bound on each per-kind visible list.
    pub max_visible: usize,
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Worker threads for query fan-out; 0 selects the core count.
    pub worker_threads: usize,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
    pub index: TreeParams,
    pub hunter: KindParams,
    pub prey: KindParams,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_width: 1_200.0,
            world_height: 800.0,
            dt: 1.0 / 60.0,
            max_agents: 240,
            friction: 0.96,
            angular_friction: 0.9,
            capture_radius: 12.0,
            capture_gain: 45.0,
            digestion_duration: 3.5,
            move_cost: 0.02,
            turn_cost: 0.8,
            max_visible: 12,
            rng_seed: None,
            worker_threads: 0,
            history_capacity: 256,
            index: TreeParams::default(),
            hunter: KindParams::hunter_defaults(),
            prey: KindParams::prey_defaults(),
        }
    }
}

impl WorldConfig {
    /// Validate the configuration, rejecting values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), WorldError> {
        if !(self.world_width > 0.0 && self.world_width.is_finite())
            || !(self.world_height > 0.0 && self.world_height.is_finite())
        {
            return Err(WorldError::InvalidConfig(
                "world dimensions must be positive and finite",
            ));
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(WorldError::InvalidConfig("dt must be positive and finite"));
        }
        if self.max_agents == 0 {
            return Err(WorldError::InvalidConfig("max_agents must be non-zero"));
        }
        if !(self.friction > 0.0 && self.friction <= 1.0)
            || !(self.angular_friction > 0.0 && self.angular_friction <= 1.0)
        {
            return Err(WorldError::InvalidConfig(
                "friction coefficients must be in (0, 1]",
            ));
        }
        if self.capture_radius <= 0.0 {
            return Err(WorldError::InvalidConfig("capture_radius must be positive"));
        }
        if self.capture_gain < 0.0 || self.digestion_duration < 0.0 {
            return Err(WorldError::InvalidConfig(
                "capture_gain and digestion_duration must be non-negative",
            ));
        }
        if self.move_cost < 0.0 || self.turn_cost < 0.0 {
            return Err(WorldError::InvalidConfig(
                "energy costs must be non-negative",
            ));
        }
        if self.max_visible == 0 {
            return Err(WorldError::InvalidConfig("max_visible must be non-zero"));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        self.hunter.validate()?;
        self.prey.validate()?;
        let half_extent = self.world_width.min(self.world_height) * 0.5;
        if self.hunter.radius >= half_extent || self.prey.radius >= half_extent {
            return Err(WorldError::InvalidConfig(
                "agent radii must fit inside the world",
            ));
        }
        Ok(())
    }

    /// Per-kind tuning block for `kind`.
    #[must_use]
    pub fn kind_params(&self, kind: AgentKind) -> &KindParams {
        match kind {
            AgentKind::Hunter => &self.hunter,
            AgentKind::Prey => &self.prey,
        }
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Why an agent left the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DespawnCause {
    Starved,
    Captured,
}

/// Discrete events emitted during a tick, identified by external ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorldEvent {
    Capture {
        hunter: String,
        prey: String,
        /// Energy actually credited to the hunter, after the cap clamp.
        energy_gain: f32,
    },
    Spawn {
        parent: String,
        child: ChildDescriptor,
    },
    Despawn {
        agent: String,
        cause: DespawnCause,
    },
}

/// Initial state of a newly spawned agent, embedded in spawn events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildDescriptor {
    pub id: String,
    pub kind: AgentKind,
    pub x: f32,
    pub y: f32,
    pub heading: f32,
    pub radius: f32,
}

/// Aggregate counters accumulated over the life of a world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldCounters {
    pub captures: u64,
    pub spawns: u64,
    pub despawns: u64,
    pub starvations: u64,
    /// Spawns refused because the population cap was reached.
    pub rejected_spawns: u64,
    /// Snapshot records dropped on import for missing required fields.
    pub dropped_records: u64,
}

/// Per-tick population summary retained in the world history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Tick,
    pub hunters: usize,
    pub prey: usize,
    pub captures: usize,
    pub spawns: usize,
    pub deaths: usize,
    pub mean_energy: f32,
}

/// One entity in the interchange schema. Every field is optional on the
/// wire; export fills them all, import defaults the rest and drops records
/// missing `id`, `kind`, or a finite position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angular_velocity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fov_degrees: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_distance: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offspring: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captures: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digestion: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed_cooldown: Option<f32>,
}

impl EntityRecord {
    fn from_agent(agent: &Agent) -> Self {
        Self {
            id: Some(agent.external_id()),
            kind: Some(agent.kind.label().to_string()),
            x: Some(agent.x),
            y: Some(agent.y),
            heading: Some(agent.heading),
            speed: Some(agent.speed),
            angular_velocity: Some(agent.angular_velocity),
            radius: Some(agent.radius),
            fov_degrees: Some(agent.fov_deg),
            view_distance: Some(agent.view_distance),
            energy: Some(agent.energy),
            age: Some(agent.age),
            generation: Some(agent.generation),
            offspring: Some(agent.offspring),
            captures: Some(agent.captures),
            digestion: Some(agent.digestion),
            breed_cooldown: Some(agent.breed_cooldown),
        }
    }
}

/// Full interchange snapshot of a world at one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub entities: Vec<EntityRecord>,
    /// Events emitted by the most recent tick.
    #[serde(default)]
    pub events: Vec<WorldEvent>,
    #[serde(default)]
    pub counters: WorldCounters,
}

/// Parse the numeric part of an external id such as `h_000123`.
fn parse_external_serial(id: &str) -> Option<u64> {
    let (_, digits) = id.split_once('_')?;
    digits.parse().ok()
}

/// The simulation world. All mutation happens through `step`.
pub struct World {
    config: WorldConfig,
    tick: Tick,
    rng: SmallRng,
    agents: Arena,
    perception: AgentMap<Perception>,
    actions: AgentMap<ActionInput>,
    controllers: ControllerRegistry,
    bindings: AgentMap<u64>,
    index: QuadTree,
    pool: rayon::ThreadPool,
    next_serial: u64,
    pending_deaths: Vec<(AgentId, DespawnCause)>,
    /// Hunters owed a capture credit, with the index of their capture event
    /// so the recorded gain can reflect the energy-cap clamp.
    pending_gains: Vec<(AgentId, usize)>,
    points_scratch: Vec<(u64, f32, f32)>,
    events: Vec<WorldEvent>,
    counters: WorldCounters,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("agent_count", &self.agents.len())
            .field("counters", &self.counters)
            .finish()
    }
}

impl World {
    /// Instantiate an empty world from the supplied configuration.
    pub fn new(config: WorldConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let index = QuadTree::new(config.world_width, config.world_height, config.index)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .build()?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            agents: Arena::new(),
            perception: AgentMap::new(),
            actions: AgentMap::new(),
            controllers: ControllerRegistry::new(),
            bindings: AgentMap::new(),
            index,
            pool,
            next_serial: 0,
            pending_deaths: Vec::new(),
            pending_gains: Vec::new(),
            points_scratch: Vec::new(),
            events: Vec::new(),
            counters: WorldCounters::default(),
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Instantiate a world and seed it with `n_hunters` and `n_prey` agents
    /// at random positions.
    pub fn initialize(
        n_hunters: usize,
        n_prey: usize,
        config: WorldConfig,
    ) -> Result<Self, WorldError> {
        if n_hunters + n_prey > config.max_agents {
            return Err(WorldError::InvalidConfig(
                "initial population exceeds max_agents",
            ));
        }
        let mut world = Self::new(config)?;
        for _ in 0..n_hunters {
            world.spawn_random(AgentKind::Hunter);
        }
        for _ in 0..n_prey {
            world.spawn_random(AgentKind::Prey);
        }
        Ok(world)
    }

    /// Restore a world from an interchange snapshot. Records missing
    /// required fields are dropped and counted, never fatal.
    pub fn from_snapshot(config: WorldConfig, snapshot: &WorldSnapshot) -> Result<Self, WorldError> {
        let mut world = Self::new(config)?;
        world.tick = Tick(snapshot.tick);
        world.counters = snapshot.counters;
        let dropped = world.import_entities(&snapshot.entities);
        world.counters.dropped_records += dropped as u64;
        Ok(world)
    }

    fn next_serial(&mut self) -> AgentSerial {
        self.next_serial += 1;
        AgentSerial(self.next_serial)
    }

    fn spawn_random(&mut self, kind: AgentKind) -> AgentId {
        let params = *self.config.kind_params(kind);
        let margin = params.radius;
        let x = self.rng.random_range(margin..self.config.world_width - margin);
        let y = self
            .rng
            .random_range(margin..self.config.world_height - margin);
        let heading = self.rng.random_range(-HALF_TURN..HALF_TURN);
        // Half throttle at most, but never below the kind's speed floor.
        let speed_cap = (params.speed_max * 0.5).max(params.speed_min);
        let speed = self.rng.random_range(params.speed_min..=speed_cap);
        let agent = Agent {
            serial: self.next_serial(),
            kind,
            x,
            y,
            heading,
            speed,
            angular_velocity: 0.0,
            radius: params.radius,
            fov_deg: params.fov_deg,
            view_distance: params.view_distance,
            energy: params.energy_start,
            age: 0.0,
            generation: 0,
            offspring: 0,
            captures: 0,
            digestion: 0.0,
            breed_cooldown: 0.0,
        };
        self.agents.insert(agent)
    }

    /// Spawn one agent of `kind` at `(x, y)`, clamped inside the world.
    /// Returns `None` when the population cap is already reached; the
    /// rejection is counted, never surfaced as an error.
    pub fn spawn_agent(&mut self, kind: AgentKind, x: f32, y: f32) -> Option<AgentId> {
        if self.agents.len() >= self.config.max_agents {
            self.counters.rejected_spawns += 1;
            return None;
        }
        let params = *self.config.kind_params(kind);
        let margin = params.radius;
        let agent = Agent {
            serial: self.next_serial(),
            kind,
            x: x.clamp(margin, self.config.world_width - margin),
            y: y.clamp(margin, self.config.world_height - margin),
            heading: 0.0,
            speed: 0.0,
            angular_velocity: 0.0,
            radius: params.radius,
            fov_deg: params.fov_deg,
            view_distance: params.view_distance,
            energy: params.energy_start,
            age: 0.0,
            generation: 0,
            offspring: 0,
            captures: 0,
            digestion: 0.0,
            breed_cooldown: 0.0,
        };
        Some(self.agents.insert(agent))
    }

    fn import_entity(&mut self, record: &EntityRecord) -> Option<AgentId> {
        let id = record.id.as_deref()?;
        let kind = record.kind.as_deref().and_then(AgentKind::from_label)?;
        let x = record.x.filter(|v| v.is_finite())?;
        let y = record.y.filter(|v| v.is_finite())?;

        let serial = match parse_external_serial(id) {
            Some(serial) if !self.agents.by_serial.contains_key(&serial) => {
                self.next_serial = self.next_serial.max(serial);
                AgentSerial(serial)
            }
            _ => self.next_serial(),
        };

        let params = *self.config.kind_params(kind);
        let radius = record
            .radius
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(params.radius);
        let margin = radius.min(self.config.world_width.min(self.config.world_height) * 0.5);
        let agent = Agent {
            serial,
            kind,
            x: x.clamp(margin, self.config.world_width - margin),
            y: y.clamp(margin, self.config.world_height - margin),
            heading: wrap_signed_angle(record.heading.filter(|v| v.is_finite()).unwrap_or(0.0)),
            speed: record
                .speed
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
                .clamp(params.speed_min, params.speed_max),
            angular_velocity: record
                .angular_velocity
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
                .clamp(-params.angular_velocity_max, params.angular_velocity_max),
            radius,
            fov_deg: record
                .fov_degrees
                .filter(|v| v.is_finite() && *v > 0.0 && *v <= 360.0)
                .unwrap_or(params.fov_deg),
            view_distance: record
                .view_distance
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(params.view_distance),
            energy: record
                .energy
                .filter(|v| v.is_finite())
                .unwrap_or(params.energy_start)
                .clamp(0.0, params.energy_max),
            age: record.age.filter(|v| v.is_finite()).unwrap_or(0.0).max(0.0),
            generation: record.generation.unwrap_or(0),
            offspring: record.offspring.unwrap_or(0),
            captures: record.captures.unwrap_or(0),
            digestion: record
                .digestion
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
                .max(0.0),
            breed_cooldown: record
                .breed_cooldown
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
                .max(0.0),
        };
        Some(self.agents.insert(agent))
    }

    /// Import entity records, returning the number dropped as malformed.
    /// Records past the population cap are rejected and counted, like any
    /// other spawn at capacity.
    pub fn import_entities(&mut self, records: &[EntityRecord]) -> usize {
        let mut dropped = 0;
        for record in records {
            if self.agents.len() >= self.config.max_agents {
                self.counters.rejected_spawns += 1;
                continue;
            }
            if self.import_entity(record).is_none() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Register a controller, returning its key.
    pub fn register_controller(&mut self, controller: Box<dyn Controller>) -> u64 {
        self.controllers.register(controller)
    }

    /// Bind a registered controller to one agent. Returns `true` on success.
    pub fn bind_controller(&mut self, id: AgentId, key: u64) -> bool {
        if !self.agents.contains(id) || !self.controllers.contains(key) {
            return false;
        }
        self.bindings.insert(id, key);
        true
    }

    /// Bind a registered controller to every current agent of `kind`.
    /// Children spawned later inherit their parent's binding.
    pub fn bind_kind(&mut self, kind: AgentKind, key: u64) -> usize {
        if !self.controllers.contains(key) {
            return 0;
        }
        let targets: Vec<AgentId> = self
            .agents
            .iter_handles()
            .zip(self.agents.rows().iter())
            .filter(|(_, row)| row.kind == kind)
            .map(|(id, _)| id)
            .collect();
        let bound = targets.len();
        for id in targets {
            self.bindings.insert(id, key);
        }
        bound
    }

    fn stage_decide(&mut self) {
        let dt = self.config.dt;
        let empty = Perception::default();
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        for id in handles {
            let Some(&key) = self.bindings.get(id) else {
                continue;
            };
            let Some(row) = self.agents.get(id).copied() else {
                continue;
            };
            let seen = self.perception.get(id).unwrap_or(&empty);
            let view = AgentView {
                agent: &row,
                perception: seen,
                dt,
            };
            if let Some(controller) = self.controllers.get_mut(key) {
                let action = controller.decide(&view);
                self.actions.insert(id, action);
            }
        }
    }

    fn sanitize(value: f32) -> f32 {
        if value.is_finite() {
            value.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    fn stage_actions(&mut self) {
        let dt = self.config.dt;
        let hunter = self.config.hunter;
        let prey = self.config.prey;
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        for (idx, id) in handles.into_iter().enumerate() {
            let action = self.actions.get(id).copied().unwrap_or_default();
            let row = &mut self.agents.rows[idx];
            let params = match row.kind {
                AgentKind::Hunter => &hunter,
                AgentKind::Prey => &prey,
            };
            row.angular_velocity = (row.angular_velocity
                + Self::sanitize(action.angular_delta) * params.angular_delta_max * dt)
                .clamp(-params.angular_velocity_max, params.angular_velocity_max);
            row.speed = (row.speed
                + Self::sanitize(action.speed_delta) * params.speed_delta_max * dt)
                .clamp(params.speed_min, params.speed_max);
        }
    }

    fn stage_physics(&mut self) {
        let dt = self.config.dt;
        let width = self.config.world_width;
        let height = self.config.world_height;
        let friction = self.config.friction;
        let angular_friction = self.config.angular_friction;
        let hunter = self.config.hunter;
        let prey = self.config.prey;
        for row in self.agents.rows_mut() {
            let params = match row.kind {
                AgentKind::Hunter => &hunter,
                AgentKind::Prey => &prey,
            };
            row.heading = wrap_signed_angle(row.heading + row.angular_velocity * dt);
            row.x += row.heading.cos() * row.speed * dt;
            row.y += row.heading.sin() * row.speed * dt;
            row.speed = (row.speed * friction).clamp(params.speed_min, params.speed_max);
            row.angular_velocity *= angular_friction;

            // Reflect off walls with a margin of one body radius.
            let margin = row.radius;
            if row.x < margin {
                row.x = margin;
                row.heading = HALF_TURN - row.heading;
            } else if row.x > width - margin {
                row.x = width - margin;
                row.heading = HALF_TURN - row.heading;
            }
            if row.y < margin {
                row.y = margin;
                row.heading = -row.heading;
            } else if row.y > height - margin {
                row.y = height - margin;
                row.heading = -row.heading;
            }
            row.heading = wrap_signed_angle(row.heading);

            row.age += dt;
            row.digestion = (row.digestion - dt).max(0.0);
            row.breed_cooldown = (row.breed_cooldown - dt).max(0.0);
        }
    }

    fn stage_index(&mut self) {
        self.points_scratch.clear();
        self.points_scratch
            .extend(self.agents.rows().iter().map(|r| (r.serial.0, r.x, r.y)));
        // Rebuild over a fixed world rectangle cannot fail once constructed.
        let _ = self.index.rebuild(&self.points_scratch);
    }

    fn stage_captures(&mut self) {
        let radius = self.config.capture_radius;
        let probes: Vec<(AgentSerial, AgentId, f32, f32)> = self
            .agents
            .iter_handles()
            .zip(self.agents.rows().iter())
            .filter(|(_, row)| row.kind == AgentKind::Hunter && row.digestion <= 0.0)
            .map(|(id, row)| (row.serial, id, row.x, row.y))
            .collect();
        if probes.is_empty() {
            return;
        }

        let arena = &self.agents;
        let index = &self.index;
        let mut candidate_sets: Vec<(AgentSerial, AgentId, Vec<(OrderedFloat<f32>, AgentSerial)>)> =
            self.pool.install(|| {
                probes
                    .par_iter()
                    .map(|&(serial, id, x, y)| {
                        let mut candidates = Vec::new();
                        index.for_each_in_circle(x, y, radius, &mut |other, dist_sq| {
                            if other == serial.0 {
                                return;
                            }
                            if let Some(row) = arena.row_by_serial(other) {
                                if row.kind == AgentKind::Prey {
                                    candidates.push((dist_sq, AgentSerial(other)));
                                }
                            }
                        });
                        candidates.sort_unstable();
                        (serial, id, candidates)
                    })
                    .collect()
            });

        // Lowest-serial hunter wins a contested prey; a losing hunter falls
        // through to its next-nearest candidate.
        candidate_sets.sort_by_key(|entry| entry.0);
        let duration = self.config.digestion_duration;
        let mut captured: HashSet<AgentSerial> = HashSet::new();
        for (_, hunter_id, candidates) in candidate_sets {
            for (_, prey_serial) in candidates {
                if captured.contains(&prey_serial) {
                    continue;
                }
                let Some(prey_id) = self.agents.lookup_serial(prey_serial) else {
                    continue;
                };
                captured.insert(prey_serial);
                let mut hunter_label = String::new();
                if let Some(row) = self.agents.get_mut(hunter_id) {
                    row.digestion = duration;
                    row.captures += 1;
                    hunter_label = row.external_id();
                }
                let prey_label = self
                    .agents
                    .get(prey_id)
                    .map(Agent::external_id)
                    .unwrap_or_default();
                self.pending_gains.push((hunter_id, self.events.len()));
                self.pending_deaths.push((prey_id, DespawnCause::Captured));
                self.events.push(WorldEvent::Capture {
                    hunter: hunter_label,
                    prey: prey_label,
                    energy_gain: self.config.capture_gain,
                });
                self.counters.captures += 1;
                break;
            }
        }
    }

    fn stage_energy(&mut self) {
        let dt = self.config.dt;
        let move_cost = self.config.move_cost;
        let turn_cost = self.config.turn_cost;
        let hunter = self.config.hunter;
        let prey = self.config.prey;
        for row in self.agents.rows.iter_mut() {
            let params = match row.kind {
                AgentKind::Hunter => &hunter,
                AgentKind::Prey => &prey,
            };
            let decay = (params.metabolism
                + move_cost * row.speed
                + turn_cost * row.angular_velocity.abs())
                * dt;
            row.energy -= decay;
        }

        // Gains land after decay so a capture cannot mask the tick's costs.
        let gain = self.config.capture_gain;
        for (id, event_idx) in std::mem::take(&mut self.pending_gains) {
            let cap = self
                .agents
                .get(id)
                .map(|row| self.config.kind_params(row.kind).energy_max);
            if let Some(cap) = cap {
                if let Some(row) = self.agents.get_mut(id) {
                    let before = row.energy;
                    row.energy = (row.energy + gain).min(cap);
                    let credited = row.energy - before;
                    if let Some(WorldEvent::Capture { energy_gain, .. }) =
                        self.events.get_mut(event_idx)
                    {
                        *energy_gain = credited;
                    }
                }
            }
        }

        let mut starved = Vec::new();
        for (id, row) in self.agents.iter_handles().zip(self.agents.rows().iter()) {
            if row.energy <= 0.0 {
                starved.push(id);
            }
        }
        for id in starved {
            self.pending_deaths.push((id, DespawnCause::Starved));
        }
    }

    fn stage_death_cleanup(&mut self) -> usize {
        if self.pending_deaths.is_empty() {
            return 0;
        }
        let mut seen: HashSet<AgentId> = HashSet::new();
        let mut dead: HashSet<AgentId> = HashSet::new();
        let pending = std::mem::take(&mut self.pending_deaths);
        for (id, cause) in pending {
            if !seen.insert(id) {
                continue;
            }
            let Some(row) = self.agents.get(id) else {
                continue;
            };
            if cause == DespawnCause::Starved {
                self.counters.starvations += 1;
            }
            self.counters.despawns += 1;
            self.events.push(WorldEvent::Despawn {
                agent: row.external_id(),
                cause,
            });
            dead.insert(id);
        }
        let removed = self.agents.remove_many(&dead);
        for id in &dead {
            self.perception.remove(*id);
            self.actions.remove(*id);
            self.bindings.remove(*id);
        }
        removed
    }

    fn stage_sense(&mut self) {
        if self.agents.is_empty() {
            return;
        }
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        let arena = &self.agents;
        let index = &self.index;
        let config = &self.config;
        let results: Vec<Perception> = self.pool.install(|| {
            arena
                .rows()
                .par_iter()
                .map(|row| {
                    let half_fov = row.fov_deg.to_radians() * 0.5;
                    let mut seen: Vec<SeenAgent> = Vec::new();
                    index.for_each_in_circle(
                        row.x,
                        row.y,
                        row.view_distance,
                        &mut |other, dist_sq| {
                            if other == row.serial.0 {
                                return;
                            }
                            // Serials pruned mid-tick no longer resolve.
                            let Some(neighbor) = arena.row_by_serial(other) else {
                                return;
                            };
                            let bearing = wrap_signed_angle(
                                (neighbor.y - row.y).atan2(neighbor.x - row.x) - row.heading,
                            );
                            if bearing.abs() > half_fov {
                                return;
                            }
                            seen.push(SeenAgent {
                                serial: neighbor.serial,
                                kind: neighbor.kind,
                                distance: dist_sq.into_inner().sqrt(),
                                bearing,
                            });
                        },
                    );
                    seen.sort_by_key(|s| (OrderedFloat(s.distance), s.serial));
                    let mut perception = Perception::default();
                    for entry in seen {
                        let bucket = match entry.kind {
                            AgentKind::Hunter => &mut perception.visible_hunters,
                            AgentKind::Prey => &mut perception.visible_prey,
                        };
                        if bucket.len() < config.max_visible {
                            bucket.push(entry);
                        }
                    }
                    perception
                })
                .collect()
        });
        for (id, perception) in handles.into_iter().zip(results) {
            self.perception.insert(id, perception);
        }
    }

    fn stage_breeding(&mut self) {
        let max_agents = self.config.max_agents;
        let width = self.config.world_width;
        let height = self.config.world_height;
        let parents: Vec<(AgentId, Agent)> = self
            .agents
            .iter_handles()
            .zip(self.agents.rows().iter())
            .filter(|(_, row)| {
                let params = self.config.kind_params(row.kind);
                row.energy >= params.split_energy && row.breed_cooldown <= 0.0
            })
            .map(|(id, row)| (id, *row))
            .collect();

        for (parent_id, parent) in parents {
            let params = *self.config.kind_params(parent.kind);
            if self.agents.len() >= max_agents {
                self.counters.rejected_spawns += 1;
                if let Some(row) = self.agents.get_mut(parent_id) {
                    row.breed_cooldown = params.breed_cooldown;
                }
                continue;
            }

            let angle = self.rng.random_range(-HALF_TURN..HALF_TURN);
            let offset = parent.radius * 1.5;
            let heading = wrap_signed_angle(parent.heading + self.rng.random_range(-0.5..0.5));
            let speed = (parent.speed * self.rng.random_range(0.9..1.1))
                .clamp(params.speed_min, params.speed_max);
            let radius = (parent.radius * self.rng.random_range(0.9..1.1))
                .clamp(params.radius * 0.5, params.radius * 1.5);

            let parent_label;
            if let Some(row) = self.agents.get_mut(parent_id) {
                row.energy *= 0.5;
                row.breed_cooldown = params.breed_cooldown;
                row.offspring += 1;
                parent_label = row.external_id();
            } else {
                continue;
            }

            let child = Agent {
                serial: self.next_serial(),
                kind: parent.kind,
                x: (parent.x + angle.cos() * offset).clamp(radius, width - radius),
                y: (parent.y + angle.sin() * offset).clamp(radius, height - radius),
                heading,
                speed,
                angular_velocity: 0.0,
                radius,
                fov_deg: parent.fov_deg,
                view_distance: parent.view_distance,
                energy: parent.energy * 0.5,
                age: 0.0,
                generation: parent.generation + 1,
                offspring: 0,
                captures: 0,
                digestion: 0.0,
                breed_cooldown: params.breed_cooldown,
            };
            let descriptor = ChildDescriptor {
                id: child.external_id(),
                kind: child.kind,
                x: child.x,
                y: child.y,
                heading: child.heading,
                radius: child.radius,
            };
            let child_id = self.agents.insert(child);
            if let Some(&key) = self.bindings.get(parent_id) {
                self.bindings.insert(child_id, key);
            }
            self.events.push(WorldEvent::Spawn {
                parent: parent_label,
                child: descriptor,
            });
            self.counters.spawns += 1;
        }
    }

    fn step_inner(&mut self, decide: bool) -> TickSummary {
        self.events.clear();
        if decide {
            self.stage_decide();
        }
        self.stage_actions();
        self.stage_physics();
        self.stage_index();
        self.stage_captures();
        self.stage_energy();
        let deaths = self.stage_death_cleanup();
        self.stage_sense();
        self.stage_breeding();
        self.tick = self.tick.next();

        let mut hunters = 0;
        let mut prey = 0;
        let mut total_energy = 0.0;
        for row in self.agents.rows() {
            match row.kind {
                AgentKind::Hunter => hunters += 1,
                AgentKind::Prey => prey += 1,
            }
            total_energy += row.energy;
        }
        let count = self.agents.len();
        let summary = TickSummary {
            tick: self.tick,
            hunters,
            prey,
            captures: self
                .events
                .iter()
                .filter(|e| matches!(e, WorldEvent::Capture { .. }))
                .count(),
            spawns: self
                .events
                .iter()
                .filter(|e| matches!(e, WorldEvent::Spawn { .. }))
                .count(),
            deaths,
            mean_energy: if count > 0 {
                total_energy / count as f32
            } else {
                0.0
            },
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary.clone());
        summary
    }

    /// Advance one tick, letting bound controllers decide actions.
    pub fn step(&mut self) -> TickSummary {
        self.step_inner(true)
    }

    /// Advance one tick with externally supplied actions. Agents without an
    /// entry keep their previous command.
    pub fn step_with_actions(&mut self, actions: &[(AgentSerial, ActionInput)]) -> TickSummary {
        for (serial, action) in actions {
            if let Some(id) = self.agents.lookup_serial(*serial) {
                self.actions.insert(id, *action);
            }
        }
        self.step_inner(false)
    }

    /// Export the current world as an interchange snapshot.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick.0,
            entities: self.agents.rows().iter().map(EntityRecord::from_agent).collect(),
            events: self.events.clone(),
            counters: self.counters,
        }
    }

    /// Returns an immutable reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Read-only access to the agent arena.
    #[must_use]
    pub fn agents(&self) -> &Arena {
        &self.agents
    }

    /// Number of live agents.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// `(hunters, prey)` counts.
    #[must_use]
    pub fn population(&self) -> (usize, usize) {
        let mut hunters = 0;
        let mut prey = 0;
        for row in self.agents.rows() {
            match row.kind {
                AgentKind::Hunter => hunters += 1,
                AgentKind::Prey => prey += 1,
            }
        }
        (hunters, prey)
    }

    /// Row for a live serial.
    #[must_use]
    pub fn agent_by_serial(&self, serial: AgentSerial) -> Option<&Agent> {
        self.agents.row_by_serial(serial.0)
    }

    /// Last computed perception for an agent.
    #[must_use]
    pub fn perception_of(&self, id: AgentId) -> Option<&Perception> {
        self.perception.get(id)
    }

    /// Events emitted by the most recent tick.
    #[must_use]
    pub fn events(&self) -> &[WorldEvent] {
        &self.events
    }

    /// Aggregate counters since world creation.
    #[must_use]
    pub const fn counters(&self) -> &WorldCounters {
        &self.counters
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}

/// Steers hunters toward the nearest visible prey, wandering otherwise.
pub struct PursuitController {
    rng: SmallRng,
}

impl PursuitController {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Controller for PursuitController {
    fn kind(&self) -> &'static str {
        "pursuit"
    }

    fn decide(&mut self, view: &AgentView<'_>) -> ActionInput {
        if let Some(target) = view.perception.nearest(AgentKind::Prey) {
            ActionInput {
                speed_delta: 1.0,
                angular_delta: (target.bearing * 2.0 / HALF_TURN).clamp(-1.0, 1.0),
            }
        } else {
            ActionInput {
                speed_delta: 0.3,
                angular_delta: self.rng.random_range(-0.3..0.3),
            }
        }
    }
}

/// Steers prey away from the nearest visible hunter, grazing otherwise.
pub struct EvasionController {
    rng: SmallRng,
}

impl EvasionController {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Controller for EvasionController {
    fn kind(&self) -> &'static str {
        "evasion"
    }

    fn decide(&mut self, view: &AgentView<'_>) -> ActionInput {
        if let Some(threat) = view.perception.nearest(AgentKind::Hunter) {
            let flee = wrap_signed_angle(threat.bearing + HALF_TURN);
            ActionInput {
                speed_delta: 1.0,
                angular_delta: (flee * 2.0 / HALF_TURN).clamp(-1.0, 1.0),
            }
        } else {
            ActionInput {
                speed_delta: -0.2,
                angular_delta: self.rng.random_range(-0.2..0.2),
            }
        }
    }
}
