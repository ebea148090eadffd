//! Core engine for the Mirage synthetic detection overlay.
//!
//! The engine owns a population of fake tracked entities, advances them with a
//! clamped time delta, deconflicts their edge labels through a lane table, and
//! routes a leader line from each entity to its label. Every frame it emits a
//! [`FramePacket`] of positioned primitives; turning those into pixels is the
//! host renderer's job and is deliberately outside this crate.

use mirage_lanes::{LaneError, LaneTable, slot_offsets};
use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::{Key, SecondaryMap, SlotMap, new_key_type};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

pub use mirage_lanes::LaneLayout;

new_key_type! {
    /// Stable handle for tracked entities backed by a generational slot map.
    pub struct EntityId;
}

/// Convenience alias for associating side data with entities.
pub type EntityMap<T> = SecondaryMap<EntityId, T>;

/// Leader lines collapse to three points when the anchor and the label center
/// are already within this many pixels of level.
const LEADER_FLATTEN_EPSILON: f32 = 0.5;

/// Monotonic frame counter.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Axis-aligned 2D position in viewport pixels.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Velocity in pixels per second.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Velocity {
    pub vx: f32,
    pub vy: f32,
}

impl Velocity {
    /// Construct a new velocity vector.
    #[must_use]
    pub const fn new(vx: f32, vy: f32) -> Self {
        Self { vx, vy }
    }
}

/// Bounding-box extent in pixels.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Size {
    pub w: f32,
    pub h: f32,
}

impl Size {
    /// Construct a new extent.
    #[must_use]
    pub const fn new(w: f32, h: f32) -> Self {
        Self { w, h }
    }
}

/// A single vertex of a leader polyline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// Construct a new point.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Host viewport dimensions in integer pixels.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Construct a new viewport.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width as a float, for geometry math.
    #[must_use]
    pub fn fwidth(&self) -> f32 {
        self.width as f32
    }

    /// Height as a float, for geometry math.
    #[must_use]
    pub fn fheight(&self) -> f32 {
        self.height as f32
    }

    /// Total pixel area.
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width over height; zero for a degenerate viewport.
    #[must_use]
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Whether either dimension is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Which viewport gutter an entity's label prefers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Gutter matching the direction an entity is heading: movers toward the
    /// right edge label on the right, and vice versa.
    #[must_use]
    pub fn of_velocity(vx: f32) -> Self {
        if vx >= 0.0 { Self::Right } else { Self::Left }
    }
}

/// Boundary behaviour when an entity reaches the viewport edge, resolved once
/// at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Teleport to the far side once the box has fully left the viewport,
    /// offset outward by `margin` so re-entry looks seamless.
    Wrap { margin: f32 },
    /// Invert the offending velocity component and clamp inside the viewport.
    Bounce,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        Self::Wrap { margin: 100.0 }
    }
}

/// Shape profile for one class of fake detection. Ratios are relative to the
/// smaller viewport dimension; aspect is width over height.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassProfile {
    pub name: Cow<'static, str>,
    pub ratio_min: f32,
    pub ratio_max: f32,
    pub aspect_min: f32,
    pub aspect_max: f32,
}

impl ClassProfile {
    /// Construct a profile with explicit sample ranges.
    #[must_use]
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        ratio_min: f32,
        ratio_max: f32,
        aspect_min: f32,
        aspect_max: f32,
    ) -> Self {
        Self {
            name: name.into(),
            ratio_min,
            ratio_max,
            aspect_min,
            aspect_max,
        }
    }

    /// The stock vocabulary used by the overlay demos.
    #[must_use]
    pub fn standard_set() -> Vec<Self> {
        vec![
            Self::new("Car", 0.07, 0.13, 1.6, 2.4),
            Self::new("Human", 0.035, 0.07, 0.35, 0.55),
            Self::new("Cyclist", 0.05, 0.09, 0.6, 0.9),
            Self::new("Object", 0.04, 0.10, 0.8, 1.25),
        ]
    }
}

/// Scalar state for a single tracked entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EntityData {
    pub position: Position,
    pub size: Size,
    pub velocity: Velocity,
    /// Index into the configured class vocabulary.
    pub class_index: usize,
    pub confidence: f32,
    pub side: Side,
    /// Per-entity sway phase, derived from the entity id at insertion so the
    /// per-tick sway term draws no randomness.
    pub phase: f32,
}

impl Default for EntityData {
    fn default() -> Self {
        Self {
            position: Position::default(),
            size: Size::new(40.0, 40.0),
            velocity: Velocity::default(),
            class_index: 0,
            confidence: 0.85,
            side: Side::Right,
            phase: 0.0,
        }
    }
}

/// Errors emitted when constructing a scene.
#[derive(Debug, Error)]
pub enum SceneStateError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl From<LaneError> for SceneStateError {
    fn from(error: LaneError) -> Self {
        match error {
            LaneError::InvalidConfig(message) => Self::InvalidConfig(message),
        }
    }
}

/// Static configuration for a Mirage scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirageConfig {
    /// Viewport area that yields one entity; population = clamp(floor(W*H / this)).
    pub area_per_entity: f32,
    /// Lower population bound for a non-empty viewport.
    pub entity_min: usize,
    /// Upper population bound.
    pub entity_max: usize,
    /// Class vocabulary entities are drawn from.
    pub classes: Vec<ClassProfile>,
    /// Minimum speed sampled at spawn, pixels/second.
    pub speed_min: f32,
    /// Maximum speed sampled at spawn, pixels/second.
    pub speed_max: f32,
    /// Vertical drift as a fraction of horizontal speed, sampled in ±this.
    pub vertical_drift_max: f32,
    /// Amplitude of the sinusoidal vertical sway, pixels/second.
    pub sway_amplitude: f32,
    /// Spatial frequency of the sway term, radians per pixel of x.
    pub sway_frequency: f32,
    /// Upper clamp for per-step time deltas, seconds.
    pub dt_max: f32,
    /// Edge behaviour, fixed at construction.
    pub boundary: BoundaryPolicy,
    /// Lower confidence clamp.
    pub confidence_min: f32,
    /// Upper confidence clamp.
    pub confidence_max: f32,
    /// Half-width of the symmetric per-tick confidence perturbation.
    pub confidence_jitter: f32,
    /// Lane table geometry and scoring.
    pub lanes: LaneLayout,
    /// Vertical distance between label slots sharing a lane; must be at least
    /// `label_height` so stacked labels cannot touch.
    pub slot_step: f32,
    /// Label box height in pixels.
    pub label_height: f32,
    /// Advance width assumed per glyph of label text.
    pub glyph_width: f32,
    /// Horizontal padding inside the label box.
    pub label_pad_x: f32,
    /// Minimum label box width.
    pub label_min_width: f32,
    /// Maximum label width as a fraction of viewport width.
    pub label_max_ratio: f32,
    /// Distance from the viewport edge to the label's outer edge.
    pub gutter_margin: f32,
    /// Horizontal clearance between an entity box and its leader elbow.
    pub elbow_margin: f32,
    /// Minimum clearance between a label and the top/bottom viewport edges.
    pub edge_inset: f32,
    /// Relative aspect-ratio change beyond which a resize regenerates the
    /// population instead of clamping it.
    pub resize_aspect_threshold: f32,
    /// Maximum number of recent frame summaries retained in memory.
    pub history_capacity: usize,
    /// Optional RNG seed for reproducible scenes.
    pub rng_seed: Option<u64>,
}

impl Default for MirageConfig {
    fn default() -> Self {
        Self {
            area_per_entity: 50_000.0,
            entity_min: 18,
            entity_max: 36,
            classes: ClassProfile::standard_set(),
            speed_min: 18.0,
            speed_max: 70.0,
            vertical_drift_max: 0.35,
            sway_amplitude: 6.0,
            sway_frequency: 0.008,
            dt_max: 0.064,
            boundary: BoundaryPolicy::default(),
            confidence_min: 0.70,
            confidence_max: 0.99,
            confidence_jitter: 0.012,
            lanes: LaneLayout::default(),
            slot_step: 24.0,
            label_height: 18.0,
            glyph_width: 7.0,
            label_pad_x: 8.0,
            label_min_width: 64.0,
            label_max_ratio: 0.22,
            gutter_margin: 16.0,
            elbow_margin: 14.0,
            edge_inset: 8.0,
            resize_aspect_threshold: 0.2,
            history_capacity: 256,
            rng_seed: None,
        }
    }
}

impl MirageConfig {
    /// Validates the configuration.
    fn check(&self) -> Result<(), SceneStateError> {
        if self.area_per_entity <= 0.0 {
            return Err(SceneStateError::InvalidConfig(
                "area_per_entity must be positive",
            ));
        }
        if self.entity_min == 0 || self.entity_min > self.entity_max {
            return Err(SceneStateError::InvalidConfig(
                "entity bounds must satisfy 1 <= entity_min <= entity_max",
            ));
        }
        if self.classes.is_empty() {
            return Err(SceneStateError::InvalidConfig(
                "class vocabulary must not be empty",
            ));
        }
        for class in &self.classes {
            if class.ratio_min <= 0.0
                || class.ratio_min > class.ratio_max
                || class.ratio_max >= 1.0
            {
                return Err(SceneStateError::InvalidConfig(
                    "class size ratios must satisfy 0 < min <= max < 1",
                ));
            }
            if class.aspect_min <= 0.0 || class.aspect_min > class.aspect_max {
                return Err(SceneStateError::InvalidConfig(
                    "class aspect ratios must satisfy 0 < min <= max",
                ));
            }
        }
        if self.speed_min <= 0.0 || self.speed_min > self.speed_max {
            return Err(SceneStateError::InvalidConfig(
                "speeds must satisfy 0 < speed_min <= speed_max",
            ));
        }
        if self.vertical_drift_max < 0.0 || self.sway_amplitude < 0.0 || self.sway_frequency < 0.0
        {
            return Err(SceneStateError::InvalidConfig(
                "drift and sway parameters must be non-negative",
            ));
        }
        if self.dt_max <= 0.0 {
            return Err(SceneStateError::InvalidConfig("dt_max must be positive"));
        }
        if let BoundaryPolicy::Wrap { margin } = self.boundary
            && margin < 0.0
        {
            return Err(SceneStateError::InvalidConfig(
                "wrap margin must be non-negative",
            ));
        }
        if self.confidence_min <= 0.0
            || self.confidence_min >= self.confidence_max
            || self.confidence_max > 1.0
        {
            return Err(SceneStateError::InvalidConfig(
                "confidence bounds must satisfy 0 < min < max <= 1",
            ));
        }
        if self.confidence_jitter < 0.0 {
            return Err(SceneStateError::InvalidConfig(
                "confidence_jitter must be non-negative",
            ));
        }
        if self.label_height <= 0.0 || self.slot_step < self.label_height {
            return Err(SceneStateError::InvalidConfig(
                "slot_step must be at least label_height",
            ));
        }
        if self.glyph_width <= 0.0
            || self.label_pad_x < 0.0
            || self.label_min_width <= 0.0
            || self.label_max_ratio <= 0.0
            || self.label_max_ratio > 1.0
        {
            return Err(SceneStateError::InvalidConfig(
                "label metrics must be positive and label_max_ratio in (0, 1]",
            ));
        }
        if self.gutter_margin < 0.0 || self.elbow_margin <= 0.0 || self.edge_inset < 0.0 {
            return Err(SceneStateError::InvalidConfig(
                "gutter and edge insets must be non-negative, elbow_margin positive",
            ));
        }
        if self.resize_aspect_threshold <= 0.0 {
            return Err(SceneStateError::InvalidConfig(
                "resize_aspect_threshold must be positive",
            ));
        }
        if self.history_capacity == 0 {
            return Err(SceneStateError::InvalidConfig(
                "history_capacity must be at least 1",
            ));
        }
        Ok(())
    }

    /// Population target for a viewport: `clamp(floor(area / area_per_entity))`.
    /// An empty viewport always targets zero.
    #[must_use]
    pub fn target_population(&self, viewport: Viewport) -> usize {
        if viewport.is_empty() {
            return 0;
        }
        let raw = (viewport.area() as f32 / self.area_per_entity).floor() as usize;
        raw.clamp(self.entity_min, self.entity_max)
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
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

/// Axis-aligned label rectangle, ready for the host renderer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LabelBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl LabelBox {
    /// Right edge of the box.
    #[must_use]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Vertical center of the box.
    #[must_use]
    pub fn center_y(&self) -> f32 {
        self.y + self.height * 0.5
    }
}

/// One entity's renderable output for a frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityReading {
    /// Stable entity identifier.
    pub id: u64,
    /// Class name from the configured vocabulary.
    pub class: Cow<'static, str>,
    /// Composed label text, e.g. `"Car 87%"`. Width of [`EntityReading::label`]
    /// was measured against this exact string.
    pub caption: String,
    pub confidence: f32,
    pub position: Position,
    pub size: Size,
    pub side: Side,
    /// Lane the label was assigned to this frame.
    pub lane: usize,
    pub label: LabelBox,
    /// Leader polyline from the entity anchor to the label attach edge,
    /// three or four points.
    pub leader: Vec<Point>,
}

/// Full frame output handed to the host renderer, ordered by entity insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FramePacket {
    pub tick: Tick,
    pub viewport: Viewport,
    pub readings: Vec<EntityReading>,
}

impl FramePacket {
    fn empty(viewport: Viewport) -> Self {
        Self {
            tick: Tick::zero(),
            viewport,
            readings: Vec::new(),
        }
    }
}

/// Notable occurrences during one step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameEvents {
    pub tick: Tick,
    /// Entities teleported by the wrap boundary this step.
    pub wrapped: usize,
    /// Entities whose lane assignment changed this step.
    pub lane_moves: usize,
}

/// Aggregated statistics for one advancing frame, retained in the history ring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FrameSummary {
    pub tick: Tick,
    pub dt: f32,
    pub entity_count: usize,
    pub average_confidence: f32,
    pub wrapped: usize,
    pub lane_moves: usize,
}

/// Per-entity result of the parallel motion pass.
#[derive(Debug, Clone, Copy)]
struct MotionDelta {
    position: Position,
    velocity: Velocity,
    wrapped: bool,
}

/// Sway phase derived from the entity id; spreads phases across a full turn
/// without consuming randomness.
fn sway_phase(id: EntityId) -> f32 {
    (id.data().as_ffi() % 97) as f32 * 0.065
}

/// Composes the label caption shown next to an entity.
fn reading_text(name: &str, confidence: f32) -> String {
    format!("{} {:.0}%", name, confidence * 100.0)
}

/// Relative aspect-ratio change between two viewports; infinite when the
/// previous viewport was degenerate.
fn aspect_shift(previous: Viewport, next: Viewport) -> f32 {
    let before = previous.aspect();
    if before <= 0.0 {
        return f32::INFINITY;
    }
    (next.aspect() - before).abs() / before
}

/// A complete overlay scene: configuration, RNG, entity population, lane
/// table, and the latest frame output.
pub struct SceneState {
    config: MirageConfig,
    viewport: Viewport,
    tick: Tick,
    rng: SmallRng,
    entities: SlotMap<EntityId, EntityData>,
    lane_memory: EntityMap<usize>,
    lanes: LaneTable,
    latest: FramePacket,
    history: VecDeque<FrameSummary>,
}

impl fmt::Debug for SceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneState")
            .field("viewport", &self.viewport)
            .field("tick", &self.tick)
            .field("entity_count", &self.entities.len())
            .field("lane_count", &self.lanes.len())
            .finish()
    }
}

impl SceneState {
    /// Instantiate a scene from a validated configuration and an initial
    /// viewport. The population is generated and laid out immediately, so
    /// [`SceneState::latest_frame`] is renderable before the first step.
    pub fn new(config: MirageConfig, viewport: Viewport) -> Result<Self, SceneStateError> {
        config.check()?;
        let rng = config.seeded_rng();
        let mut lanes = LaneTable::new(config.lanes)?;
        lanes.rebuild(viewport.fheight());
        let history_capacity = config.history_capacity;
        let mut scene = Self {
            config,
            viewport,
            tick: Tick::zero(),
            rng,
            entities: SlotMap::with_key(),
            lane_memory: EntityMap::new(),
            lanes,
            latest: FramePacket::empty(viewport),
            history: VecDeque::with_capacity(history_capacity),
        };
        scene.populate();
        scene.stage_layout();
        Ok(scene)
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &MirageConfig {
        &self.config
    }

    /// Current viewport.
    #[must_use]
    pub const fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Current tick counter.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Iterate entity handles and state in insertion order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &EntityData)> {
        self.entities.iter()
    }

    /// Scalar state for one entity.
    #[must_use]
    pub fn entity(&self, id: EntityId) -> Option<&EntityData> {
        self.entities.get(id)
    }

    /// The lane table backing label deconfliction.
    #[must_use]
    pub fn lanes(&self) -> &LaneTable {
        &self.lanes
    }

    /// The most recently computed frame output.
    #[must_use]
    pub fn latest_frame(&self) -> &FramePacket {
        &self.latest
    }

    /// Recent frame summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &FrameSummary> {
        self.history.iter()
    }

    /// Insert an entity with explicit state, bypassing generation. The sway
    /// phase is rederived from the assigned id.
    pub fn insert_entity(&mut self, data: EntityData) -> EntityId {
        self.entities.insert_with_key(|key| EntityData {
            phase: sway_phase(key),
            ..data
        })
    }

    /// Remove every entity, leaving lanes and viewport untouched.
    pub fn clear_entities(&mut self) {
        self.entities.clear();
        self.lane_memory.clear();
    }

    /// Regenerate the population wholesale for the current viewport.
    pub fn populate(&mut self) {
        self.clear_entities();
        let target = self.config.target_population(self.viewport);
        for _ in 0..target {
            self.spawn_entity();
        }
    }

    /// Sample one entity: uniform class, size from the class profile relative
    /// to the smaller viewport dimension, a position keeping the full box
    /// on-screen, side-biased velocity, and an initial confidence.
    fn spawn_entity(&mut self) {
        let width = self.viewport.fwidth();
        let height = self.viewport.fheight();
        let base = width.min(height);
        let class_index = self.rng.random_range(0..self.config.classes.len());
        let class = &self.config.classes[class_index];
        let w = base * self.rng.random_range(class.ratio_min..=class.ratio_max);
        let aspect = self.rng.random_range(class.aspect_min..=class.aspect_max);
        let h = w / aspect;
        let x = self.rng.random_range(0.0..=(width - w).max(0.0));
        let y = self.rng.random_range(0.0..=(height - h).max(0.0));
        let speed = self
            .rng
            .random_range(self.config.speed_min..=self.config.speed_max);
        let vx = if self.rng.random_bool(0.5) {
            speed
        } else {
            -speed
        };
        let drift = self.config.vertical_drift_max;
        let vy = speed * self.rng.random_range(-drift..=drift);
        let confidence = self
            .rng
            .random_range(self.config.confidence_min..=self.config.confidence_max);
        self.entities.insert_with_key(|key| EntityData {
            position: Position::new(x, y),
            size: Size::new(w, h),
            velocity: Velocity::new(vx, vy),
            class_index,
            confidence,
            side: Side::of_velocity(vx),
            phase: sway_phase(key),
        });
    }

    /// Apply a viewport change. Lanes are always rebuilt; the population is
    /// regenerated only when the aspect ratio shifts past the configured
    /// threshold (or the viewport was degenerate), otherwise existing entities
    /// are clamped into the new bounds. Returns whether a regeneration
    /// happened. Repeating the same dimensions is a no-op.
    pub fn resize(&mut self, viewport: Viewport) -> bool {
        if viewport == self.viewport {
            return false;
        }
        let previous = self.viewport;
        self.viewport = viewport;
        self.lanes.rebuild(viewport.fheight());
        let repopulate = viewport.is_empty()
            || aspect_shift(previous, viewport) > self.config.resize_aspect_threshold;
        if repopulate {
            self.populate();
        } else {
            self.clamp_entities();
        }
        self.stage_layout();
        repopulate
    }

    /// Advance the scene by `dt` seconds (clamped to `dt_max`) and lay out the
    /// frame. A zero delta recomputes layout without advancing state, which is
    /// how paused hosts render a static frame.
    pub fn step(&mut self, dt: f32) -> FrameEvents {
        let dt = dt.clamp(0.0, self.config.dt_max);
        if dt > 0.0 {
            self.tick = self.tick.next();
        }
        let wrapped = self.stage_motion(dt);
        self.stage_confidence(dt);
        let lane_moves = self.stage_layout();
        if dt > 0.0 {
            self.push_summary(dt, wrapped, lane_moves);
        }
        FrameEvents {
            tick: self.tick,
            wrapped,
            lane_moves,
        }
    }

    /// Kinematic update: integrate velocity plus the sway term, then apply the
    /// boundary policy. Runs over a snapshot in parallel and commits the
    /// deltas sequentially; no RNG is consumed here.
    fn stage_motion(&mut self, dt: f32) -> usize {
        if dt <= 0.0 || self.entities.is_empty() {
            return 0;
        }
        let width = self.viewport.fwidth();
        let height = self.viewport.fheight();
        let boundary = self.config.boundary;
        let sway_amplitude = self.config.sway_amplitude;
        let sway_frequency = self.config.sway_frequency;

        let snapshot: Vec<(EntityId, EntityData)> =
            self.entities.iter().map(|(id, data)| (id, *data)).collect();
        let deltas: Vec<(EntityId, MotionDelta)> = snapshot
            .par_iter()
            .map(|&(id, entity)| {
                let mut position = entity.position;
                let mut velocity = entity.velocity;
                let mut wrapped = false;
                position.x += velocity.vx * dt;
                position.y += velocity.vy * dt
                    + (position.x * sway_frequency + entity.phase).sin() * sway_amplitude * dt;
                match boundary {
                    BoundaryPolicy::Wrap { margin } => {
                        if velocity.vx > 0.0 && position.x > width {
                            position.x = -(entity.size.w + margin);
                            wrapped = true;
                        } else if velocity.vx < 0.0 && position.x + entity.size.w < 0.0 {
                            position.x = width + margin;
                            wrapped = true;
                        }
                        if velocity.vy > 0.0 && position.y > height {
                            position.y = -(entity.size.h + margin);
                            wrapped = true;
                        } else if velocity.vy < 0.0 && position.y + entity.size.h < 0.0 {
                            position.y = height + margin;
                            wrapped = true;
                        }
                    }
                    BoundaryPolicy::Bounce => {
                        let max_x = (width - entity.size.w).max(0.0);
                        if position.x < 0.0 {
                            position.x = 0.0;
                            velocity.vx = velocity.vx.abs();
                        } else if position.x > max_x {
                            position.x = max_x;
                            velocity.vx = -velocity.vx.abs();
                        }
                        let max_y = (height - entity.size.h).max(0.0);
                        if position.y < 0.0 {
                            position.y = 0.0;
                            velocity.vy = velocity.vy.abs();
                        } else if position.y > max_y {
                            position.y = max_y;
                            velocity.vy = -velocity.vy.abs();
                        }
                    }
                }
                (
                    id,
                    MotionDelta {
                        position,
                        velocity,
                        wrapped,
                    },
                )
            })
            .collect();

        let mut wrapped_total = 0;
        for (id, delta) in deltas {
            if let Some(entity) = self.entities.get_mut(id) {
                entity.position = delta.position;
                entity.velocity = delta.velocity;
            }
            if delta.wrapped {
                wrapped_total += 1;
            }
        }
        wrapped_total
    }

    /// Symmetric confidence perturbation, clamped to the configured range.
    /// Skipped entirely for static frames so a paused scene stays byte-stable.
    fn stage_confidence(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let jitter = self.config.confidence_jitter;
        if jitter <= 0.0 {
            return;
        }
        let lo = self.config.confidence_min;
        let hi = self.config.confidence_max;
        for entity in self.entities.values_mut() {
            let delta = self.rng.random_range(-jitter..=jitter);
            entity.confidence = (entity.confidence + delta).clamp(lo, hi);
        }
    }

    /// Assign lanes, stagger slots, lay out labels, route leaders, and publish
    /// the frame packet. Returns how many entities changed lane.
    fn stage_layout(&mut self) -> usize {
        self.lanes.begin_frame();
        let ids: Vec<EntityId> = self.entities.keys().collect();

        let mut lane_moves = 0usize;
        for &id in &ids {
            let entity = &self.entities[id];
            let anchor_y = entity.position.y + entity.size.h * 0.5;
            let current = self.lane_memory.get(id).copied();
            let lane = self.lanes.select(anchor_y, current);
            if current != Some(lane) {
                lane_moves += 1;
            }
            self.lane_memory.insert(id, lane);
            self.lanes.commit(lane);
        }

        let mut groups: Vec<Vec<EntityId>> = vec![Vec::new(); self.lanes.len()];
        for &id in &ids {
            groups[self.lane_memory[id]].push(id);
        }
        let mut slots: EntityMap<f32> = EntityMap::new();
        for (lane_index, group) in groups.iter_mut().enumerate() {
            if group.is_empty() {
                continue;
            }
            group.sort_by_key(|&id| OrderedFloat(self.entities[id].position.x));
            let lane_y = self.lanes.lane_y(lane_index).unwrap_or_default();
            let base = self.slot_base(lane_y, group.len());
            for (&id, offset) in group
                .iter()
                .zip(slot_offsets(group.len(), self.config.slot_step))
            {
                slots.insert(id, base + offset);
            }
        }

        let mut readings = Vec::with_capacity(ids.len());
        for &id in &ids {
            let entity = &self.entities[id];
            let class = &self.config.classes[entity.class_index];
            let caption = reading_text(class.name.as_ref(), entity.confidence);
            let label = self.layout_label(&caption, entity.side, slots[id]);
            let leader = route_leader(entity, &label, self.config.elbow_margin);
            readings.push(EntityReading {
                id: id.data().as_ffi(),
                class: class.name.clone(),
                caption,
                confidence: entity.confidence,
                position: entity.position,
                size: entity.size,
                side: entity.side,
                lane: self.lane_memory[id],
                label,
                leader,
            });
        }
        self.latest = FramePacket {
            tick: self.tick,
            viewport: self.viewport,
            readings,
        };
        lane_moves
    }

    /// Recenter a lane's slot block so the whole stagger fits between the
    /// vertical insets; a block taller than the viewport falls back to the
    /// midpoint and relies on the final label clamp.
    fn slot_base(&self, lane_y: f32, count: usize) -> f32 {
        let half_span = (count.saturating_sub(1)) as f32 * 0.5 * self.config.slot_step;
        let min_center = self.config.edge_inset + self.config.label_height * 0.5;
        let max_center =
            (self.viewport.fheight() - self.config.edge_inset - self.config.label_height * 0.5)
                .max(min_center);
        if min_center + half_span > max_center - half_span {
            return (min_center + max_center) * 0.5;
        }
        lane_y.clamp(min_center + half_span, max_center - half_span)
    }

    /// Label geometry for one entity: width from the measured caption, x flush
    /// to the preferred gutter, y centered on the slot and clamped on-screen.
    fn layout_label(&self, caption: &str, side: Side, slot_y: f32) -> LabelBox {
        let cfg = &self.config;
        let measured = caption.chars().count() as f32 * cfg.glyph_width + 2.0 * cfg.label_pad_x;
        let max_width = (self.viewport.fwidth() * cfg.label_max_ratio).max(cfg.label_min_width);
        let width = measured.clamp(cfg.label_min_width, max_width);
        let x = match side {
            Side::Left => cfg.gutter_margin,
            Side::Right => (self.viewport.fwidth() - cfg.gutter_margin - width).max(0.0),
        };
        let max_y = (self.viewport.fheight() - cfg.label_height - cfg.edge_inset).max(cfg.edge_inset);
        let y = (slot_y - cfg.label_height * 0.5).clamp(cfg.edge_inset, max_y);
        LabelBox {
            x,
            y,
            width,
            height: cfg.label_height,
        }
    }

    /// Clamp every entity's box inside the current viewport.
    fn clamp_entities(&mut self) {
        let width = self.viewport.fwidth();
        let height = self.viewport.fheight();
        for entity in self.entities.values_mut() {
            entity.position.x = entity.position.x.clamp(0.0, (width - entity.size.w).max(0.0));
            entity.position.y = entity
                .position
                .y
                .clamp(0.0, (height - entity.size.h).max(0.0));
        }
    }

    fn push_summary(&mut self, dt: f32, wrapped: usize, lane_moves: usize) {
        let entity_count = self.entities.len();
        let average_confidence = if entity_count == 0 {
            0.0
        } else {
            self.entities.values().map(|e| e.confidence).sum::<f32>() / entity_count as f32
        };
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(FrameSummary {
            tick: self.tick,
            dt,
            entity_count,
            average_confidence,
            wrapped,
            lane_moves,
        });
    }
}

/// Route the leader polyline for one entity: anchor on the box edge facing the
/// label, elbow offset outward so the line never crosses the box, vertical run
/// to the label's center line, then horizontal into the attach edge. Collapses
/// to three points when anchor and label are level.
fn route_leader(entity: &EntityData, label: &LabelBox, elbow_margin: f32) -> Vec<Point> {
    let anchor_y = entity.position.y + entity.size.h * 0.5;
    let label_cy = label.center_y();
    let (anchor_x, elbow_x, attach_x) = match entity.side {
        Side::Left => (
            entity.position.x,
            entity.position.x - elbow_margin,
            label.right(),
        ),
        Side::Right => (
            entity.position.x + entity.size.w,
            entity.position.x + entity.size.w + elbow_margin,
            label.x,
        ),
    };
    let mut points = vec![
        Point::new(anchor_x, anchor_y),
        Point::new(elbow_x, anchor_y),
    ];
    if (label_cy - anchor_y).abs() > LEADER_FLATTEN_EPSILON {
        points.push(Point::new(elbow_x, label_cy));
    }
    points.push(Point::new(attach_x, label_cy));
    points
}

/// Whether the orchestrator is advancing frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunPhase {
    Running,
    Paused,
}

/// Frame orchestrator: owns a scene, converts a host-supplied monotonic clock
/// into clamped time deltas, and runs the Running/Paused state machine. A
/// reduced-motion request pauses the driver permanently.
#[derive(Debug)]
pub struct FrameDriver {
    scene: SceneState,
    phase: RunPhase,
    reduced_motion: bool,
    last_now_ms: Option<f64>,
    static_frame_pending: bool,
}

impl FrameDriver {
    /// Wrap a scene in a running driver.
    #[must_use]
    pub fn new(scene: SceneState) -> Self {
        Self {
            scene,
            phase: RunPhase::Running,
            reduced_motion: false,
            last_now_ms: None,
            static_frame_pending: false,
        }
    }

    /// Current orchestration phase.
    #[must_use]
    pub const fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Whether the permanent reduced-motion override is latched.
    #[must_use]
    pub const fn reduced_motion(&self) -> bool {
        self.reduced_motion
    }

    /// The owned scene.
    #[must_use]
    pub fn scene(&self) -> &SceneState {
        &self.scene
    }

    /// Mutable access to the owned scene.
    pub fn scene_mut(&mut self) -> &mut SceneState {
        &mut self.scene
    }

    /// The most recently computed frame output.
    #[must_use]
    pub fn latest_frame(&self) -> &FramePacket {
        self.scene.latest_frame()
    }

    fn pause(&mut self) {
        if self.phase == RunPhase::Running {
            self.phase = RunPhase::Paused;
            self.static_frame_pending = true;
            self.last_now_ms = None;
        }
    }

    /// Stop advancing frames. The next pump emits one static frame.
    pub fn stop(&mut self) {
        self.pause();
    }

    /// Host visibility change. Hiding pauses; revealing resumes unless reduced
    /// motion has been latched.
    pub fn set_hidden(&mut self, hidden: bool) {
        if hidden {
            self.pause();
        } else if !self.reduced_motion && self.phase == RunPhase::Paused {
            self.phase = RunPhase::Running;
            self.last_now_ms = None;
        }
    }

    /// Latch the reduced-motion override. Once requested the driver pauses and
    /// never runs again; a `false` request cannot unlatch it.
    pub fn set_reduced_motion(&mut self, requested: bool) {
        if requested && !self.reduced_motion {
            self.reduced_motion = true;
            self.pause();
        }
    }

    /// Forward a viewport change to the scene. While paused, schedules one
    /// static frame so the host sees the new layout.
    pub fn resize(&mut self, viewport: Viewport) -> bool {
        let repopulated = self.scene.resize(viewport);
        if self.phase == RunPhase::Paused {
            self.static_frame_pending = true;
        }
        repopulated
    }

    /// Drive one frame from a monotonic clock reading in milliseconds. Running
    /// drivers step by the elapsed wall-clock delta (clamped by the scene);
    /// paused drivers emit exactly one static frame after each transition or
    /// resize, then nothing.
    pub fn pump(&mut self, now_ms: f64) -> Option<FrameEvents> {
        match self.phase {
            RunPhase::Paused => {
                if self.static_frame_pending {
                    self.static_frame_pending = false;
                    Some(self.scene.step(0.0))
                } else {
                    None
                }
            }
            RunPhase::Running => {
                let dt = match self.last_now_ms {
                    Some(last) => ((now_ms - last).max(0.0) / 1000.0) as f32,
                    None => 0.0,
                };
                self.last_now_ms = Some(now_ms);
                Some(self.scene.step(dt))
            }
        }
    }
}
