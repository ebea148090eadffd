//! Lane tables used to deconflict HUD label placement.
//!
//! A lane is a fixed horizontal stripe of the viewport. Each frame the scene
//! assigns every entity to one lane; entities sharing a lane are staggered
//! into symmetric vertical slots so their labels never overlap.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted when constructing a lane table.
#[derive(Debug, Error)]
pub enum LaneError {
    /// Indicates configuration values that cannot be used (e.g., non-positive spacing).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Geometry and scoring parameters for a lane table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LaneLayout {
    /// Vertical distance between adjacent lane centerlines, in pixels.
    pub spacing: f32,
    /// Inset from the top and bottom viewport edges before the first/last lane.
    pub margin: f32,
    /// Minimum number of lanes regardless of viewport height.
    pub min_lanes: usize,
    /// Maximum number of lanes regardless of viewport height.
    pub max_lanes: usize,
    /// Score penalty added per entity already committed to a lane this frame.
    pub penalty: f32,
    /// Occupancy at which a remembered lane is considered congested.
    pub capacity: u32,
}

impl Default for LaneLayout {
    fn default() -> Self {
        Self {
            spacing: 56.0,
            margin: 40.0,
            min_lanes: 4,
            max_lanes: 12,
            penalty: 18.0,
            capacity: 3,
        }
    }
}

impl LaneLayout {
    fn check(&self) -> Result<(), LaneError> {
        if self.spacing <= 0.0 {
            return Err(LaneError::InvalidConfig("spacing must be positive"));
        }
        if self.margin < 0.0 {
            return Err(LaneError::InvalidConfig("margin must be non-negative"));
        }
        if self.min_lanes == 0 {
            return Err(LaneError::InvalidConfig("min_lanes must be at least 1"));
        }
        if self.min_lanes > self.max_lanes {
            return Err(LaneError::InvalidConfig("min_lanes cannot exceed max_lanes"));
        }
        if self.penalty < 0.0 {
            return Err(LaneError::InvalidConfig("penalty must be non-negative"));
        }
        if self.capacity == 0 {
            return Err(LaneError::InvalidConfig("capacity must be at least 1"));
        }
        Ok(())
    }
}

/// A single horizontal stripe with its per-frame occupancy counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Lane {
    /// Centerline of the stripe in viewport pixels.
    pub y: f32,
    used: u32,
}

impl Lane {
    /// Number of entities committed to this lane in the current frame.
    #[must_use]
    pub const fn used(&self) -> u32 {
        self.used
    }
}

/// Ordered set of lanes for one viewport, rebuilt on resize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneTable {
    layout: LaneLayout,
    lanes: Vec<Lane>,
}

impl LaneTable {
    /// Create an empty table with a validated layout. Call [`LaneTable::rebuild`]
    /// before the first frame.
    pub fn new(layout: LaneLayout) -> Result<Self, LaneError> {
        layout.check()?;
        Ok(Self {
            layout,
            lanes: Vec::new(),
        })
    }

    /// Layout parameters the table was constructed with.
    #[must_use]
    pub const fn layout(&self) -> &LaneLayout {
        &self.layout
    }

    /// Recompute lane positions for a viewport height. A degenerate height
    /// collapses the table to a single lane at the vertical center.
    pub fn rebuild(&mut self, height: f32) {
        self.lanes.clear();
        let usable = height - 2.0 * self.layout.margin;
        let count = if usable > 0.0 {
            ((usable / self.layout.spacing).floor() as usize)
                .clamp(self.layout.min_lanes, self.layout.max_lanes)
        } else {
            0
        };
        if count <= 1 {
            self.lanes.push(Lane {
                y: (height * 0.5).max(0.0),
                used: 0,
            });
            return;
        }
        let span = usable / (count - 1) as f32;
        for index in 0..count {
            self.lanes.push(Lane {
                y: self.layout.margin + span * index as f32,
                used: 0,
            });
        }
    }

    /// Number of lanes currently in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    /// Whether the table holds no lanes (only before the first rebuild).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Immutable view of the lanes, ordered by `y`.
    #[must_use]
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Centerline of lane `index`, if present.
    #[must_use]
    pub fn lane_y(&self, index: usize) -> Option<f32> {
        self.lanes.get(index).map(|lane| lane.y)
    }

    /// Reset every occupancy counter. Must run once at the start of each frame.
    pub fn begin_frame(&mut self) {
        for lane in &mut self.lanes {
            lane.used = 0;
        }
    }

    /// Pick a lane for an anchor at `anchor_y`. A remembered lane is kept while
    /// it exists and has spare capacity; otherwise the lane minimizing
    /// `|lane.y - anchor_y| + used * penalty` wins, ties going to the topmost
    /// lane. Pure: committing the choice is a separate step.
    #[must_use]
    pub fn select(&self, anchor_y: f32, current: Option<usize>) -> usize {
        if let Some(index) = current
            && let Some(lane) = self.lanes.get(index)
            && lane.used < self.layout.capacity
        {
            return index;
        }
        self.lanes
            .iter()
            .enumerate()
            .min_by_key(|(index, lane)| {
                let score = (lane.y - anchor_y).abs() + lane.used as f32 * self.layout.penalty;
                (OrderedFloat(score), *index)
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Record that an entity occupies lane `index` this frame.
    pub fn commit(&mut self, index: usize) {
        if let Some(lane) = self.lanes.get_mut(index) {
            lane.used += 1;
        }
    }
}

/// Symmetric vertical offsets for `count` labels sharing one lane, staggered
/// `step` pixels apart around the lane centerline. Two labels with step 24
/// land at -12 and +12.
#[must_use]
pub fn slot_offsets(count: usize, step: f32) -> Vec<f32> {
    let center = (count.saturating_sub(1)) as f32 * 0.5;
    (0..count).map(|i| (i as f32 - center) * step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(height: f32) -> LaneTable {
        let mut table = LaneTable::new(LaneLayout::default()).expect("layout");
        table.rebuild(height);
        table
    }

    #[test]
    fn layout_validation_rejects_bad_values() {
        let layout = LaneLayout {
            spacing: 0.0,
            ..LaneLayout::default()
        };
        assert!(LaneTable::new(layout).is_err());

        let layout = LaneLayout {
            min_lanes: 6,
            max_lanes: 4,
            ..LaneLayout::default()
        };
        assert!(LaneTable::new(layout).is_err());

        let layout = LaneLayout {
            capacity: 0,
            ..LaneLayout::default()
        };
        assert!(LaneTable::new(layout).is_err());
    }

    #[test]
    fn rebuild_spans_usable_height() {
        let table = table(720.0);
        assert!(table.len() >= 4 && table.len() <= 12);
        let first = table.lane_y(0).expect("first lane");
        let last = table.lane_y(table.len() - 1).expect("last lane");
        assert!((first - 40.0).abs() < 0.001);
        assert!((last - 680.0).abs() < 0.001);
        for pair in table.lanes().windows(2) {
            assert!(pair[1].y > pair[0].y);
        }
    }

    #[test]
    fn rebuild_is_deterministic() {
        let a = table(600.0);
        let b = table(600.0);
        assert_eq!(a.lanes(), b.lanes());
    }

    #[test]
    fn degenerate_height_yields_single_center_lane() {
        let t0 = table(0.0);
        assert_eq!(t0.len(), 1);
        assert_eq!(t0.lane_y(0), Some(0.0));

        let t30 = table(30.0);
        assert_eq!(t30.len(), 1);
        assert_eq!(t30.lane_y(0), Some(15.0));
    }

    #[test]
    fn select_prefers_nearest_empty_lane() {
        let table = table(720.0);
        let picked = table.select(42.0, None);
        assert_eq!(picked, 0);
        let picked = table.select(675.0, None);
        assert_eq!(picked, table.len() - 1);
    }

    #[test]
    fn penalty_spreads_crowded_anchors() {
        let layout = LaneLayout {
            penalty: 40.0,
            ..LaneLayout::default()
        };
        let mut table = LaneTable::new(layout).expect("layout");
        table.rebuild(720.0);
        table.begin_frame();
        let first = table.select(41.0, None);
        assert_eq!(first, 0);
        table.commit(first);
        let second = table.select(41.0, None);
        assert_eq!(second, 0);
        table.commit(second);
        // Two occupants cost 80 points, more than the 63px to the next lane.
        let third = table.select(41.0, None);
        assert_ne!(third, first);
    }

    #[test]
    fn remembered_lane_sticks_until_congested() {
        let mut table = table(720.0);
        table.begin_frame();
        assert_eq!(table.select(500.0, Some(2)), 2);
        for _ in 0..table.layout().capacity {
            table.commit(2);
        }
        let reassigned = table.select(500.0, Some(2));
        assert_ne!(reassigned, 2);
    }

    #[test]
    fn stale_remembered_lane_is_replaced() {
        let table = table(720.0);
        let picked = table.select(100.0, Some(99));
        assert!(picked < table.len());
    }

    #[test]
    fn begin_frame_clears_usage() {
        let mut table = table(720.0);
        table.commit(0);
        table.commit(0);
        assert_eq!(table.lanes()[0].used(), 2);
        table.begin_frame();
        assert!(table.lanes().iter().all(|lane| lane.used() == 0));
    }

    #[test]
    fn slot_offsets_are_symmetric() {
        assert_eq!(slot_offsets(1, 24.0), vec![0.0]);
        assert_eq!(slot_offsets(2, 24.0), vec![-12.0, 12.0]);
        assert_eq!(slot_offsets(3, 24.0), vec![-24.0, 0.0, 24.0]);
        assert!(slot_offsets(0, 24.0).is_empty());
    }
}
