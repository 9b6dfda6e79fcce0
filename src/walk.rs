use crate::astar::PathSearch;
use crate::geometry::Vec2;
use crate::grid::{Cell, Grid};

/// Continuous waypoints derived from a grid path; consumed front to back and
/// never edited once built.
#[derive(Debug, Clone, PartialEq)]
pub struct WaypointPath {
    waypoints: Vec<Vec2>,
}

impl WaypointPath {
    pub fn from_cells(grid: &Grid, cells: &[Cell]) -> Option<Self> {
        if cells.is_empty() {
            return None;
        }
        Some(WaypointPath {
            waypoints: cells.iter().map(|cell| grid.cell_to_world(*cell)).collect(),
        })
    }

    pub fn plan(search: &dyn PathSearch, grid: &Grid, start: Cell, goal: Cell) -> Option<Self> {
        let cells = search.find_path(grid, start, goal)?;
        WaypointPath::from_cells(grid, &cells)
    }

    #[cfg(test)]
    pub fn waypoints(&self) -> &[Vec2] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn goal(&self) -> Vec2 {
        self.waypoints[self.waypoints.len() - 1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStep {
    /// Moved a full step toward the current waypoint.
    Moved,
    /// Snapped onto a waypoint and targeted the next one.
    ReachedWaypoint,
    /// Snapped onto the final waypoint.
    ReachedGoal,
    /// Already at the goal; nothing moved.
    Idle,
}

impl WalkStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, WalkStep::ReachedGoal | WalkStep::Idle)
    }

    pub fn moved(self) -> bool {
        !matches!(self, WalkStep::Idle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkProgress {
    path: WaypointPath,
    current_pos: Vec2,
    target_index: usize,
}

impl WalkProgress {
    /// Starts on the first waypoint, heading for the second.
    pub fn new(path: WaypointPath) -> Self {
        let current_pos = path.waypoints[0];
        WalkProgress {
            path,
            current_pos,
            target_index: 1,
        }
    }

    pub fn path(&self) -> &WaypointPath {
        &self.path
    }

    pub fn current_pos(&self) -> Vec2 {
        self.current_pos
    }

    #[cfg(test)]
    pub fn target_index(&self) -> usize {
        self.target_index
    }

    pub fn is_terminal(&self) -> bool {
        self.target_index >= self.path.len()
    }

    pub fn remaining_distance(&self) -> Option<f64> {
        let target = self.path.waypoints.get(self.target_index)?;
        Some(self.current_pos.distance(*target))
    }

    /// One tick of path following from `position`.
    ///
    /// Within `step` of the target the walker snaps onto it and advances the
    /// index; otherwise it moves exactly `step` toward it. Once the index is
    /// past the last waypoint every call is a no-op.
    pub fn advance(&mut self, position: Vec2, step: f64) -> WalkStep {
        let Some(target) = self.path.waypoints.get(self.target_index).copied() else {
            return WalkStep::Idle;
        };
        self.current_pos = position;

        let delta = target - position;
        let distance = delta.length();
        if distance <= step {
            self.current_pos = target;
            self.target_index += 1;
            return if self.is_terminal() {
                WalkStep::ReachedGoal
            } else {
                WalkStep::ReachedWaypoint
            };
        }

        self.current_pos = position + delta * (step / distance);
        WalkStep::Moved
    }
}
