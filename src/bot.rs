use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::astar::{AStar, PathSearch};
use crate::battle::{BattleStateMachine, Transition};
use crate::collision::{BodyHandle, CollisionError, CollisionFilter, CollisionWorld};
use crate::geometry::{Direction, Vec2};
use crate::grid::{Cell, Grid, ObstacleFilter};
use crate::net_structs::{PlayerUpsyncCmd, RoomDownsyncFrame};
use crate::tiled::MapResources;
use crate::walk::{WalkProgress, WalkStep, WaypointPath};
use crate::wall_follow::{PlayerProbe, ProbeOutcome, WallFollower};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Follow the plan and hold at the goal; wall-follow only without a plan.
    #[default]
    Path,
    /// Follow the plan, then keep wall-following once the goal is reached.
    Roam,
    /// Never plan.
    Reactive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BotConfig {
    pub player_id: i32,
    pub strategy: Strategy,
    pub step: f64,
    pub goal_cell: Option<Cell>,
    pub goal_object: String,
    pub collider_radius: f64,
    pub initial_heading: f64,
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("battle initialization failed: {0}")]
    Init(#[from] CollisionError),
}

/// When a mid-battle re-plan should happen, given the previous and current frame.
pub trait ReplanPolicy {
    fn should_replan(&mut self, previous: &RoomDownsyncFrame, current: &RoomDownsyncFrame) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverReplan;

impl ReplanPolicy for NeverReplan {
    fn should_replan(&mut self, _: &RoomDownsyncFrame, _: &RoomDownsyncFrame) -> bool {
        false
    }
}

/// Re-plans when the server moves the player further than `max_jump` between
/// two consecutive frames, as after a respawn or a server-side correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplanOnJump {
    pub player_id: i32,
    pub max_jump: f64,
}

impl ReplanPolicy for ReplanOnJump {
    fn should_replan(&mut self, previous: &RoomDownsyncFrame, current: &RoomDownsyncFrame) -> bool {
        match (previous.player(self.player_id), current.player(self.player_id)) {
            (Some(before), Some(after)) => {
                before.position().distance(after.position()) > self.max_jump
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Player {
    pub id: i32,
    pub position: Vec2,
    pub speed: f64,
    pub dir: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Item {
    pub id: i32,
    pub position: Vec2,
    pub cell: Cell,
    pub removed: bool,
}

struct PlayerCollision {
    world: CollisionWorld,
    body: BodyHandle,
}

pub struct Bot {
    config: BotConfig,
    resources: MapResources,
    obstacles: ObstacleFilter,
    grid: Grid,
    search: Box<dyn PathSearch + Send>,
    replan: Box<dyn ReplanPolicy + Send>,
    player: Player,
    battle: BattleStateMachine,
    collision: Option<PlayerCollision>,
    walk: Option<WalkProgress>,
    follower: WallFollower,
    items: BTreeMap<i32, Item>,
    last_frame: Option<RoomDownsyncFrame>,
}

impl Bot {
    pub fn new(config: BotConfig, resources: MapResources) -> Self {
        let obstacles = ObstacleFilter {
            tileset_source: resources.tileset_source.clone(),
            ..ObstacleFilter::default()
        };
        let grid = Grid::from_map(&resources.map, &obstacles);
        Bot {
            player: Player {
                id: config.player_id,
                position: Vec2::ZERO,
                speed: 0.0,
                dir: Direction::from_quadrant(config.initial_heading),
            },
            follower: WallFollower::new(config.initial_heading),
            config,
            resources,
            obstacles,
            grid,
            search: Box::new(AStar),
            replan: Box::new(NeverReplan),
            battle: BattleStateMachine::new(),
            collision: None,
            walk: None,
            items: BTreeMap::new(),
            last_frame: None,
        }
    }

    pub fn with_replan_policy(mut self, policy: impl ReplanPolicy + Send + 'static) -> Self {
        self.replan = Box::new(policy);
        self
    }

    pub fn battle(&self) -> &BattleStateMachine {
        &self.battle
    }

    /// Handles one authoritative frame and returns the movement command to
    /// send for it, if any. Commands are only produced in battle while the
    /// server lets the player move.
    pub fn on_frame(
        &mut self,
        frame: RoomDownsyncFrame,
    ) -> Result<Option<PlayerUpsyncCmd>, BotError> {
        self.reconcile(&frame);
        let transition = self.battle.on_frame(frame.id, frame.countdown_nanos);
        match transition {
            Some(Transition::Started) => self.initialize(&frame)?,
            Some(Transition::Settled) => info!(frame_id = frame.id, "battle settled"),
            _ => {}
        }

        let frame_id = frame.id;
        let previous = self.last_frame.replace(frame);
        if !self.battle.in_battle() {
            return Ok(None);
        }

        self.apply_item_removals();
        if transition.is_none() {
            if let Some(previous) = previous {
                self.check_replan(&previous);
            }
        }

        if self.player.speed == 0.0 {
            debug!(frame_id, "movement locked by server");
            return Ok(None);
        }

        self.tick();
        Ok(Some(PlayerUpsyncCmd {
            id: self.player.id,
            x: self.player.position.x,
            y: self.player.position.y,
            dir: self.player.dir,
            acking_frame_id: frame_id,
        }))
    }

    pub fn on_disconnect(&mut self) {
        self.battle.on_disconnect();
    }

    fn reconcile(&mut self, frame: &RoomDownsyncFrame) {
        let Some(state) = frame.player(self.player.id) else {
            warn!(frame_id = frame.id, player_id = self.player.id, "own player missing from frame");
            return;
        };
        self.player.position = state.position();
        self.player.speed = state.speed;
        self.player.dir = state.dir;
    }

    fn initialize(&mut self, frame: &RoomDownsyncFrame) -> Result<(), BotError> {
        let mut world = CollisionWorld::new(CollisionFilter::standard()?);
        let barriers =
            world.build_static_obstacles(&self.resources, &self.grid, &self.obstacles)?;
        let body = world.create_player_body(
            self.player.id,
            self.player.position,
            self.config.collider_radius,
        )?;
        self.collision = Some(PlayerCollision { world, body });

        self.items = frame
            .treasures
            .values()
            .map(|treasure| {
                let position = Vec2::new(treasure.x, treasure.y);
                let item = Item {
                    id: treasure.id,
                    position,
                    cell: self.grid.world_to_cell(position),
                    removed: treasure.removed,
                };
                (treasure.id, item)
            })
            .collect();

        self.walk = self.plan();
        info!(
            frame_id = frame.id,
            barriers,
            items = self.items.len(),
            plan_len = self.walk.as_ref().map_or(0, |walk| walk.path().len()),
            goal = ?self.walk.as_ref().map(|walk| walk.path().goal()),
            "battle initialized"
        );
        Ok(())
    }

    fn goal_cell(&self) -> Option<Cell> {
        if let Some(cell) = self.config.goal_cell {
            return Some(cell);
        }
        self.resources
            .map
            .find_object(&self.config.goal_object)
            .map(|object| self.grid.world_to_cell(object.position))
    }

    fn plan(&self) -> Option<WalkProgress> {
        if self.config.strategy == Strategy::Reactive {
            return None;
        }
        let Some(goal) = self.goal_cell() else {
            warn!(goal_object = %self.config.goal_object, "no goal on this map, wall-following");
            return None;
        };
        let start = self.grid.world_to_cell(self.player.position);
        match WaypointPath::plan(self.search.as_ref(), &self.grid, start, goal) {
            Some(path) => Some(WalkProgress::new(path)),
            None => {
                warn!(?start, ?goal, "no path found, wall-following");
                None
            }
        }
    }

    fn apply_item_removals(&mut self) {
        let Some(frame) = self.last_frame.as_ref() else {
            return;
        };
        let before = self.remaining_items();
        for treasure in frame.treasures.values().filter(|treasure| treasure.removed) {
            let Some(item) = self.items.get_mut(&treasure.id) else {
                continue;
            };
            if !item.removed {
                item.removed = true;
                debug!(
                    item_id = item.id,
                    col = item.cell.col,
                    row = item.cell.row,
                    x = item.position.x,
                    y = item.position.y,
                    "item collected"
                );
            }
        }
        let after = self.remaining_items();
        if after != before {
            info!(remaining = after, "items collected");
        }
    }

    fn remaining_items(&self) -> usize {
        self.items.values().filter(|item| !item.removed).count()
    }

    fn check_replan(&mut self, previous: &RoomDownsyncFrame) {
        let Some(current) = self.last_frame.as_ref() else {
            return;
        };
        if self.config.strategy == Strategy::Reactive
            || !self.replan.should_replan(previous, current)
        {
            return;
        }
        self.walk = self.plan();
        info!(
            plan_len = self.walk.as_ref().map_or(0, |walk| walk.path().len()),
            "re-planned"
        );
    }

    fn tick(&mut self) {
        match self.walk.as_ref().map(WalkProgress::is_terminal) {
            Some(false) => self.follow_path(),
            Some(true) if self.config.strategy != Strategy::Roam => {}
            _ => self.wall_follow(),
        }
    }

    fn follow_path(&mut self) {
        let Some(walk) = self.walk.as_mut() else {
            return;
        };
        let from = self.player.position;
        let step = walk.advance(from, self.config.step);
        if step.moved() {
            let to = walk.current_pos();
            if let Some(dir) = Direction::from_motion(to - from) {
                self.player.dir = dir;
            }
            self.player.position = to;
            debug!(?step, x = to.x, y = to.y, remaining = ?walk.remaining_distance(), "path step");
        }
        if step == WalkStep::ReachedGoal {
            info!(x = self.player.position.x, y = self.player.position.y, "goal reached");
        }
    }

    fn wall_follow(&mut self) {
        let Some(collision) = self.collision.as_mut() else {
            return;
        };
        let mut probe = PlayerProbe {
            world: &mut collision.world,
            body: collision.body,
        };
        match self
            .follower
            .probe(self.player.position, self.config.step, &mut probe)
        {
            ProbeOutcome::Moved { position, probes } => {
                debug!(probes, x = position.x, y = position.y, "wall-follow step");
                self.player.position = position;
                self.player.dir = self.follower.direction();
            }
            ProbeOutcome::Stuck { probes } => {
                warn!(probes, angle = self.follower.angle(), "boxed in, holding position");
            }
        }
    }
}

#[cfg(test)]
impl Bot {
    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn walk(&self) -> Option<&WalkProgress> {
        self.walk.as_ref()
    }

    pub fn items(&self) -> &BTreeMap<i32, Item> {
        &self.items
    }
}
