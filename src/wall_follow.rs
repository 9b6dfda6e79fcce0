use std::f64::consts::PI;

use tracing::debug;

use crate::collision::{BodyHandle, CollisionWorld};
use crate::geometry::{normalize_angle, Direction, Vec2};

pub const TURN_INCREMENT: f64 = PI / 16.0;
/// One full turn in `TURN_INCREMENT` steps.
pub const MAX_PROBES: u32 = 32;

pub trait CollisionProbe {
    fn would_collide(&mut self, candidate: Vec2) -> bool;
}

impl<F> CollisionProbe for F
where
    F: FnMut(Vec2) -> bool,
{
    fn would_collide(&mut self, candidate: Vec2) -> bool {
        self(candidate)
    }
}

/// Probes with the player's body in the local collision world.
pub struct PlayerProbe<'a> {
    pub world: &'a mut CollisionWorld,
    pub body: BodyHandle,
}

impl CollisionProbe for PlayerProbe<'_> {
    fn would_collide(&mut self, candidate: Vec2) -> bool {
        self.world.would_collide(self.body, candidate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    Moved { position: Vec2, probes: u32 },
    Stuck { probes: u32 },
}

/// Bump-and-turn walker. The facing persists between ticks so the next search
/// resumes at the last free heading.
#[derive(Debug, Clone, PartialEq)]
pub struct WallFollower {
    angle: f64,
    direction: Direction,
}

impl WallFollower {
    pub fn new(initial_angle: f64) -> Self {
        WallFollower {
            angle: normalize_angle(initial_angle),
            direction: Direction::from_quadrant(initial_angle),
        }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn probe(
        &mut self,
        position: Vec2,
        step: f64,
        oracle: &mut impl CollisionProbe,
    ) -> ProbeOutcome {
        for attempt in 0..MAX_PROBES {
            let heading = self.angle + attempt as f64 * TURN_INCREMENT;
            let candidate = position + Vec2::from_angle(heading) * step;
            if oracle.would_collide(candidate) {
                debug!(heading, "bumped, turning");
                continue;
            }
            self.angle = normalize_angle(heading);
            self.direction = Direction::from_quadrant(heading);
            return ProbeOutcome::Moved {
                position: candidate,
                probes: attempt + 1,
            };
        }
        ProbeOutcome::Stuck { probes: MAX_PROBES }
    }
}
