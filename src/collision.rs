//! Local collision oracle.
//!
//! A small 2D world: static and dynamic bodies with one shape
//! each, category filtering, and a contact list refreshed by `step`. Bodies are
//! moved by teleporting, never integrated, so a step only recomputes contacts.

use thiserror::Error;
use tracing::{debug, warn};

use crate::geometry::Vec2;
use crate::grid::{Cell, Grid, ObstacleFilter};
use crate::tiled::MapResources;

/// Broad-phase padding applied to every AABB, in world units.
const AABB_MARGIN: f64 = 0.1;
const CATEGORY_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollisionCategory {
    ControlledPlayer,
    Treasure,
    Trap,
    TrapBullet,
    Barrier,
    SpeedShoes,
}

impl CollisionCategory {
    pub const ALL: [CollisionCategory; CATEGORY_COUNT] = [
        CollisionCategory::ControlledPlayer,
        CollisionCategory::Treasure,
        CollisionCategory::Trap,
        CollisionCategory::TrapBullet,
        CollisionCategory::Barrier,
        CollisionCategory::SpeedShoes,
    ];

    pub const fn bits(self) -> u16 {
        match self {
            CollisionCategory::ControlledPlayer => 1 << 1,
            CollisionCategory::Treasure => 1 << 2,
            CollisionCategory::Trap => 1 << 3,
            CollisionCategory::TrapBullet => 1 << 4,
            CollisionCategory::Barrier => 1 << 5,
            CollisionCategory::SpeedShoes => 1 << 7,
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

pub type CompatibilityTable = [(CollisionCategory, &'static [CollisionCategory])];

/// Which categories each category collides with. Only the controlled player
/// interacts with anything; pickups and barriers never touch each other.
pub const STANDARD_COMPATIBILITY: &CompatibilityTable = &[
    (
        CollisionCategory::ControlledPlayer,
        &[
            CollisionCategory::Treasure,
            CollisionCategory::Trap,
            CollisionCategory::TrapBullet,
            CollisionCategory::Barrier,
            CollisionCategory::SpeedShoes,
        ],
    ),
    (CollisionCategory::Treasure, &[CollisionCategory::ControlledPlayer]),
    (CollisionCategory::Trap, &[CollisionCategory::ControlledPlayer]),
    (CollisionCategory::TrapBullet, &[CollisionCategory::ControlledPlayer]),
    (CollisionCategory::Barrier, &[CollisionCategory::ControlledPlayer]),
    (CollisionCategory::SpeedShoes, &[CollisionCategory::ControlledPlayer]),
];

#[derive(Debug, Error, PartialEq)]
pub enum CollisionError {
    #[error("compatibility table has no row for {0:?}")]
    MissingCategory(CollisionCategory),
    #[error("compatibility table lists {0:?} more than once")]
    DuplicateCategory(CollisionCategory),
    #[error("{from:?} collides with {to:?} but {to:?} does not collide with {from:?}")]
    Asymmetric {
        from: CollisionCategory,
        to: CollisionCategory,
    },
    #[error("invalid shape: {0}")]
    InvalidShape(String),
}

/// Category masks derived from a validated compatibility table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionFilter {
    masks: [u16; CATEGORY_COUNT],
}

impl CollisionFilter {
    pub fn from_table(table: &CompatibilityTable) -> Result<Self, CollisionError> {
        let mut masks = [0u16; CATEGORY_COUNT];
        let mut seen = [false; CATEGORY_COUNT];
        for (category, collides_with) in table {
            if seen[category.slot()] {
                return Err(CollisionError::DuplicateCategory(*category));
            }
            seen[category.slot()] = true;
            masks[category.slot()] = collides_with
                .iter()
                .fold(0u16, |mask, other| mask | other.bits());
        }
        if let Some(category) = CollisionCategory::ALL
            .iter()
            .find(|category| !seen[category.slot()])
        {
            return Err(CollisionError::MissingCategory(*category));
        }
        for (from, collides_with) in table {
            for to in collides_with.iter() {
                if masks[to.slot()] & from.bits() == 0 {
                    return Err(CollisionError::Asymmetric {
                        from: *from,
                        to: *to,
                    });
                }
            }
        }
        Ok(CollisionFilter { masks })
    }

    pub fn standard() -> Result<Self, CollisionError> {
        CollisionFilter::from_table(STANDARD_COMPATIBILITY)
    }

    pub fn mask(&self, category: CollisionCategory) -> u16 {
        self.masks[category.slot()]
    }

    pub fn should_collide(&self, a: CollisionCategory, b: CollisionCategory) -> bool {
        self.mask(a) & b.bits() != 0 && self.mask(b) & a.bits() != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle { radius: f64 },
    /// Body-local vertices of a simple (not necessarily convex) polygon.
    Polygon { vertices: Vec<Vec2> },
}

impl Shape {
    fn validate(&self) -> Result<(), CollisionError> {
        match self {
            Shape::Circle { radius } if !(radius.is_finite() && *radius > 0.0) => Err(
                CollisionError::InvalidShape(format!("circle radius {radius} must be positive")),
            ),
            Shape::Polygon { vertices } if vertices.len() < 3 => Err(CollisionError::InvalidShape(
                format!("polygon needs at least 3 vertices, got {}", vertices.len()),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTag {
    Player(i32),
    /// Index into the world's barrier list.
    Barrier(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle(usize);

#[derive(Debug, Clone)]
pub struct BodyDef {
    pub kind: BodyKind,
    pub position: Vec2,
    pub shape: Shape,
    pub category: CollisionCategory,
    pub tag: BodyTag,
}

#[derive(Debug, Clone)]
struct Body {
    def: BodyDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub a: BodyHandle,
    pub b: BodyHandle,
    pub touching: bool,
}

impl Contact {
    pub fn involves(&self, handle: BodyHandle) -> bool {
        self.a == handle || self.b == handle
    }

    pub fn other(&self, handle: BodyHandle) -> BodyHandle {
        if self.a == handle {
            self.b
        } else {
            self.a
        }
    }
}

/// A static obstacle built from one obstacle-layer tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Barrier {
    pub cell: Cell,
    pub tile_id: u32,
}

#[derive(Debug, Clone)]
pub struct CollisionWorld {
    filter: CollisionFilter,
    bodies: Vec<Body>,
    contacts: Vec<Contact>,
    barriers: Vec<Barrier>,
}

impl CollisionWorld {
    pub fn new(filter: CollisionFilter) -> Self {
        CollisionWorld {
            filter,
            bodies: Vec::new(),
            contacts: Vec::new(),
            barriers: Vec::new(),
        }
    }

    pub fn create_body(&mut self, def: BodyDef) -> Result<BodyHandle, CollisionError> {
        def.shape.validate()?;
        self.bodies.push(Body { def });
        Ok(BodyHandle(self.bodies.len() - 1))
    }

    pub fn create_player_body(
        &mut self,
        player_id: i32,
        position: Vec2,
        radius: f64,
    ) -> Result<BodyHandle, CollisionError> {
        self.create_body(BodyDef {
            kind: BodyKind::Dynamic,
            position,
            shape: Shape::Circle { radius },
            category: CollisionCategory::ControlledPlayer,
            tag: BodyTag::Player(player_id),
        })
    }

    pub fn tag(&self, handle: BodyHandle) -> BodyTag {
        self.bodies[handle.0].def.tag
    }

    pub fn set_position(&mut self, handle: BodyHandle, position: Vec2) {
        self.bodies[handle.0].def.position = position;
    }

    /// Rebuilds the contact list. A contact exists while two filtered-in bodies'
    /// padded AABBs overlap; it is touching while their shapes overlap.
    pub fn step(&mut self) {
        self.contacts.clear();
        for i in 0..self.bodies.len() {
            for j in (i + 1)..self.bodies.len() {
                let (a, b) = (&self.bodies[i].def, &self.bodies[j].def);
                if a.kind == BodyKind::Static && b.kind == BodyKind::Static {
                    continue;
                }
                if !self.filter.should_collide(a.category, b.category) {
                    continue;
                }
                if !aabb(a).overlaps(&aabb(b)) {
                    continue;
                }
                self.contacts.push(Contact {
                    a: BodyHandle(i),
                    b: BodyHandle(j),
                    touching: shapes_overlap(a, b),
                });
            }
        }
    }

    pub fn contacts_of(&self, handle: BodyHandle) -> impl Iterator<Item = &Contact> {
        self.contacts
            .iter()
            .filter(move |contact| contact.involves(handle))
    }

    /// Teleports `body` to `candidate`, steps once, and reports whether any of
    /// its contacts is touching. The body is left at `candidate`.
    pub fn would_collide(&mut self, body: BodyHandle, candidate: Vec2) -> bool {
        self.set_position(body, candidate);
        self.step();
        let touching = self.contacts_of(body).find(|contact| contact.touching).copied();
        if let Some(contact) = touching {
            match self.tag(contact.other(body)) {
                BodyTag::Barrier(index) => {
                    if let Some(barrier) = self.barriers.get(index) {
                        debug!(
                            col = barrier.cell.col,
                            row = barrier.cell.row,
                            tile_id = barrier.tile_id,
                            x = candidate.x,
                            y = candidate.y,
                            "probe touches barrier"
                        );
                    }
                }
                BodyTag::Player(player_id) => {
                    debug!(player_id, x = candidate.x, y = candidate.y, "probe touches player");
                }
            }
            return true;
        }
        false
    }

    /// Creates one static body per obstacle tile and returns how many were built.
    pub fn build_static_obstacles(
        &mut self,
        resources: &MapResources,
        grid: &Grid,
        obstacles: &ObstacleFilter,
    ) -> Result<usize, CollisionError> {
        let tile_size = grid.tile_size();
        let half_tile = tile_size * 0.5;
        let mut built = 0usize;
        for tile in obstacles.tiles(&resources.map) {
            let cell = grid.cell_at(tile.index);
            let position = grid.cell_to_world(cell);
            let boundary = resources
                .tileset
                .tiles
                .get(&tile.local_id)
                .and_then(|def| def.boundary.as_ref());
            let shape = match boundary.map(|points| closed_polygon(points, half_tile)) {
                Some(vertices) if vertices.len() >= 3 => Shape::Polygon { vertices },
                Some(_) => {
                    warn!(tile_id = tile.local_id, "degenerate barrier boundary, using a circle");
                    Shape::Circle {
                        radius: half_tile.x.min(half_tile.y),
                    }
                }
                None => Shape::Circle {
                    radius: half_tile.x.min(half_tile.y),
                },
            };

            let barrier_index = self.barriers.len();
            self.create_body(BodyDef {
                kind: BodyKind::Static,
                position,
                shape,
                category: CollisionCategory::Barrier,
                tag: BodyTag::Barrier(barrier_index),
            })?;
            self.barriers.push(Barrier {
                cell,
                tile_id: tile.local_id,
            });
            built += 1;
        }
        Ok(built)
    }
}

/// Tile-local boundary points to body-local vertices, dropping a repeated
/// closing point.
fn closed_polygon(points: &[Vec2], half_tile: Vec2) -> Vec<Vec2> {
    let mut vertices = points
        .iter()
        .map(|point| *point - half_tile)
        .collect::<Vec<_>>();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

#[derive(Debug, Clone, Copy)]
struct Aabb {
    min: Vec2,
    max: Vec2,
}

impl Aabb {
    fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

fn aabb(def: &BodyDef) -> Aabb {
    let margin = Vec2::new(AABB_MARGIN, AABB_MARGIN);
    match &def.shape {
        Shape::Circle { radius } => {
            let extent = Vec2::new(*radius, *radius) + margin;
            Aabb {
                min: def.position - extent,
                max: def.position + extent,
            }
        }
        Shape::Polygon { vertices } => {
            let mut min = Vec2::new(f64::INFINITY, f64::INFINITY);
            let mut max = Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
            for vertex in vertices {
                let world = def.position + *vertex;
                min = Vec2::new(min.x.min(world.x), min.y.min(world.y));
                max = Vec2::new(max.x.max(world.x), max.y.max(world.y));
            }
            Aabb {
                min: min - margin,
                max: max + margin,
            }
        }
    }
}

fn world_vertices(position: Vec2, vertices: &[Vec2]) -> Vec<Vec2> {
    vertices.iter().map(|vertex| position + *vertex).collect()
}

fn shapes_overlap(a: &BodyDef, b: &BodyDef) -> bool {
    match (&a.shape, &b.shape) {
        (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => {
            a.position.distance(b.position) < ra + rb
        }
        (Shape::Circle { radius }, Shape::Polygon { vertices }) => {
            circle_polygon_overlap(a.position, *radius, &world_vertices(b.position, vertices))
        }
        (Shape::Polygon { vertices }, Shape::Circle { radius }) => {
            circle_polygon_overlap(b.position, *radius, &world_vertices(a.position, vertices))
        }
        (Shape::Polygon { vertices: va }, Shape::Polygon { vertices: vb }) => polygons_overlap(
            &world_vertices(a.position, va),
            &world_vertices(b.position, vb),
        ),
    }
}

fn edges(polygon: &[Vec2]) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
    polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(start, end)| (*start, *end))
}

fn point_in_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    let mut inside = false;
    for (start, end) in edges(polygon) {
        if (start.y > point.y) != (end.y > point.y) {
            let crossing_x = start.x + (point.y - start.y) / (end.y - start.y) * (end.x - start.x);
            if point.x < crossing_x {
                inside = !inside;
            }
        }
    }
    inside
}

fn segment_distance(point: Vec2, start: Vec2, end: Vec2) -> f64 {
    let segment = end - start;
    let length_sq = segment.dot(segment);
    if length_sq == 0.0 {
        return point.distance(start);
    }
    let t = ((point - start).dot(segment) / length_sq).clamp(0.0, 1.0);
    point.distance(start + segment * t)
}

fn circle_polygon_overlap(centre: Vec2, radius: f64, polygon: &[Vec2]) -> bool {
    point_in_polygon(centre, polygon)
        || edges(polygon).any(|(start, end)| segment_distance(centre, start, end) < radius)
}

fn cross(a: Vec2, b: Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

fn segments_intersect(p1: Vec2, p2: Vec2, q1: Vec2, q2: Vec2) -> bool {
    let d1 = cross(q2 - q1, p1 - q1);
    let d2 = cross(q2 - q1, p2 - q1);
    let d3 = cross(p2 - p1, q1 - p1);
    let d4 = cross(p2 - p1, q2 - p1);
    (d1 > 0.0) != (d2 > 0.0) && (d3 > 0.0) != (d4 > 0.0) && d1 != 0.0 && d2 != 0.0
}

fn polygons_overlap(a: &[Vec2], b: &[Vec2]) -> bool {
    if a.iter().any(|vertex| point_in_polygon(*vertex, b))
        || b.iter().any(|vertex| point_in_polygon(*vertex, a))
    {
        return true;
    }
    edges(a).any(|(p1, p2)| edges(b).any(|(q1, q2)| segments_intersect(p1, p2, q1, q2)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiled::fixtures;

    fn square(half: f64) -> Shape {
        Shape::Polygon {
            vertices: vec![
                Vec2::new(-half, -half),
                Vec2::new(half, -half),
                Vec2::new(half, half),
                Vec2::new(-half, half),
            ],
        }
    }

    fn world_with_block(at: Vec2) -> (CollisionWorld, BodyHandle) {
        let mut world = CollisionWorld::new(CollisionFilter::standard().expect("filter"));
        world
            .create_body(BodyDef {
                kind: BodyKind::Static,
                position: at,
                shape: square(32.0),
                category: CollisionCategory::Barrier,
                tag: BodyTag::Barrier(0),
            })
            .expect("block");
        let player = world
            .create_player_body(10, Vec2::ZERO, 12.0)
            .expect("player");
        (world, player)
    }

    #[test]
    fn standard_table_is_symmetric_and_player_centric() {
        let filter = CollisionFilter::standard().expect("standard table");
        assert!(filter.should_collide(
            CollisionCategory::ControlledPlayer,
            CollisionCategory::Barrier
        ));
        assert!(!filter.should_collide(CollisionCategory::Barrier, CollisionCategory::Barrier));
        assert!(!filter.should_collide(CollisionCategory::Treasure, CollisionCategory::Trap));
        assert_eq!(
            filter.mask(CollisionCategory::Barrier),
            CollisionCategory::ControlledPlayer.bits()
        );
    }

    #[test]
    fn one_sided_table_is_rejected() {
        let table: &CompatibilityTable = &[
            (CollisionCategory::ControlledPlayer, &[CollisionCategory::Barrier]),
            (CollisionCategory::Treasure, &[]),
            (CollisionCategory::Trap, &[]),
            (CollisionCategory::TrapBullet, &[]),
            (CollisionCategory::Barrier, &[]),
            (CollisionCategory::SpeedShoes, &[]),
        ];
        assert_eq!(
            CollisionFilter::from_table(table),
            Err(CollisionError::Asymmetric {
                from: CollisionCategory::ControlledPlayer,
                to: CollisionCategory::Barrier,
            })
        );
    }

    #[test]
    fn incomplete_table_is_rejected() {
        let table: &CompatibilityTable = &[(CollisionCategory::Barrier, &[])];
        assert!(matches!(
            CollisionFilter::from_table(table),
            Err(CollisionError::MissingCategory(_))
        ));
    }

    #[test]
    fn probe_into_block_collides_and_clear_space_does_not() {
        let (mut world, player) = world_with_block(Vec2::new(100.0, 0.0));
        assert!(world.would_collide(player, Vec2::new(60.0, 0.0)));
        assert_eq!(world.bodies[player.0].def.position, Vec2::new(60.0, 0.0));
        assert!(!world.would_collide(player, Vec2::new(0.0, 0.0)));
        // exactly tangent is not touching
        assert!(!world.would_collide(player, Vec2::new(56.0, 0.0)));
    }

    #[test]
    fn corner_proximity_is_a_contact_but_not_touching() {
        let (mut world, player) = world_with_block(Vec2::new(0.0, 0.0));
        world.set_position(player, Vec2::new(42.0, 42.0));
        world.step();
        let contacts = world.contacts_of(player).copied().collect::<Vec<_>>();
        assert_eq!(contacts.len(), 1);
        assert!(!contacts[0].touching);
    }

    #[test]
    fn filtered_out_pairs_produce_no_contacts() {
        let mut world = CollisionWorld::new(CollisionFilter::standard().expect("filter"));
        let treasure = world
            .create_body(BodyDef {
                kind: BodyKind::Dynamic,
                position: Vec2::ZERO,
                shape: Shape::Circle { radius: 10.0 },
                category: CollisionCategory::Treasure,
                tag: BodyTag::Barrier(0),
            })
            .expect("treasure");
        world
            .create_body(BodyDef {
                kind: BodyKind::Static,
                position: Vec2::ZERO,
                shape: square(10.0),
                category: CollisionCategory::Barrier,
                tag: BodyTag::Barrier(1),
            })
            .expect("barrier");
        assert!(!world.would_collide(treasure, Vec2::new(1.0, 1.0)));
        assert_eq!(world.contacts_of(treasure).count(), 0);
    }

    #[test]
    fn degenerate_shapes_are_rejected() {
        let mut world = CollisionWorld::new(CollisionFilter::standard().expect("filter"));
        assert!(world.create_player_body(1, Vec2::ZERO, 0.0).is_err());
    }

    #[test]
    fn static_obstacles_follow_obstacle_layers() {
        let resources = fixtures::resources();
        let filter = ObstacleFilter::default();
        let grid = Grid::from_map(&resources.map, &filter);
        let mut world = CollisionWorld::new(CollisionFilter::standard().expect("filter"));

        let built = world
            .build_static_obstacles(&resources, &grid, &filter)
            .expect("obstacles");
        assert_eq!(built, 3);

        assert_eq!(world.barriers[0], Barrier { cell: Cell::new(1, 0), tile_id: 1 });
        assert_eq!(world.barriers[1], Barrier { cell: Cell::new(1, 1), tile_id: 5 });
        let first = &world.bodies[0].def;
        assert_eq!(first.position, Vec2::new(96.0, 32.0));
        assert!(matches!(&first.shape, Shape::Polygon { vertices } if vertices.len() == 4));
        assert!(matches!(world.bodies[1].def.shape, Shape::Circle { radius } if radius == 32.0));

        let player = world
            .create_player_body(10, Vec2::new(32.0, 32.0), 16.0)
            .expect("player");
        assert!(world.would_collide(player, Vec2::new(60.0, 32.0)));
        assert!(!world.would_collide(player, Vec2::new(32.0, 160.0)));
    }
}
