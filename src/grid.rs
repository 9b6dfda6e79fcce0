use crate::geometry::Vec2;
use crate::tiled::{LayerTile, TileMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub col: u32,
    pub row: u32,
}

impl Cell {
    pub const fn new(col: u32, row: u32) -> Self {
        Cell { col, row }
    }
}

/// Which tile layers (and from which tileset) count as static obstacles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObstacleFilter {
    pub layer_names: Vec<String>,
    pub tileset_source: String,
}

impl Default for ObstacleFilter {
    fn default() -> Self {
        ObstacleFilter {
            layer_names: vec![
                "tile_1 human skeleton".to_string(),
                "tile_1 board".to_string(),
                "tile_1 stone".to_string(),
            ],
            tileset_source: "tile_1.tsx".to_string(),
        }
    }
}

impl ObstacleFilter {
    pub fn tiles<'a>(&'a self, map: &'a TileMap) -> impl Iterator<Item = LayerTile<'a>> + 'a {
        map.layers
            .iter()
            .filter(move |layer| self.layer_names.iter().any(|name| *name == layer.name))
            .flat_map(move |layer| map.layer_tiles(layer))
            .filter(move |tile| tile.tileset_source == self.tileset_source)
    }
}

/// Walkability grid plus the cell <-> world mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: u32,
    height: u32,
    tile_size: Vec2,
    walkable: Vec<bool>,
}

impl Grid {
    pub fn from_map(map: &TileMap, filter: &ObstacleFilter) -> Self {
        let mut grid = Grid {
            width: map.width,
            height: map.height,
            tile_size: Vec2::new(map.tile_width as f64, map.tile_height as f64),
            walkable: vec![true; map.cell_count],
        };
        for tile in filter.tiles(map) {
            if let Some(walkable) = grid.walkable.get_mut(tile.index) {
                *walkable = false;
            }
        }
        grid
    }

    pub fn tile_size(&self) -> Vec2 {
        self.tile_size
    }

    pub fn cell_count(&self) -> usize {
        self.walkable.len()
    }

    pub fn index_of(&self, cell: Cell) -> Option<usize> {
        if cell.col >= self.width || cell.row >= self.height {
            return None;
        }
        Some(cell.row as usize * self.width as usize + cell.col as usize)
    }

    pub fn cell_at(&self, index: usize) -> Cell {
        let width = self.width as usize;
        Cell::new((index % width) as u32, (index / width) as u32)
    }

    pub fn is_walkable(&self, cell: Cell) -> bool {
        self.index_of(cell)
            .and_then(|index| self.walkable.get(index))
            .copied()
            .unwrap_or(false)
    }

    pub fn cell_to_world(&self, cell: Cell) -> Vec2 {
        Vec2::new(
            (cell.col as f64 + 0.5) * self.tile_size.x,
            (cell.row as f64 + 0.5) * self.tile_size.y,
        )
    }

    /// Cell containing `position`; points outside the map clamp to the nearest edge cell.
    pub fn world_to_cell(&self, position: Vec2) -> Cell {
        let col = (position.x / self.tile_size.x).floor();
        let row = (position.y / self.tile_size.y).floor();
        Cell::new(
            clamp_axis(col, self.width),
            clamp_axis(row, self.height),
        )
    }
}

#[cfg(test)]
impl Grid {
    pub fn open(width: u32, height: u32, tile_size: Vec2) -> Self {
        Grid {
            width,
            height,
            tile_size,
            walkable: vec![true; width as usize * height as usize],
        }
    }

    pub fn set_blocked(&mut self, cell: Cell) {
        if let Some(index) = self.index_of(cell) {
            self.walkable[index] = false;
        }
    }
}

fn clamp_axis(value: f64, len: u32) -> u32 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    (value as u64).min(len.saturating_sub(1) as u64) as u32
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::tiled::fixtures::TMX;
    use crate::tiled::parse_tmx;

    fn grid_4x3() -> Grid {
        let map = parse_tmx(Path::new("m.tmx"), TMX).expect("tmx");
        Grid::from_map(&map, &ObstacleFilter::default())
    }

    #[test]
    fn obstacle_layers_block_their_cells() {
        let grid = grid_4x3();
        assert!(!grid.is_walkable(Cell::new(1, 0)));
        assert!(!grid.is_walkable(Cell::new(1, 1)));
        assert!(!grid.is_walkable(Cell::new(3, 2)));
        assert!(grid.is_walkable(Cell::new(0, 0)));
        // the ground layer is not an obstacle layer
        assert!(grid.is_walkable(Cell::new(2, 2)));
        assert!(!grid.is_walkable(Cell::new(4, 0)));
    }

    #[test]
    fn unknown_tileset_source_contributes_nothing() {
        let map = parse_tmx(Path::new("m.tmx"), TMX).expect("tmx");
        let filter = ObstacleFilter {
            tileset_source: "other.tsx".to_string(),
            ..ObstacleFilter::default()
        };
        let grid = Grid::from_map(&map, &filter);
        assert!(grid.is_walkable(Cell::new(1, 0)));
    }

    #[test]
    fn cell_round_trip_lands_on_cell_centre() {
        let grid = grid_4x3();
        let point = Vec2::new(100.0, 130.0);
        let centre = grid.cell_to_world(grid.world_to_cell(point));
        assert_eq!(centre, Vec2::new(96.0, 160.0));
        assert_eq!(grid.cell_to_world(grid.world_to_cell(centre)), centre);
    }

    #[test]
    fn outside_points_clamp_to_nearest_cell() {
        let grid = grid_4x3();
        assert_eq!(grid.world_to_cell(Vec2::new(-50.0, -1.0)), Cell::new(0, 0));
        assert_eq!(grid.world_to_cell(Vec2::new(1e6, 1e6)), Cell::new(3, 2));
    }

    #[test]
    fn index_and_cell_are_inverse() {
        let grid = grid_4x3();
        assert_eq!(grid.cell_count(), 12);
        for index in 0..grid.cell_count() {
            assert_eq!(grid.index_of(grid.cell_at(index)), Some(index));
        }
    }
}
