use crate::grid::{Cell, Grid};

const STRAIGHT_COST: u32 = 10;
const DIAGONAL_COST: u32 = 14;

/// Grid + obstacle mask in, ordered cell sequence out (start and goal inclusive).
pub trait PathSearch {
    fn find_path(&self, grid: &Grid, start: Cell, goal: Cell) -> Option<Vec<Cell>>;
}

/// Eight-neighbour A*. Diagonal steps are only taken when both adjacent
/// orthogonal cells are walkable, so paths never clip a blocked corner.
#[derive(Debug, Default, Clone, Copy)]
pub struct AStar;

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    cell: Cell,
    h_cost: u32,
    f_cost: u32,
    insertion_order: u64,
}

impl PathSearch for AStar {
    fn find_path(&self, grid: &Grid, start: Cell, goal: Cell) -> Option<Vec<Cell>> {
        let start_index = grid.index_of(start)?;
        let goal_index = grid.index_of(goal)?;
        if !grid.is_walkable(start) || !grid.is_walkable(goal) {
            return None;
        }
        if start == goal {
            return Some(vec![start]);
        }

        let node_count = grid.cell_count();
        let mut closed = vec![false; node_count];
        let mut best_g = vec![u32::MAX; node_count];
        let mut parent = vec![None::<usize>; node_count];
        let mut open = Vec::new();
        let mut next_insertion = 0u64;

        let start_h = octile_distance(start, goal);
        open.push(OpenNode {
            cell: start,
            h_cost: start_h,
            f_cost: start_h,
            insertion_order: next_insertion,
        });
        next_insertion += 1;
        best_g[start_index] = 0;

        while !open.is_empty() {
            let current = open.swap_remove(pick_best_open_node_index(&open));
            let Some(current_index) = grid.index_of(current.cell) else {
                continue;
            };
            if closed[current_index] {
                continue;
            }
            closed[current_index] = true;

            if current_index == goal_index {
                return reconstruct_path(grid, &parent, start_index, goal_index);
            }

            let current_g = best_g[current_index];
            for (neighbor, step_cost) in neighbors(grid, current.cell) {
                let Some(neighbor_index) = grid.index_of(neighbor) else {
                    continue;
                };
                if closed[neighbor_index] {
                    continue;
                }
                let tentative_g = current_g.saturating_add(step_cost);
                if tentative_g >= best_g[neighbor_index] {
                    continue;
                }

                best_g[neighbor_index] = tentative_g;
                parent[neighbor_index] = Some(current_index);
                let h_cost = octile_distance(neighbor, goal);
                open.push(OpenNode {
                    cell: neighbor,
                    h_cost,
                    f_cost: tentative_g.saturating_add(h_cost),
                    insertion_order: next_insertion,
                });
                next_insertion += 1;
            }
        }

        None
    }
}

fn neighbors(grid: &Grid, cell: Cell) -> Vec<(Cell, u32)> {
    let offset = |dc: i64, dr: i64| -> Option<Cell> {
        let col = u32::try_from(cell.col as i64 + dc).ok()?;
        let row = u32::try_from(cell.row as i64 + dr).ok()?;
        let candidate = Cell::new(col, row);
        grid.is_walkable(candidate).then_some(candidate)
    };

    let mut result = Vec::with_capacity(8);
    for (dc, dr) in [(0, -1), (1, 0), (0, 1), (-1, 0)] {
        if let Some(next) = offset(dc, dr) {
            result.push((next, STRAIGHT_COST));
        }
    }
    for (dc, dr) in [(1, -1), (1, 1), (-1, 1), (-1, -1)] {
        if offset(dc, 0).is_none() || offset(0, dr).is_none() {
            continue;
        }
        if let Some(next) = offset(dc, dr) {
            result.push((next, DIAGONAL_COST));
        }
    }
    result
}

fn pick_best_open_node_index(open: &[OpenNode]) -> usize {
    let mut best_index = 0usize;
    for index in 1..open.len() {
        if open_node_order_key(open[index]) < open_node_order_key(open[best_index]) {
            best_index = index;
        }
    }
    best_index
}

fn open_node_order_key(node: OpenNode) -> (u32, u32, u32, u32, u64) {
    (
        node.f_cost,
        node.h_cost,
        node.cell.row,
        node.cell.col,
        node.insertion_order,
    )
}

fn reconstruct_path(
    grid: &Grid,
    parent: &[Option<usize>],
    start_index: usize,
    goal_index: usize,
) -> Option<Vec<Cell>> {
    let mut cursor = goal_index;
    let mut indices = vec![cursor];
    while cursor != start_index {
        cursor = parent.get(cursor).copied().flatten()?;
        indices.push(cursor);
    }
    indices.reverse();
    Some(indices.into_iter().map(|index| grid.cell_at(index)).collect())
}

fn octile_distance(a: Cell, b: Cell) -> u32 {
    let dx = a.col.abs_diff(b.col);
    let dy = a.row.abs_diff(b.row);
    let diagonal = dx.min(dy);
    let straight = dx.max(dy) - diagonal;
    diagonal * DIAGONAL_COST + straight * STRAIGHT_COST
}
