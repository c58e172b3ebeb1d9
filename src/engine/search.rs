//! Weighted A* over a [`TerrainGrid`].
//!
//! The open list is a plain vector scanned for the minimum `f` on every
//! iteration. Ties resolve to the earliest-inserted node, and a node that is
//! rediscovered while still open keeps its original slot. Scratch scores live
//! in an arena indexed by grid cell so back-pointers are plain indices.

use crate::constants::HEURISTIC_WEIGHT;
use crate::grid::TerrainGrid;

use super::utils::manhattan;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NodeScore {
    pub g: i32,
    pub h: i32,
    pub f: i32,
    pub parent: Option<usize>,
}

/// Cells a replanning run drops from the frontier as soon as they show up.
#[derive(Clone, Copy, Debug, Default)]
pub struct Exclusions {
    pub conflict: Option<usize>,
    pub occupied: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchOutcome {
    /// Start-exclusive, goal-inclusive. Empty when the goal was not reached.
    pub path: Vec<usize>,
    pub expanded: usize,
}

/// Reusable open/closed working set and scratch arena.
#[derive(Clone, Debug, Default)]
pub struct SearchContext {
    open: Vec<usize>,
    in_open: Vec<bool>,
    closed: Vec<bool>,
    scores: Vec<NodeScore>,
    relax_open_nodes: bool,
}

impl SearchContext {
    pub fn new(cell_count: usize, relax_open_nodes: bool) -> Self {
        let mut ctx = Self {
            relax_open_nodes,
            ..Self::default()
        };
        ctx.reset(cell_count);
        ctx
    }

    /// Clears every cell's scratch state, not only the ones the last run touched.
    pub fn reset(&mut self, cell_count: usize) {
        self.open.clear();
        self.in_open.clear();
        self.in_open.resize(cell_count, false);
        self.closed.clear();
        self.closed.resize(cell_count, false);
        self.scores.clear();
        self.scores.resize(cell_count, NodeScore::default());
    }

    pub fn score(&self, idx: usize) -> NodeScore {
        self.scores[idx]
    }

    pub fn is_closed(&self, idx: usize) -> bool {
        self.closed[idx]
    }

    pub fn search(
        &mut self,
        grid: &TerrainGrid,
        start: usize,
        goal: usize,
        exclusions: Exclusions,
    ) -> SearchOutcome {
        self.reset(grid.len());
        self.push_open(start);
        let mut expanded = 0;

        while let Some(current) = self.pop_min() {
            self.closed[current] = true;
            if current == goal {
                break;
            }
            self.expand(grid, current, goal);
            if exclusions.conflict.is_some() || exclusions.occupied {
                self.drop_excluded(grid, exclusions);
            }
            expanded += 1;
        }

        SearchOutcome {
            path: self.reconstruct(start, goal),
            expanded,
        }
    }

    fn expand(&mut self, grid: &TerrainGrid, current: usize, goal: usize) {
        let goal_node = grid.node(goal);
        let (goal_x, goal_y) = (goal_node.x, goal_node.y);
        let current_g = self.scores[current].g;

        for neighbor in grid.neighbors(current) {
            if self.closed[neighbor] || !grid.node(neighbor).terrain.is_passable() {
                continue;
            }
            let g = current_g + grid.travel_cost(neighbor);
            if self.relax_open_nodes && self.in_open[neighbor] && self.scores[neighbor].g <= g {
                continue;
            }
            let node = grid.node(neighbor);
            let h = HEURISTIC_WEIGHT * manhattan(node.x, node.y, goal_x, goal_y);
            self.push_open(neighbor);
            self.scores[neighbor] = NodeScore {
                g,
                h,
                f: g + h,
                parent: Some(current),
            };
        }
    }

    fn drop_excluded(&mut self, grid: &TerrainGrid, exclusions: Exclusions) {
        let mut kept = Vec::with_capacity(self.open.len());
        for &idx in &self.open {
            let excluded = exclusions.conflict == Some(idx)
                || (exclusions.occupied && grid.occupant(idx).is_some());
            if excluded {
                self.in_open[idx] = false;
                self.scores[idx].parent = None;
            } else {
                kept.push(idx);
            }
        }
        self.open = kept;
    }

    fn push_open(&mut self, idx: usize) {
        if !self.in_open[idx] {
            self.in_open[idx] = true;
            self.open.push(idx);
        }
    }

    fn pop_min(&mut self) -> Option<usize> {
        let mut best: Option<(usize, i32)> = None;
        for (pos, &idx) in self.open.iter().enumerate() {
            let f = self.scores[idx].f;
            if best.map_or(true, |(_, best_f)| f < best_f) {
                best = Some((pos, f));
            }
        }
        let (pos, _) = best?;
        let idx = self.open.remove(pos);
        self.in_open[idx] = false;
        Some(idx)
    }

    fn reconstruct(&self, start: usize, goal: usize) -> Vec<usize> {
        if start == goal || !self.closed[goal] {
            return Vec::new();
        }
        let mut path = Vec::new();
        let mut cursor = goal;
        while let Some(parent) = self.scores[cursor].parent {
            path.push(cursor);
            cursor = parent;
            if path.len() > self.scores.len() {
                return Vec::new();
            }
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Terrain;
    use crate::world::grid_from_rows;

    fn make_grid(rows: &[&str]) -> TerrainGrid {
        let rows: Vec<String> = rows.iter().map(|row| row.to_string()).collect();
        grid_from_rows(&rows).expect("test grid should be valid")
    }

    fn coords(grid: &TerrainGrid, path: &[usize]) -> Vec<(i32, i32)> {
        path.iter()
            .map(|&idx| (grid.node(idx).x, grid.node(idx).y))
            .collect()
    }

    fn idx(grid: &TerrainGrid, x: i32, y: i32) -> usize {
        grid.index_of(x, y).expect("cell in bounds")
    }

    fn run(grid: &TerrainGrid, from: (i32, i32), to: (i32, i32)) -> (SearchContext, SearchOutcome) {
        let mut ctx = SearchContext::new(grid.len(), false);
        let outcome = ctx.search(
            grid,
            idx(grid, from.0, from.1),
            idx(grid, to.0, to.1),
            Exclusions::default(),
        );
        (ctx, outcome)
    }

    #[test]
    fn detours_around_single_land_cell() {
        let grid = make_grid(&["..@..", ".....", ".....", ".....", "....."]);
        let (_, outcome) = run(&grid, (0, 0), (4, 0));
        let cells = coords(&grid, &outcome.path);
        assert_eq!(
            cells,
            vec![(0, 1), (1, 1), (2, 1), (3, 1), (3, 0), (4, 0)]
        );
        let cost: i32 = outcome.path.iter().map(|&i| grid.travel_cost(i)).sum();
        assert_eq!(cost, 18);
    }

    #[test]
    fn path_is_connected_and_avoids_land() {
        let grid = make_grid(&[
            "..........",
            ".@@@@@@@@.",
            ".@......@.",
            ".@.@@@@.@.",
            "...@..@...",
        ]);
        let start = (2, 2);
        let (ctx, outcome) = run(&grid, start, (9, 0));
        assert!(!outcome.path.is_empty());

        let mut prev = start;
        let mut prev_g = 0;
        for &cell in &outcome.path {
            let node = grid.node(cell);
            assert_ne!(node.terrain, Terrain::Land);
            let step = (node.x - prev.0).abs() + (node.y - prev.1).abs();
            assert_eq!(step, 1, "path must be 4-connected");
            let g = ctx.score(cell).g;
            assert!(g >= prev_g);
            prev = (node.x, node.y);
            prev_g = g;
        }
    }

    #[test]
    fn unreachable_goal_yields_empty_path() {
        let grid = make_grid(&["..@..", "..@..", "..@.."]);
        let (_, outcome) = run(&grid, (0, 0), (4, 2));
        assert!(outcome.path.is_empty());
        assert!(outcome.expanded > 0);
    }

    #[test]
    fn start_equal_to_goal_is_empty() {
        let grid = make_grid(&["..."]);
        let (_, outcome) = run(&grid, (1, 0), (1, 0));
        assert!(outcome.path.is_empty());
        assert_eq!(outcome.expanded, 0);
    }

    #[test]
    fn repeated_search_with_reset_is_idempotent() {
        let grid = make_grid(&["..T..", ".@.@.", "T...T", ".@@..", "....."]);
        let mut ctx = SearchContext::new(grid.len(), false);
        let start = idx(&grid, 0, 0);
        let goal = idx(&grid, 4, 4);
        let first = ctx.search(&grid, start, goal, Exclusions::default());
        let second = ctx.search(&grid, start, goal, Exclusions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn prefers_cheaper_lane_between_equidistant_routes() {
        // Top lane is deep water (3 per step), bottom lane shallow (1 per step).
        let grid = make_grid(&[".....", "T@@@T", "TTTTT"]);
        let (_, outcome) = run(&grid, (0, 1), (4, 1));
        let cells = coords(&grid, &outcome.path);
        assert_eq!(
            cells,
            vec![(0, 2), (1, 2), (2, 2), (3, 2), (4, 2), (4, 1)]
        );
    }

    #[test]
    fn heuristic_is_weighted_manhattan() {
        let grid = make_grid(&["....."]);
        let (ctx, _) = run(&grid, (0, 0), (4, 0));
        let first_step = ctx.score(idx(&grid, 1, 0));
        assert_eq!(first_step.h, 2 * 3);
        assert_eq!(first_step.g, 3);
        assert_eq!(first_step.f, 9);
    }

    #[test]
    fn conflict_and_occupied_cells_are_dropped_from_frontier() {
        let mut grid = make_grid(&[".....", ".....", "....."]);
        let start = idx(&grid, 0, 1);
        let goal = idx(&grid, 4, 1);
        let conflict = idx(&grid, 1, 1);
        let occupied = idx(&grid, 2, 0);
        grid.set_occupant(occupied, Some(7));

        let mut ctx = SearchContext::new(grid.len(), false);
        let outcome = ctx.search(
            &grid,
            start,
            goal,
            Exclusions {
                conflict: Some(conflict),
                occupied: true,
            },
        );
        assert!(!outcome.path.is_empty());
        assert!(!outcome.path.contains(&conflict));
        assert!(!outcome.path.contains(&occupied));
        assert_eq!(outcome.path.last(), Some(&goal));
    }

    #[test]
    fn excluded_only_exit_leaves_goal_unreachable() {
        let grid = make_grid(&["@.@", "...", "@.@"]);
        let start = idx(&grid, 1, 0);
        let goal = idx(&grid, 1, 2);
        let mut ctx = SearchContext::new(grid.len(), false);
        let outcome = ctx.search(
            &grid,
            start,
            goal,
            Exclusions {
                conflict: Some(idx(&grid, 1, 1)),
                occupied: false,
            },
        );
        assert!(outcome.path.is_empty());
    }

    #[test]
    fn open_node_is_overwritten_unless_relaxing() {
        let grid = make_grid(&["T...", "T.@.", "TTT."]);
        let start = idx(&grid, 0, 0);
        let goal = idx(&grid, 3, 2);
        let rediscovered = idx(&grid, 1, 1);

        let mut plain = SearchContext::new(grid.len(), false);
        let mut relaxed = SearchContext::new(grid.len(), true);
        let a = plain.search(&grid, start, goal, Exclusions::default());
        let b = relaxed.search(&grid, start, goal, Exclusions::default());

        assert_eq!(plain.score(rediscovered).g, 6);
        assert_eq!(plain.score(rediscovered).parent, Some(idx(&grid, 1, 2)));
        assert_eq!(relaxed.score(rediscovered).g, 4);
        assert_eq!(relaxed.score(rediscovered).parent, Some(idx(&grid, 0, 1)));
        assert_eq!(a.path, b.path);
    }
}
