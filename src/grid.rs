use crate::constants::CELL_SIZE_WORLD;
use crate::types::{Terrain, Vec2};

#[derive(Clone, Debug)]
pub struct GridNode {
    pub x: i32,
    pub y: i32,
    pub terrain: Terrain,
    pub occupant: Option<usize>,
}

impl GridNode {
    pub fn travel_cost(&self) -> i32 {
        self.terrain.travel_cost()
    }

    pub fn coords(&self) -> Vec2 {
        Vec2 {
            x: self.x,
            y: self.y,
        }
    }

    pub fn world_position(&self) -> (f32, f32) {
        world_position(self.x, self.y)
    }
}

/// Row-major grid of nodes. Node indices are stable for the grid's lifetime.
#[derive(Clone, Debug)]
pub struct TerrainGrid {
    pub width: usize,
    pub height: usize,
    nodes: Vec<GridNode>,
}

impl TerrainGrid {
    pub fn from_terrain(width: usize, height: usize, terrain: &[Terrain]) -> Self {
        let mut nodes = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                nodes.push(GridNode {
                    x: x as i32,
                    y: y as i32,
                    terrain: terrain
                        .get(y * width + x)
                        .copied()
                        .unwrap_or(Terrain::DeepWater),
                    occupant: None,
                });
            }
        }
        Self {
            width,
            height,
            nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    pub fn index_of(&self, x: i32, y: i32) -> Option<usize> {
        if !self.in_bounds(x, y) {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    pub fn node(&self, idx: usize) -> &GridNode {
        &self.nodes[idx]
    }

    pub fn node_at(&self, x: i32, y: i32) -> Option<&GridNode> {
        self.index_of(x, y).map(|idx| &self.nodes[idx])
    }

    pub fn travel_cost(&self, idx: usize) -> i32 {
        self.nodes[idx].travel_cost()
    }

    pub fn occupant(&self, idx: usize) -> Option<usize> {
        self.nodes[idx].occupant
    }

    pub fn set_occupant(&mut self, idx: usize, occupant: Option<usize>) {
        self.nodes[idx].occupant = occupant;
    }

    pub fn clear_occupancy(&mut self) {
        for node in &mut self.nodes {
            node.occupant = None;
        }
    }

    /// Orthogonal neighbors in expansion order: +x, -x, +y, -y.
    pub fn neighbors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let node = &self.nodes[idx];
        let (x, y) = (node.x, node.y);
        [(x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)]
            .into_iter()
            .filter_map(move |(nx, ny)| self.index_of(nx, ny))
    }

    pub fn rows(&self) -> Vec<String> {
        self.nodes
            .chunks(self.width.max(1))
            .map(|row| row.iter().map(|node| node.terrain.symbol()).collect())
            .collect()
    }

    pub fn water_cells(&self) -> Vec<Vec2> {
        self.nodes
            .iter()
            .filter(|node| node.terrain.is_passable())
            .map(GridNode::coords)
            .collect()
    }
}

pub fn world_position(x: i32, y: i32) -> (f32, f32) {
    (x as f32 * CELL_SIZE_WORLD, y as f32 * CELL_SIZE_WORLD)
}

/// Nearest cell to a world position.
pub fn cell_of_world(wx: f32, wy: f32) -> (i32, i32) {
    (
        (wx / CELL_SIZE_WORLD).round() as i32,
        (wy / CELL_SIZE_WORLD).round() as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_grid(width: usize, height: usize) -> TerrainGrid {
        TerrainGrid::from_terrain(width, height, &vec![Terrain::DeepWater; width * height])
    }

    #[test]
    fn neighbors_follow_expansion_order_and_bounds() {
        let grid = make_grid(3, 3);
        let center = grid.index_of(1, 1).expect("center in bounds");
        let coords: Vec<(i32, i32)> = grid
            .neighbors(center)
            .map(|idx| (grid.node(idx).x, grid.node(idx).y))
            .collect();
        assert_eq!(coords, vec![(2, 1), (0, 1), (1, 2), (1, 0)]);

        let corner = grid.index_of(0, 0).expect("corner in bounds");
        assert_eq!(grid.neighbors(corner).count(), 2);
    }

    #[test]
    fn index_of_rejects_out_of_bounds() {
        let grid = make_grid(4, 2);
        assert_eq!(grid.index_of(3, 1), Some(7));
        assert_eq!(grid.index_of(4, 0), None);
        assert_eq!(grid.index_of(0, -1), None);
    }

    #[test]
    fn clear_occupancy_drops_every_claim() {
        let mut grid = make_grid(2, 2);
        grid.set_occupant(0, Some(1));
        grid.set_occupant(3, Some(2));
        grid.clear_occupancy();
        assert!((0..grid.len()).all(|idx| grid.occupant(idx).is_none()));
    }

    #[test]
    fn world_cell_round_trip_snaps_to_nearest() {
        assert_eq!(world_position(3, 2), (300.0, 200.0));
        assert_eq!(cell_of_world(260.0, 140.0), (3, 1));
    }
}
