pub const TICK_RATE: u32 = 20;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;

pub const MAX_MAP_SIZE: usize = 200;
pub const CELL_SIZE_WORLD: f32 = 100.0;

pub const LAND_COST: i32 = 100;
pub const DEEP_WATER_COST: i32 = 3;
pub const SHALLOW_WATER_COST: i32 = 1;
pub const HEURISTIC_WEIGHT: i32 = 2;

pub const SHIP_MOVE_SPEED: f32 = 500.0;
pub const CRASH_DISTANCE: f32 = 90.0;
pub const CRASH_PENALTY: i32 = 50;
pub const MAX_REPLAN_ATTEMPTS: usize = 3;

pub const BATCH_SIZES: [usize; 7] = [1, 2, 5, 10, 25, 50, 100];
pub const SCENARIO_START_INDEX: usize = 200;

/// Upper bound on ticks a single batch may take before it is flagged.
pub fn get_tick_safety_limit(ship_count: usize, width: usize, height: usize) -> u64 {
    let span = (width + height).max(1) as u64;
    let per_cell_ticks = (CELL_SIZE_WORLD / SHIP_MOVE_SPEED * TICK_RATE as f32).ceil() as u64;
    (span * per_cell_ticks.max(1) * 4).max(600) + ship_count as u64 * 20
}
