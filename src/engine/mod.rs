use std::collections::VecDeque;

use crate::constants::{
    CRASH_DISTANCE, CRASH_PENALTY, MAX_REPLAN_ATTEMPTS, SHIP_MOVE_SPEED, TICK_MS,
};
use crate::grid::{cell_of_world, TerrainGrid};
use crate::types::{
    ActualReport, BatchSummary, FleetEvent, PlanReport, ScenarioEntry, ShipPlanStats, ShipState,
    ShipView, Snapshot, Vec2,
};
use crate::world::{validate_entry, WorldResult};

mod replan;
mod search;
mod ship_system;
mod utils;

pub use self::replan::ReplanError;
pub use self::search::{Exclusions, NodeScore, SearchContext, SearchOutcome};

#[derive(Clone, Copy, Debug)]
pub struct FleetOptions {
    pub move_speed: f32,
    pub tolerance: f32,
    pub crash_distance: f32,
    pub crash_penalty: i32,
    pub replanning: bool,
    pub max_replan_attempts: usize,
    pub relax_open_nodes: bool,
    pub individual_stats: bool,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            move_speed: SHIP_MOVE_SPEED,
            tolerance: SHIP_MOVE_SPEED / 20.0,
            crash_distance: CRASH_DISTANCE,
            crash_penalty: CRASH_PENALTY,
            replanning: true,
            max_replan_attempts: MAX_REPLAN_ATTEMPTS,
            relax_open_nodes: false,
            individual_stats: false,
        }
    }
}

#[derive(Clone, Debug)]
struct ShipInternal {
    id: String,
    position: (f32, f32),
    start: usize,
    goal: usize,
    path: VecDeque<usize>,
    last_node: Option<usize>,
    potential_crash: Option<usize>,
    state: ShipState,
    first_move: bool,
    replan_attempts: usize,
    cells_searched: usize,
    planned_cost: i32,
    planned_actions: usize,
}

#[derive(Clone, Debug)]
pub struct FleetEngine {
    pub options: FleetOptions,

    grid: TerrainGrid,
    search: SearchContext,
    ships: Vec<ShipInternal>,
    events: Vec<FleetEvent>,
    plan: Option<PlanReport>,

    search_count: usize,
    path_cost_taken: Vec<i32>,
    crash_penalty: i32,
    crashes: usize,
    replans: usize,
    failed_replans: usize,
    tick_counter: u64,
    elapsed_ms: u64,
}

impl FleetEngine {
    /// Places one ship per entry on its start cell. Occupancy left over from a
    /// previous batch is cleared.
    pub fn new(
        mut grid: TerrainGrid,
        entries: &[ScenarioEntry],
        options: FleetOptions,
    ) -> WorldResult<Self> {
        grid.clear_occupancy();
        let mut ships = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            validate_entry(&grid, entry)?;
            let (Some(start), Some(goal)) = (
                grid.index_of(entry.start.x, entry.start.y),
                grid.index_of(entry.goal.x, entry.goal.y),
            ) else {
                continue;
            };
            ships.push(ShipInternal {
                id: format!("ship_{}", idx + 1),
                position: grid.node(start).world_position(),
                start,
                goal,
                path: VecDeque::new(),
                last_node: None,
                potential_crash: None,
                state: ShipState::Idle,
                first_move: true,
                replan_attempts: 0,
                cells_searched: 0,
                planned_cost: 0,
                planned_actions: 0,
            });
        }

        Ok(Self {
            search: SearchContext::new(grid.len(), options.relax_open_nodes),
            options,
            grid,
            ships,
            events: Vec::new(),
            plan: None,
            search_count: 0,
            path_cost_taken: Vec::new(),
            crash_penalty: 0,
            crashes: 0,
            replans: 0,
            failed_replans: 0,
            tick_counter: 0,
            elapsed_ms: 0,
        })
    }

    /// Plans every ship in list order, one full search at a time.
    pub fn compute_paths(&mut self) -> PlanReport {
        for idx in 0..self.ships.len() {
            self.compute_path(idx);
        }
        let report = self.build_plan_report();
        self.plan = Some(report.clone());
        report
    }

    /// Returns the planned path length for the ship.
    pub fn compute_path(&mut self, ship_idx: usize) -> usize {
        if ship_idx >= self.ships.len() {
            return 0;
        }
        let start = self.ships[ship_idx].start;
        let goal = self.ships[ship_idx].goal;
        let outcome = self
            .search
            .search(&self.grid, start, goal, Exclusions::default());
        self.search_count += outcome.expanded;

        let planned_cost = outcome
            .path
            .iter()
            .skip(1)
            .map(|&idx| self.grid.travel_cost(idx))
            .sum();
        let ship = &mut self.ships[ship_idx];
        ship.cells_searched += outcome.expanded;
        ship.planned_cost = planned_cost;
        ship.planned_actions = outcome.path.len();
        ship.path = outcome.path.into();

        if ship.path.is_empty() {
            if start == goal {
                ship.state = ShipState::AtGoal;
                self.events.push(FleetEvent::ReachedGoal {
                    ship_id: ship.id.clone(),
                });
            } else {
                ship.state = ShipState::Stranded;
                self.events.push(FleetEvent::NoPath {
                    ship_id: ship.id.clone(),
                });
            }
        }
        ship.planned_actions
    }

    pub fn step(&mut self, dt_ms: u64) {
        if self.is_complete() {
            return;
        }
        self.tick_counter += 1;
        self.elapsed_ms = self.elapsed_ms.saturating_add(dt_ms);
        let dt_sec = dt_ms as f32 / 1000.0;
        for idx in 0..self.ships.len() {
            self.update_ship(idx, dt_sec);
        }
    }

    /// Steps at the fixed tick rate until every ship has settled or `max_ticks` pass.
    pub fn run_until_complete(&mut self, max_ticks: u64) -> bool {
        while !self.is_complete() {
            if self.tick_counter >= max_ticks {
                return false;
            }
            self.step(TICK_MS);
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.ships
            .iter()
            .all(|ship| matches!(ship.state, ShipState::AtGoal | ShipState::Stranded))
    }

    pub fn grid(&self) -> &TerrainGrid {
        &self.grid
    }

    pub fn ship_count(&self) -> usize {
        self.ships.len()
    }

    pub fn ship_state(&self, ship_idx: usize) -> Option<ShipState> {
        self.ships.get(ship_idx).map(|ship| ship.state)
    }

    pub fn ship_path(&self, ship_idx: usize) -> Vec<Vec2> {
        self.ships
            .get(ship_idx)
            .map(|ship| self.path_coords(&ship.path))
            .unwrap_or_default()
    }

    pub fn ship_cells_searched(&self, ship_idx: usize) -> usize {
        self.ships
            .get(ship_idx)
            .map(|ship| ship.cells_searched)
            .unwrap_or(0)
    }

    pub fn step_costs(&self) -> &[i32] {
        &self.path_cost_taken
    }

    pub fn crash_penalty(&self) -> i32 {
        self.crash_penalty
    }

    pub fn search_count(&self) -> usize {
        self.search_count
    }

    pub fn tick(&self) -> u64 {
        self.tick_counter
    }

    pub fn build_snapshot(&mut self, include_events: bool) -> Snapshot {
        let snapshot = Snapshot {
            tick: self.tick_counter,
            elapsed_ms: self.elapsed_ms,
            ships: self
                .ships
                .iter()
                .map(|ship| self.ship_view(ship))
                .collect(),
            ships_at_goal: self.count_state(ShipState::AtGoal),
            crash_penalty: self.crash_penalty,
            events: if include_events {
                self.events.clone()
            } else {
                Vec::new()
            },
        };
        if include_events {
            self.events.clear();
        }
        snapshot
    }

    pub fn plan_report(&self) -> PlanReport {
        self.plan
            .clone()
            .unwrap_or_else(|| self.build_plan_report())
    }

    pub fn actual_report(&self) -> ActualReport {
        let actual_cost = self.path_cost_taken.iter().sum::<i32>() + self.crash_penalty;
        let planned = self.plan_report().total_planned_cost.max(1);
        ActualReport {
            actual_cost,
            crash_penalty: self.crash_penalty,
            crashes: self.crashes,
            replans: self.replans,
            failed_replans: self.failed_replans,
            cells_expanded: self.search_count,
            actions_taken: self.path_cost_taken.len(),
            actual_vs_planned: actual_cost as f32 / planned as f32,
        }
    }

    pub fn build_summary(&self) -> BatchSummary {
        BatchSummary {
            ship_count: self.ships.len(),
            ships_at_goal: self.count_state(ShipState::AtGoal),
            ships_stranded: self.count_state(ShipState::Stranded),
            ticks: self.tick_counter,
            elapsed_ms: self.elapsed_ms,
            plan: self.plan_report(),
            actual: self.actual_report(),
        }
    }

    fn build_plan_report(&self) -> PlanReport {
        PlanReport {
            total_planned_cost: self.ships.iter().map(|ship| ship.planned_cost).sum(),
            cells_expanded: self.search_count,
            path_actions: self.ships.iter().map(|ship| ship.planned_actions).sum(),
            ships: if self.options.individual_stats {
                self.ships
                    .iter()
                    .map(|ship| ShipPlanStats {
                        id: ship.id.clone(),
                        cells_searched: ship.cells_searched,
                        planned_cost: ship.planned_cost,
                        path_actions: ship.planned_actions,
                    })
                    .collect()
            } else {
                Vec::new()
            },
        }
    }

    fn ship_view(&self, ship: &ShipInternal) -> ShipView {
        let (cx, cy) = cell_of_world(ship.position.0, ship.position.1);
        ShipView {
            id: ship.id.clone(),
            x: ship.position.0,
            y: ship.position.1,
            cell: Vec2 { x: cx, y: cy },
            goal: self.grid.node(ship.goal).coords(),
            state: ship.state,
            path_remaining: self.path_coords(&ship.path),
            cells_searched: ship.cells_searched,
            potential_crash: ship
                .potential_crash
                .and_then(|other| self.ships.get(other))
                .map(|other| other.id.clone()),
        }
    }

    fn path_coords(&self, path: &VecDeque<usize>) -> Vec<Vec2> {
        path.iter().map(|&idx| self.grid.node(idx).coords()).collect()
    }

    fn count_state(&self, state: ShipState) -> usize {
        self.ships.iter().filter(|ship| ship.state == state).count()
    }

    /// Grid cell nearest to the ship's current world position. Past the
    /// halfway mark that is the blocked next node, so the last reached node
    /// is used instead.
    fn current_cell(&self, ship_idx: usize) -> usize {
        let ship = &self.ships[ship_idx];
        let (x, y) = cell_of_world(ship.position.0, ship.position.1);
        let fallback = ship.last_node.unwrap_or(ship.start);
        match self.grid.index_of(x, y) {
            Some(idx) if Some(&idx) == ship.path.front() => fallback,
            Some(idx) => idx,
            None => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::constants::TICK_MS;
    use crate::engine::{FleetEngine, FleetOptions};
    use crate::types::{FleetEvent, ScenarioEntry, ShipState, Vec2};
    use crate::world::grid_from_rows;

    fn make_engine(rows: &[&str], entries: &[((i32, i32), (i32, i32))], options: FleetOptions) -> FleetEngine {
        let rows: Vec<String> = rows.iter().map(|row| row.to_string()).collect();
        let grid = grid_from_rows(&rows).expect("test grid should be valid");
        let entries: Vec<ScenarioEntry> = entries
            .iter()
            .map(|&((sx, sy), (gx, gy))| ScenarioEntry {
                start: Vec2 { x: sx, y: sy },
                goal: Vec2 { x: gx, y: gy },
            })
            .collect();
        FleetEngine::new(grid, &entries, options).expect("entries should be in bounds")
    }

    fn open_water(size: usize) -> Vec<String> {
        vec![".".repeat(size); size]
    }

    fn crossing_engine(options: FleetOptions) -> FleetEngine {
        let rows = open_water(5);
        let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
        make_engine(&rows, &[((0, 2), (4, 2)), ((2, 0), (2, 4))], options)
    }

    #[test]
    fn compute_paths_plans_every_ship_and_reports_cost() {
        let mut engine = crossing_engine(FleetOptions::default());
        let report = engine.compute_paths();
        assert_eq!(engine.ship_path(0).len(), 4);
        assert_eq!(engine.ship_path(1).len(), 4);
        // First node of each path is excluded from the planned cost.
        assert_eq!(report.total_planned_cost, 9 + 9);
        assert_eq!(report.path_actions, 8);
        assert!(report.cells_expanded > 0);
        assert!(report.ships.is_empty());
    }

    #[test]
    fn individual_stats_lists_each_ship() {
        let mut engine = crossing_engine(FleetOptions {
            individual_stats: true,
            ..FleetOptions::default()
        });
        let report = engine.compute_paths();
        assert_eq!(report.ships.len(), 2);
        assert_eq!(report.ships[1].id, "ship_2");
        assert_eq!(report.ships[1].path_actions, 4);
    }

    #[test]
    fn crossing_ships_replan_once_without_crashing() {
        let mut engine = crossing_engine(FleetOptions::default());
        engine.compute_paths();
        assert!(engine.run_until_complete(500));

        let actual = engine.actual_report();
        assert_eq!(actual.replans, 1);
        assert_eq!(actual.crashes, 0);
        assert_eq!(engine.crash_penalty(), 0);
        assert_eq!(engine.ship_state(0), Some(ShipState::AtGoal));
        assert_eq!(engine.ship_state(1), Some(ShipState::AtGoal));
        assert!(engine.grid().node_at(2, 2).is_some_and(|node| node.occupant.is_none()));
    }

    #[test]
    fn crossing_ships_crash_when_replanning_disabled() {
        let mut engine = crossing_engine(FleetOptions {
            replanning: false,
            ..FleetOptions::default()
        });
        engine.compute_paths();
        assert!(engine.run_until_complete(500));

        let actual = engine.actual_report();
        assert_eq!(actual.replans, 0);
        assert_eq!(actual.crashes, 1);
        assert_eq!(engine.crash_penalty(), 50);
        let snapshot = engine.build_snapshot(true);
        assert!(snapshot
            .events
            .iter()
            .any(|event| matches!(event, FleetEvent::Crashed { .. })));
    }

    #[test]
    fn step_costs_skip_the_first_move() {
        let mut engine = make_engine(&["T.T."], &[((0, 0), (3, 0))], FleetOptions::default());
        engine.compute_paths();
        assert!(engine.run_until_complete(500));
        assert_eq!(engine.step_costs(), &[1, 3]);
        let actual = engine.actual_report();
        assert_eq!(actual.actual_cost, 4);
        assert_eq!(actual.actions_taken, 2);
        assert!((actual.actual_vs_planned - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unreachable_goal_strands_ship_and_completes_batch() {
        let mut engine = make_engine(
            &["..@..", "..@.."],
            &[((0, 0), (4, 1)), ((0, 1), (1, 1))],
            FleetOptions::default(),
        );
        engine.compute_paths();
        assert_eq!(engine.ship_state(0), Some(ShipState::Stranded));
        assert!(engine.run_until_complete(500));
        assert_eq!(engine.ship_state(1), Some(ShipState::AtGoal));
        let summary = engine.build_summary();
        assert_eq!(summary.ships_stranded, 1);
        assert_eq!(summary.ships_at_goal, 1);
    }

    #[test]
    fn ship_starting_on_goal_is_done_immediately() {
        let mut engine = make_engine(&["..."], &[((1, 0), (1, 0))], FleetOptions::default());
        engine.compute_paths();
        assert!(engine.is_complete());
        engine.step(TICK_MS);
        assert_eq!(engine.tick(), 0);
    }

    #[test]
    fn new_rejects_out_of_bounds_entries() {
        let grid = grid_from_rows(&["...".to_string()]).expect("rows valid");
        let entries = [ScenarioEntry {
            start: Vec2 { x: 0, y: 0 },
            goal: Vec2 { x: 5, y: 0 },
        }];
        assert!(FleetEngine::new(grid, &entries, FleetOptions::default()).is_err());
    }

    #[test]
    fn snapshot_drains_events_when_requested() {
        let mut engine = make_engine(&["..."], &[((0, 0), (2, 0))], FleetOptions::default());
        engine.compute_paths();
        assert!(engine.run_until_complete(500));
        let first = engine.build_snapshot(true);
        assert!(first
            .events
            .iter()
            .any(|event| matches!(event, FleetEvent::ReachedGoal { .. })));
        let second = engine.build_snapshot(true);
        assert!(second.events.is_empty());
        assert_eq!(second.ships_at_goal, 1);
    }

    #[test]
    fn goal_cell_stays_claimed_after_arrival() {
        let mut engine = make_engine(&["..."], &[((0, 0), (2, 0))], FleetOptions::default());
        engine.compute_paths();
        assert!(engine.run_until_complete(500));
        let goal = engine.grid().node_at(2, 0).expect("goal in bounds");
        assert_eq!(goal.occupant, Some(0));
        let passed = engine.grid().node_at(1, 0).expect("cell in bounds");
        assert_eq!(passed.occupant, None);
    }
}
