use super::utils::{distance, step_toward};
use super::*;

impl FleetEngine {
    pub(super) fn update_ship(&mut self, ship_idx: usize, dt_sec: f32) {
        let Some(&next) = self.ships[ship_idx].path.front() else {
            return;
        };

        match self.grid.occupant(next) {
            Some(other) if other != ship_idx && self.ships[ship_idx].potential_crash.is_none() => {
                self.ships[ship_idx].potential_crash = Some(other);
                let cell = self.grid.node(next).coords();
                let event = FleetEvent::PotentialCrash {
                    ship_id: self.ships[ship_idx].id.clone(),
                    with: self.ship_label(other),
                    x: cell.x,
                    y: cell.y,
                };
                self.events.push(event);
                if self.options.replanning && self.replan(ship_idx).is_err() {
                    self.ships[ship_idx].potential_crash = None;
                    self.ships[ship_idx].state = ShipState::Holding;
                    return;
                }
            }
            _ => {
                self.grid.set_occupant(next, Some(ship_idx));
                self.ships[ship_idx].replan_attempts = 0;
            }
        }

        let Some(&target_idx) = self.ships[ship_idx].path.front() else {
            return;
        };
        let target = self.grid.node(target_idx).world_position();
        let step = self.options.move_speed * dt_sec;
        let ship = &mut self.ships[ship_idx];
        ship.state = ShipState::Moving;
        let remaining = distance(ship.position, target);
        ship.position = step_toward(ship.position, target, step.min(remaining));

        if distance(ship.position, target) <= self.options.tolerance {
            ship.position = target;
            self.arrive(ship_idx, target_idx);
        }
    }

    fn arrive(&mut self, ship_idx: usize, node_idx: usize) {
        if let Some(other) = self.ships[ship_idx].potential_crash.take() {
            self.resolve_potential_crash(ship_idx, other, node_idx);
        }

        if node_idx == self.ships[ship_idx].goal {
            self.ships[ship_idx].state = ShipState::AtGoal;
            self.events.push(FleetEvent::ReachedGoal {
                ship_id: self.ships[ship_idx].id.clone(),
            });
        } else if self.grid.occupant(node_idx) == Some(ship_idx) {
            self.grid.set_occupant(node_idx, None);
        }

        let ship = &mut self.ships[ship_idx];
        if ship.first_move {
            ship.first_move = false;
        } else {
            self.path_cost_taken.push(self.grid.travel_cost(node_idx));
        }
        ship.last_node = Some(node_idx);
        ship.path.pop_front();
    }

    /// Distance is measured from the snapped position on `node_idx`.
    fn resolve_potential_crash(&mut self, ship_idx: usize, other: usize, node_idx: usize) {
        let Some(other_ship) = self.ships.get(other) else {
            return;
        };
        let close = distance(self.ships[ship_idx].position, other_ship.position)
            <= self.options.crash_distance;
        let swapped_into = other_ship.last_node == Some(node_idx);
        if !close && !swapped_into {
            return;
        }

        let cell = self.grid.node(node_idx).coords();
        let event = FleetEvent::Crashed {
            ship_id: self.ships[ship_idx].id.clone(),
            with: other_ship.id.clone(),
            x: cell.x,
            y: cell.y,
        };
        self.crash_penalty += self.options.crash_penalty;
        self.crashes += 1;
        self.events.push(event);
        self.ships[other].potential_crash = None;
    }

    fn ship_label(&self, ship_idx: usize) -> String {
        self.ships
            .get(ship_idx)
            .map(|ship| ship.id.clone())
            .unwrap_or_else(|| format!("ship_{}", ship_idx + 1))
    }
}

#[cfg(test)]
mod tests {
    use crate::constants::TICK_MS;
    use crate::engine::{FleetEngine, FleetOptions};
    use crate::types::{FleetEvent, ScenarioEntry, ShipState, Vec2};
    use crate::world::grid_from_rows;

    fn make_engine(rows: &[&str], entries: &[((i32, i32), (i32, i32))]) -> FleetEngine {
        let rows: Vec<String> = rows.iter().map(|row| row.to_string()).collect();
        let grid = grid_from_rows(&rows).expect("test grid should be valid");
        let entries: Vec<ScenarioEntry> = entries
            .iter()
            .map(|&((sx, sy), (gx, gy))| ScenarioEntry {
                start: Vec2 { x: sx, y: sy },
                goal: Vec2 { x: gx, y: gy },
            })
            .collect();
        FleetEngine::new(grid, &entries, FleetOptions::default()).expect("entries in bounds")
    }

    #[test]
    fn ship_claims_next_node_while_moving() {
        let mut engine = make_engine(&["..."], &[((0, 0), (2, 0))]);
        engine.compute_paths();
        engine.step(TICK_MS);
        let next = engine.grid.index_of(1, 0).expect("cell in bounds");
        assert_eq!(engine.grid.occupant(next), Some(0));
        assert_eq!(engine.ship_state(0), Some(ShipState::Moving));
        assert!((engine.ships[0].position.0 - 25.0).abs() < 1e-4);
    }

    #[test]
    fn ship_snaps_within_tolerance_and_releases_node() {
        let mut engine = make_engine(&["..."], &[((0, 0), (2, 0))]);
        engine.compute_paths();
        for _ in 0..3 {
            engine.step(TICK_MS);
        }
        let passed = engine.grid.index_of(1, 0).expect("cell in bounds");
        assert_eq!(engine.ships[0].position, (100.0, 0.0));
        assert_eq!(engine.ships[0].last_node, Some(passed));
        assert_eq!(engine.grid.occupant(passed), None);
        assert_eq!(engine.ship_path(0), vec![Vec2 { x: 2, y: 0 }]);
    }

    #[test]
    fn occupied_next_node_is_flagged_and_replanned() {
        let mut engine = make_engine(&["...", "...", "..."], &[((0, 1), (2, 1))]);
        engine.compute_paths();
        let blocked = engine.grid.index_of(1, 1).expect("cell in bounds");
        engine.grid.set_occupant(blocked, Some(5));

        engine.step(TICK_MS);
        let snapshot = engine.build_snapshot(true);
        assert!(matches!(
            snapshot.events.first(),
            Some(FleetEvent::PotentialCrash { x: 1, y: 1, .. })
        ));
        assert!(snapshot
            .events
            .iter()
            .any(|event| matches!(event, FleetEvent::Replanned { .. })));
        assert!(!engine.ship_path(0).contains(&Vec2 { x: 1, y: 1 }));
        assert_eq!(engine.ships[0].potential_crash, Some(5));
    }

    #[test]
    fn failed_replan_holds_position_and_retries_next_tick() {
        let mut engine = make_engine(&["@.@", "...", "@.@"], &[((1, 0), (1, 2))]);
        engine.compute_paths();
        let blocked = engine.grid.index_of(1, 1).expect("cell in bounds");
        engine.grid.set_occupant(blocked, Some(5));

        engine.step(TICK_MS);
        assert_eq!(engine.ship_state(0), Some(ShipState::Holding));
        assert_eq!(engine.ships[0].position, (100.0, 0.0));
        assert_eq!(engine.ships[0].potential_crash, None);

        engine.grid.set_occupant(blocked, None);
        engine.step(TICK_MS);
        assert_eq!(engine.ship_state(0), Some(ShipState::Moving));
        assert_eq!(engine.ships[0].replan_attempts, 0);
        assert_eq!(engine.actual_report().failed_replans, 0);
    }

    #[test]
    fn blocked_ship_searches_once_per_tick_until_budget_is_spent() {
        let mut engine = make_engine(&["@.@", "...", "@.@"], &[((1, 0), (1, 2))]);
        engine.compute_paths();
        let blocked = engine.grid.index_of(1, 1).expect("cell in bounds");
        engine.grid.set_occupant(blocked, Some(5));
        engine.build_snapshot(true);

        let mut deltas = Vec::new();
        for _ in 0..3 {
            let before = engine.search_count();
            engine.step(TICK_MS);
            deltas.push(engine.search_count() - before);
        }
        assert!(deltas[0] > 0);
        assert!(deltas.iter().all(|&delta| delta == deltas[0]));

        let snapshot = engine.build_snapshot(true);
        let failures = snapshot
            .events
            .iter()
            .filter(|event| matches!(event, FleetEvent::ReplanFailed { attempts: 3, .. }))
            .count();
        assert_eq!(failures, 1);
        assert_eq!(engine.actual_report().failed_replans, 1);
        assert_eq!(engine.ship_state(0), Some(ShipState::Holding));
    }

    #[test]
    fn replan_past_halfway_starts_from_last_reached_node() {
        let mut engine = make_engine(&["...", "...", "..."], &[((0, 1), (2, 1))]);
        engine.compute_paths();
        let conflict = engine.grid.index_of(1, 1).expect("cell in bounds");
        let origin = engine.grid.index_of(0, 1).expect("cell in bounds");
        engine.ships[0].last_node = Some(origin);
        engine.ships[0].position = (60.0, 100.0);
        engine.grid.set_occupant(conflict, Some(5));

        engine.replan(0).expect("detour exists");
        let path = engine.ship_path(0);
        assert!(!path.contains(&Vec2 { x: 1, y: 1 }));
        assert!(matches!(
            path.first(),
            Some(Vec2 { x: 0, y: 0 }) | Some(Vec2 { x: 0, y: 2 })
        ));
        assert_eq!(path.last(), Some(&Vec2 { x: 2, y: 1 }));
    }

    #[test]
    fn arriving_on_other_ships_last_node_counts_as_crash() {
        let mut engine = make_engine(&["....", "...."], &[((0, 0), (3, 0)), ((3, 1), (0, 1))]);
        engine.compute_paths();
        let node = engine.grid.index_of(1, 0).expect("cell in bounds");
        engine.ships[0].potential_crash = Some(1);
        engine.ships[1].potential_crash = Some(0);
        engine.ships[1].last_node = Some(node);
        engine.ships[0].position = (100.0, 0.0);

        engine.arrive(0, node);
        assert_eq!(engine.crash_penalty(), 50);
        assert_eq!(engine.ships[0].potential_crash, None);
        assert_eq!(engine.ships[1].potential_crash, None);
    }

    #[test]
    fn distant_conflict_clears_without_penalty() {
        let mut engine = make_engine(&["....", "....", "...."], &[((0, 0), (3, 0)), ((3, 2), (0, 2))]);
        engine.compute_paths();
        let node = engine.grid.index_of(1, 0).expect("cell in bounds");
        engine.ships[0].potential_crash = Some(1);
        engine.ships[1].potential_crash = Some(0);
        engine.ships[0].position = (100.0, 0.0);

        engine.arrive(0, node);
        assert_eq!(engine.crash_penalty(), 0);
        assert_eq!(engine.ships[0].potential_crash, None);
        assert_eq!(engine.ships[1].potential_crash, Some(0));
    }
}
