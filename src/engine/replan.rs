use thiserror::Error;

use super::*;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplanError {
    #[error("replanning is disabled")]
    Disabled,

    #[error("ship {0} does not exist")]
    UnknownShip(usize),

    #[error("no alternate path on attempt {attempt}")]
    Blocked { attempt: usize },

    #[error("no alternate path found after {attempts} attempts")]
    NoAlternatePath { attempts: usize },
}

impl FleetEngine {
    /// Runs one search from the ship's current cell, dropping the blocked next
    /// node and every occupied cell from the frontier as they are reached.
    ///
    /// Grid and occupancy cannot change within a tick, so each call is a
    /// single attempt. Consecutive failed attempts are counted on the ship
    /// across ticks; the previous path is kept untouched on failure so the
    /// caller can hold and retry on the next tick. Once the budget is used up
    /// the failure is reported and the count starts over.
    pub fn replan(&mut self, ship_idx: usize) -> Result<usize, ReplanError> {
        if !self.options.replanning {
            return Err(ReplanError::Disabled);
        }
        if ship_idx >= self.ships.len() {
            return Err(ReplanError::UnknownShip(ship_idx));
        }

        let start = self.current_cell(ship_idx);
        let goal = self.ships[ship_idx].goal;
        let exclusions = Exclusions {
            conflict: self.ships[ship_idx].path.front().copied(),
            occupied: true,
        };
        let budget = self.options.max_replan_attempts.max(1);

        let outcome = self.search.search(&self.grid, start, goal, exclusions);
        self.search_count += outcome.expanded;
        let ship = &mut self.ships[ship_idx];
        ship.cells_searched += outcome.expanded;
        ship.replan_attempts += 1;
        let attempt = ship.replan_attempts;

        if !outcome.path.is_empty() {
            let path_length = outcome.path.len();
            ship.path = outcome.path.into();
            ship.replan_attempts = 0;
            let event = FleetEvent::Replanned {
                ship_id: ship.id.clone(),
                attempts: attempt,
                path_length,
            };
            self.replans += 1;
            self.events.push(event);
            return Ok(path_length);
        }

        if attempt < budget {
            return Err(ReplanError::Blocked { attempt });
        }

        ship.replan_attempts = 0;
        let event = FleetEvent::ReplanFailed {
            ship_id: ship.id.clone(),
            attempts: attempt,
        };
        self.failed_replans += 1;
        self.events.push(event);
        Err(ReplanError::NoAlternatePath { attempts: attempt })
    }
}
