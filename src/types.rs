use serde::{Deserialize, Serialize};

use crate::constants::{DEEP_WATER_COST, LAND_COST, SHALLOW_WATER_COST};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    DeepWater,
    Land,
    ShallowWater,
}

impl Terrain {
    /// Unknown symbols fall back to deep water.
    pub fn from_symbol(symbol: char) -> Self {
        match symbol {
            '@' => Self::Land,
            'T' => Self::ShallowWater,
            _ => Self::DeepWater,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Self::DeepWater => '.',
            Self::Land => '@',
            Self::ShallowWater => 'T',
        }
    }

    pub fn travel_cost(self) -> i32 {
        match self {
            Self::Land => LAND_COST,
            Self::DeepWater => DEEP_WATER_COST,
            Self::ShallowWater => SHALLOW_WATER_COST,
        }
    }

    pub fn is_passable(self) -> bool {
        self.travel_cost() < LAND_COST
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipState {
    Idle,
    Moving,
    Holding,
    AtGoal,
    Stranded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub start: Vec2,
    pub goal: Vec2,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    PotentialCrash {
        #[serde(rename = "shipId")]
        ship_id: String,
        with: String,
        x: i32,
        y: i32,
    },
    Replanned {
        #[serde(rename = "shipId")]
        ship_id: String,
        attempts: usize,
        #[serde(rename = "pathLength")]
        path_length: usize,
    },
    ReplanFailed {
        #[serde(rename = "shipId")]
        ship_id: String,
        attempts: usize,
    },
    Crashed {
        #[serde(rename = "shipId")]
        ship_id: String,
        with: String,
        x: i32,
        y: i32,
    },
    ReachedGoal {
        #[serde(rename = "shipId")]
        ship_id: String,
    },
    NoPath {
        #[serde(rename = "shipId")]
        ship_id: String,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct ShipView {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub cell: Vec2,
    pub goal: Vec2,
    pub state: ShipState,
    #[serde(rename = "pathRemaining")]
    pub path_remaining: Vec<Vec2>,
    #[serde(rename = "cellsSearched")]
    pub cells_searched: usize,
    #[serde(rename = "potentialCrash", skip_serializing_if = "Option::is_none")]
    pub potential_crash: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
    pub ships: Vec<ShipView>,
    #[serde(rename = "shipsAtGoal")]
    pub ships_at_goal: usize,
    #[serde(rename = "crashPenalty")]
    pub crash_penalty: i32,
    pub events: Vec<FleetEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ShipPlanStats {
    pub id: String,
    #[serde(rename = "cellsSearched")]
    pub cells_searched: usize,
    #[serde(rename = "plannedCost")]
    pub planned_cost: i32,
    #[serde(rename = "pathActions")]
    pub path_actions: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlanReport {
    #[serde(rename = "totalPlannedCost")]
    pub total_planned_cost: i32,
    #[serde(rename = "cellsExpanded")]
    pub cells_expanded: usize,
    #[serde(rename = "pathActions")]
    pub path_actions: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ships: Vec<ShipPlanStats>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ActualReport {
    #[serde(rename = "actualCost")]
    pub actual_cost: i32,
    #[serde(rename = "crashPenalty")]
    pub crash_penalty: i32,
    pub crashes: usize,
    pub replans: usize,
    #[serde(rename = "failedReplans")]
    pub failed_replans: usize,
    #[serde(rename = "cellsExpanded")]
    pub cells_expanded: usize,
    #[serde(rename = "actionsTaken")]
    pub actions_taken: usize,
    #[serde(rename = "actualVsPlanned")]
    pub actual_vs_planned: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchSummary {
    #[serde(rename = "shipCount")]
    pub ship_count: usize,
    #[serde(rename = "shipsAtGoal")]
    pub ships_at_goal: usize,
    #[serde(rename = "shipsStranded")]
    pub ships_stranded: usize,
    pub ticks: u64,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
    pub plan: PlanReport,
    pub actual: ActualReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terrain_symbols_map_to_costs() {
        assert_eq!(Terrain::from_symbol('.').travel_cost(), 3);
        assert_eq!(Terrain::from_symbol('T').travel_cost(), 1);
        assert_eq!(Terrain::from_symbol('@').travel_cost(), 100);
        assert_eq!(Terrain::from_symbol('G'), Terrain::DeepWater);
        assert!(!Terrain::Land.is_passable());
        assert!(Terrain::ShallowWater.is_passable());
    }

    #[test]
    fn fleet_event_serializes_with_type_tag() {
        let event = FleetEvent::Crashed {
            ship_id: "ship_1".to_string(),
            with: "ship_2".to_string(),
            x: 3,
            y: 4,
        };
        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["type"], "crashed");
        assert_eq!(value["shipId"], "ship_1");
    }
}
