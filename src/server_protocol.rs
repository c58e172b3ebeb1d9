use serde::Deserialize;
use serde_json::Value;

use crate::types::{ScenarioEntry, Vec2};

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub tiles: Option<Vec<String>>,
    pub start: Vec2,
    pub goal: Vec2,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub tiles: Option<Vec<String>>,
    #[serde(default)]
    pub ships: Vec<ScenarioEntry>,
    #[serde(rename = "randomShips")]
    pub random_ships: Option<i64>,
    #[serde(rename = "scenarioShips")]
    pub scenario_ships: Option<i64>,
    pub seed: Option<u64>,
    pub replanning: Option<bool>,
    #[serde(rename = "maxTicks")]
    pub max_ticks: Option<i64>,
}

#[derive(Debug)]
pub enum ParsedClientMessage {
    Start {
        tiles: Option<Vec<String>>,
        ships: Vec<ScenarioEntry>,
        random_ships: Option<i64>,
        scenario_ships: Option<i64>,
        seed: Option<u64>,
        replanning: Option<bool>,
    },
    Stop,
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "start" => {
            let tiles = match object.get("tiles") {
                None => None,
                Some(value) => Some(parse_tiles(value)?),
            };
            let ships = match object.get("ships") {
                None => Vec::new(),
                Some(value) => parse_ships(value)?,
            };
            let random_ships = match object.get("randomShips") {
                None => None,
                Some(value) => Some(value.as_i64()?),
            };
            let scenario_ships = match object.get("scenarioShips") {
                None => None,
                Some(value) => Some(value.as_i64()?),
            };
            let seed = match object.get("seed") {
                None => None,
                Some(value) => Some(value.as_u64()?),
            };
            let replanning = match object.get("replanning") {
                None => None,
                Some(value) => Some(value.as_bool()?),
            };
            Some(ParsedClientMessage::Start {
                tiles,
                ships,
                random_ships,
                scenario_ships,
                seed,
                replanning,
            })
        }
        "stop" => Some(ParsedClientMessage::Stop),
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_tiles(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|row| row.as_str().map(str::to_string))
        .collect()
}

fn parse_ships(value: &Value) -> Option<Vec<ScenarioEntry>> {
    value
        .as_array()?
        .iter()
        .map(|entry| {
            let object = entry.as_object()?;
            Some(ScenarioEntry {
                start: parse_cell(object.get("start")?)?,
                goal: parse_cell(object.get("goal")?)?,
            })
        })
        .collect()
}

fn parse_cell(value: &Value) -> Option<Vec2> {
    let object = value.as_object()?;
    let x = i32::try_from(object.get("x")?.as_i64()?).ok()?;
    let y = i32::try_from(object.get("y")?.as_i64()?).ok()?;
    Some(Vec2 { x, y })
}
