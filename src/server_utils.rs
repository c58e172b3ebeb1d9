use crate::constants::MAX_MAP_SIZE;

pub const MAX_REQUEST_SHIPS: usize = 100;
pub const MAX_REQUEST_TICKS: u64 = 20 * 60 * 10;

pub fn normalize_ship_count(value: Option<i64>) -> usize {
    value.unwrap_or(0).clamp(0, MAX_REQUEST_SHIPS as i64) as usize
}

/// Falls back to `default` when absent and caps client-provided budgets.
pub fn normalize_max_ticks(value: Option<i64>, default: u64) -> u64 {
    match value {
        None => default.min(MAX_REQUEST_TICKS),
        Some(ticks) => ticks.clamp(1, MAX_REQUEST_TICKS as i64) as u64,
    }
}

pub fn parse_recent_limit(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|value| value.parse::<usize>().ok())
}

/// Rejects tile payloads the map loader would refuse anyway, before parsing.
pub fn tiles_within_bounds(tiles: &[String]) -> bool {
    !tiles.is_empty()
        && tiles.len() <= MAX_MAP_SIZE
        && tiles
            .iter()
            .all(|row| !row.is_empty() && row.chars().count() <= MAX_MAP_SIZE)
}
