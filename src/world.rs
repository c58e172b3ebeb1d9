use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::constants::MAX_MAP_SIZE;
use crate::grid::TerrainGrid;
use crate::types::{ScenarioEntry, Terrain, Vec2};

#[derive(Error, Debug)]
pub enum WorldError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("map header is missing `{0}`")]
    MissingHeader(&'static str),

    #[error("invalid map dimension `{0}`")]
    InvalidDimension(String),

    #[error("map is {width}x{height}, exceeds the {max}x{max} limit")]
    TooLarge {
        width: usize,
        height: usize,
        max: usize,
    },

    #[error("map row {row} has {found} cells, expected {expected}")]
    ShortRow {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("scenario line {line} is malformed: {reason}")]
    InvalidScenarioLine { line: usize, reason: String },

    #[error("cell ({x}, {y}) is outside the {width}x{height} map")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: usize,
        height: usize,
    },

    #[error("no water cells to place ships on")]
    NoWater,
}

pub type WorldResult<T> = Result<T, WorldError>;

pub fn load_map(path: &Path) -> WorldResult<TerrainGrid> {
    parse_map(&read_text(path)?)
}

pub fn load_scenarios(path: &Path) -> WorldResult<Vec<ScenarioEntry>> {
    parse_scenarios(&read_text(path)?)
}

fn read_text(path: &Path) -> WorldResult<String> {
    fs::read_to_string(path).map_err(|source| WorldError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    })
}

/// Parses a MovingAI `.map` file: `type`, `height N`, `width M`, `map`, rows.
pub fn parse_map(text: &str) -> WorldResult<TerrainGrid> {
    let mut lines = text.lines();
    let mut height = None;
    let mut width = None;

    for line in lines.by_ref() {
        let trimmed = line.trim();
        if trimmed == "map" {
            break;
        }
        if let Some(raw) = trimmed.strip_prefix("height") {
            height = Some(parse_dimension(raw)?);
        } else if let Some(raw) = trimmed.strip_prefix("width") {
            width = Some(parse_dimension(raw)?);
        }
    }

    let height = height.ok_or(WorldError::MissingHeader("height"))?;
    let width = width.ok_or(WorldError::MissingHeader("width"))?;
    let rows: Vec<String> = lines.take(height).map(|line| line.to_string()).collect();
    if rows.len() < height {
        return Err(WorldError::ShortRow {
            row: rows.len(),
            found: 0,
            expected: width,
        });
    }
    build_grid(width, height, &rows)
}

/// Builds a grid from raw terrain rows; width is the first row's length.
pub fn grid_from_rows(rows: &[String]) -> WorldResult<TerrainGrid> {
    let height = rows.len();
    let width = rows.first().map(|row| row.chars().count()).unwrap_or(0);
    build_grid(width, height, rows)
}

fn build_grid(width: usize, height: usize, rows: &[String]) -> WorldResult<TerrainGrid> {
    if width == 0 || height == 0 {
        return Err(WorldError::InvalidDimension(format!("{width}x{height}")));
    }
    if width > MAX_MAP_SIZE || height > MAX_MAP_SIZE {
        return Err(WorldError::TooLarge {
            width,
            height,
            max: MAX_MAP_SIZE,
        });
    }

    let mut terrain = Vec::with_capacity(width * height);
    for (row_idx, row) in rows.iter().take(height).enumerate() {
        let cells: Vec<Terrain> = row.chars().take(width).map(Terrain::from_symbol).collect();
        if cells.len() < width {
            return Err(WorldError::ShortRow {
                row: row_idx,
                found: cells.len(),
                expected: width,
            });
        }
        terrain.extend(cells);
    }
    Ok(TerrainGrid::from_terrain(width, height, &terrain))
}

fn parse_dimension(raw: &str) -> WorldResult<usize> {
    let value = raw.trim();
    value
        .parse::<usize>()
        .map_err(|_| WorldError::InvalidDimension(value.to_string()))
}

/// Parses a MovingAI `.scen` file. Columns 4..=7 hold start and goal coordinates.
pub fn parse_scenarios(text: &str) -> WorldResult<Vec<ScenarioEntry>> {
    let mut entries = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("version") {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() < 8 {
            return Err(WorldError::InvalidScenarioLine {
                line: line_idx + 1,
                reason: format!("expected at least 8 tab-separated fields, got {}", fields.len()),
            });
        }
        let mut coords = [0i32; 4];
        for (slot, raw) in coords.iter_mut().zip(&fields[4..8]) {
            *slot = raw
                .trim()
                .parse::<i32>()
                .map_err(|_| WorldError::InvalidScenarioLine {
                    line: line_idx + 1,
                    reason: format!("`{raw}` is not an integer"),
                })?;
        }
        entries.push(ScenarioEntry {
            start: Vec2 {
                x: coords[0],
                y: coords[1],
            },
            goal: Vec2 {
                x: coords[2],
                y: coords[3],
            },
        });
    }
    Ok(entries)
}

pub fn validate_entry(grid: &TerrainGrid, entry: &ScenarioEntry) -> WorldResult<()> {
    for cell in [entry.start, entry.goal] {
        if !grid.in_bounds(cell.x, cell.y) {
            return Err(WorldError::OutOfBounds {
                x: cell.x,
                y: cell.y,
                width: grid.width,
                height: grid.height,
            });
        }
    }
    Ok(())
}

/// Uniformly samples start/goal pairs from the grid's water cells.
pub fn random_entries(grid: &TerrainGrid, count: usize, seed: u64) -> WorldResult<Vec<ScenarioEntry>> {
    let water = grid.water_cells();
    if water.is_empty() {
        return Err(WorldError::NoWater);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    Ok((0..count)
        .map(|_| ScenarioEntry {
            start: water[rng.random_range(0..water.len())],
            goal: water[rng.random_range(0..water.len())],
        })
        .collect())
}
