use chrono::{SecondsFormat, Utc};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use shipnav::constants::{
    get_tick_safety_limit, BATCH_SIZES, MAX_REPLAN_ATTEMPTS, SCENARIO_START_INDEX, TICK_MS,
};
use shipnav::engine::{FleetEngine, FleetOptions};
use shipnav::grid::TerrainGrid;
use shipnav::logging::{now_ms, LogLevel, StructuredLogLine};
use shipnav::types::{BatchSummary, FleetEvent, ScenarioEntry, Snapshot};
use shipnav::world::{load_map, load_scenarios, random_entries};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    map: PathBuf,
    #[arg(long)]
    scenario: Option<PathBuf>,
    #[arg(long)]
    start_index: Option<usize>,
    #[arg(long, value_delimiter = ',')]
    batches: Vec<usize>,
    #[arg(long)]
    random_ships: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    no_replan: bool,
    #[arg(long)]
    max_replan: Option<usize>,
    #[arg(long)]
    individual_stats: bool,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
    #[arg(long)]
    max_ticks: Option<u64>,
}

#[derive(Clone, Debug)]
struct BatchPlan {
    index: usize,
    first_row: Option<usize>,
    entries: Vec<ScenarioEntry>,
}

#[derive(Clone, Debug, Serialize)]
struct BatchResultLine {
    batch: usize,
    #[serde(rename = "firstRow", skip_serializing_if = "Option::is_none")]
    first_row: Option<usize>,
    #[serde(flatten)]
    summary: BatchSummary,
    #[serde(rename = "potentialCrashes")]
    potential_crashes: usize,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug)]
struct BatchRunResult {
    result: BatchResultLine,
    anomaly_records: Vec<AnomalyRecord>,
    finished_tick: u64,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(rename = "generatedAt")]
    generated_at: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "batchCount")]
    batch_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "totalPlannedCost")]
    total_planned_cost: i64,
    #[serde(rename = "totalActualCost")]
    total_actual_cost: i64,
    #[serde(rename = "totalCrashes")]
    total_crashes: usize,
    #[serde(rename = "skippedBatches", skip_serializing_if = "Vec::is_empty")]
    skipped_batches: Vec<usize>,
    batches: Vec<BatchResultLine>,
}

fn main() {
    let cli = Cli::parse();
    let run_started_at_ms = now_ms();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(cli.seed.unwrap_or(0), run_started_at_ms));

    let grid = match load_map(&cli.map) {
        Ok(grid) => grid,
        Err(error) => exit_config_error(&run_id, "map_load_failed", &cli.map, &error.to_string()),
    };
    let (batches, skipped_batches) = match resolve_batches(&cli, &grid) {
        Ok(resolved) => resolved,
        Err(message) => {
            StructuredLogLine::new(
                LogLevel::Error,
                "batches_unresolved",
                &run_id,
                json!({ "error": message }),
            )
            .emit();
            std::process::exit(2);
        }
    };
    let options = fleet_options(&cli);

    StructuredLogLine::new(
        LogLevel::Info,
        "run_started",
        &run_id,
        json!({
            "map": cli.map.to_string_lossy(),
            "width": grid.width,
            "height": grid.height,
            "batchCount": batches.len(),
            "replanning": options.replanning,
            "maxReplanAttempts": options.max_replan_attempts,
        }),
    )
    .emit();

    let mut has_anomaly = false;
    let mut batch_results = Vec::new();
    let mut total_anomalies = 0usize;

    for &size in &skipped_batches {
        has_anomaly = true;
        total_anomalies += 1;
        StructuredLogLine::new(
            LogLevel::Warn,
            "anomaly_detected",
            &run_id,
            json!({ "message": format!("not enough scenario rows for a batch of {size}") }),
        )
        .emit();
    }

    for batch in &batches {
        StructuredLogLine::new(
            LogLevel::Info,
            "batch_started",
            &run_id,
            json!({
                "shipCount": batch.entries.len(),
                "firstRow": batch.first_row,
            }),
        )
        .with_batch(batch.index)
        .emit();

        let batch_run = match run_batch(&grid, batch, options, cli.max_ticks, &run_id) {
            Ok(batch_run) => batch_run,
            Err(error) => {
                StructuredLogLine::new(
                    LogLevel::Error,
                    "batch_rejected",
                    &run_id,
                    json!({ "error": error.to_string() }),
                )
                .with_batch(batch.index)
                .emit();
                std::process::exit(2);
            }
        };

        for anomaly in &batch_run.anomaly_records {
            StructuredLogLine::new(
                LogLevel::Warn,
                "anomaly_detected",
                &run_id,
                json!({ "message": anomaly.message }),
            )
            .with_batch(batch.index)
            .with_tick(anomaly.tick)
            .emit();
        }

        if !batch_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += batch_run.anomaly_records.len();

        let summary = &batch_run.result.summary;
        StructuredLogLine::new(
            LogLevel::Info,
            "batch_finished",
            &run_id,
            json!({
                "shipsAtGoal": summary.ships_at_goal,
                "shipsStranded": summary.ships_stranded,
                "plannedCost": summary.plan.total_planned_cost,
                "actualCost": summary.actual.actual_cost,
                "crashes": summary.actual.crashes,
                "replans": summary.actual.replans,
                "anomalyCount": batch_run.anomaly_records.len(),
            }),
        )
        .with_batch(batch.index)
        .with_tick(batch_run.finished_tick)
        .emit();

        match serde_json::to_string(&batch_run.result) {
            Ok(line) => println!("{line}"),
            Err(error) => eprintln!("failed to serialize batch result: {error}"),
        }
        batch_results.push(batch_run.result);
    }

    let summary = build_run_summary(
        run_id.clone(),
        run_started_at_ms,
        now_ms(),
        batch_results,
        skipped_batches,
        total_anomalies,
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            StructuredLogLine::new(
                LogLevel::Error,
                "summary_write_failed",
                &run_id,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            )
            .emit();
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    StructuredLogLine::new(
        LogLevel::Info,
        "run_finished",
        &run_id,
        json!({
            "batchCount": summary.batch_count,
            "anomalyCount": summary.anomaly_count,
            "totalPlannedCost": summary.total_planned_cost,
            "totalActualCost": summary.total_actual_cost,
            "totalCrashes": summary.total_crashes,
            "summaryOut": summary_out_written,
        }),
    )
    .emit();

    if has_anomaly {
        std::process::exit(1);
    }
}

fn exit_config_error(run_id: &str, event: &str, path: &Path, error: &str) -> ! {
    StructuredLogLine::new(
        LogLevel::Error,
        event,
        run_id,
        json!({
            "path": path.to_string_lossy(),
            "error": error,
        }),
    )
    .emit();
    std::process::exit(2);
}

fn fleet_options(cli: &Cli) -> FleetOptions {
    FleetOptions {
        replanning: !cli.no_replan,
        max_replan_attempts: cli.max_replan.unwrap_or(MAX_REPLAN_ATTEMPTS).max(1),
        individual_stats: cli.individual_stats,
        ..FleetOptions::default()
    }
}

/// Random ships run as a single batch; otherwise batches walk the scenario file.
fn resolve_batches(cli: &Cli, grid: &TerrainGrid) -> Result<(Vec<BatchPlan>, Vec<usize>), String> {
    if let Some(count) = cli.random_ships {
        let seed = cli.seed.unwrap_or_else(now_ms);
        let entries = random_entries(grid, count.max(1), seed).map_err(|error| error.to_string())?;
        return Ok((
            vec![BatchPlan {
                index: 1,
                first_row: None,
                entries,
            }],
            Vec::new(),
        ));
    }

    let Some(path) = cli.scenario.as_ref() else {
        return Err("either --scenario or --random-ships is required".to_string());
    };
    let rows = load_scenarios(path).map_err(|error| error.to_string())?;
    let sizes: &[usize] = if cli.batches.is_empty() {
        &BATCH_SIZES
    } else {
        &cli.batches
    };
    Ok(slice_batches(
        &rows,
        cli.start_index.unwrap_or(SCENARIO_START_INDEX),
        sizes,
    ))
}

/// Each batch takes the next `size` rows after the previous batch's rows.
/// Sizes that no longer fit in the file are returned as skipped.
fn slice_batches(
    rows: &[ScenarioEntry],
    start_index: usize,
    sizes: &[usize],
) -> (Vec<BatchPlan>, Vec<usize>) {
    let mut batches = Vec::new();
    let mut skipped = Vec::new();
    let mut cursor = start_index;
    for &size in sizes {
        let end = cursor.saturating_add(size);
        if size == 0 || end > rows.len() {
            skipped.push(size);
            continue;
        }
        batches.push(BatchPlan {
            index: batches.len() + 1,
            first_row: Some(cursor),
            entries: rows[cursor..end].to_vec(),
        });
        cursor = end;
    }
    (batches, skipped)
}

fn run_batch(
    grid: &TerrainGrid,
    batch: &BatchPlan,
    options: FleetOptions,
    max_ticks: Option<u64>,
    run_id: &str,
) -> Result<BatchRunResult, shipnav::world::WorldError> {
    let mut engine = FleetEngine::new(grid.clone(), &batch.entries, options)?;
    engine.compute_paths();

    let tick_limit = max_ticks
        .unwrap_or_else(|| get_tick_safety_limit(batch.entries.len(), grid.width, grid.height));
    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut potential_crashes = 0usize;

    let planning = engine.build_snapshot(true);
    log_events(&planning, batch.index, run_id, &mut potential_crashes);

    while !engine.is_complete() {
        engine.step(TICK_MS);
        let snapshot = engine.build_snapshot(true);
        for message in collect_snapshot_anomalies(&snapshot, grid) {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                snapshot.tick,
                message,
            );
        }
        log_events(&snapshot, batch.index, run_id, &mut potential_crashes);

        if snapshot.tick >= tick_limit {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                snapshot.tick,
                "tick safety limit exceeded".to_string(),
            );
            break;
        }
    }

    let summary = engine.build_summary();
    let unfinished = summary.ship_count - summary.ships_at_goal - summary.ships_stranded;
    if unfinished > 0 {
        push_anomaly(
            &mut anomalies,
            &mut anomaly_records,
            &mut anomaly_seen,
            engine.tick(),
            format!("{unfinished} ships never settled"),
        );
    }

    Ok(BatchRunResult {
        result: BatchResultLine {
            batch: batch.index,
            first_row: batch.first_row,
            summary,
            potential_crashes,
            anomalies,
        },
        anomaly_records,
        finished_tick: engine.tick(),
    })
}

fn log_events(snapshot: &Snapshot, batch: usize, run_id: &str, potential_crashes: &mut usize) {
    for event in &snapshot.events {
        let level = match event {
            FleetEvent::PotentialCrash { .. } => {
                *potential_crashes += 1;
                continue;
            }
            FleetEvent::Replanned { .. } | FleetEvent::ReachedGoal { .. } => continue,
            FleetEvent::Crashed { .. }
            | FleetEvent::ReplanFailed { .. }
            | FleetEvent::NoPath { .. } => LogLevel::Warn,
        };
        let details = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
        StructuredLogLine::new(level, fleet_event_key(event), run_id, details)
            .with_batch(batch)
            .with_tick(snapshot.tick)
            .emit();
    }
}

fn fleet_event_key(event: &FleetEvent) -> &'static str {
    match event {
        FleetEvent::PotentialCrash { .. } => "potential_crash",
        FleetEvent::Replanned { .. } => "replanned",
        FleetEvent::ReplanFailed { .. } => "replan_failed",
        FleetEvent::Crashed { .. } => "crashed",
        FleetEvent::ReachedGoal { .. } => "reached_goal",
        FleetEvent::NoPath { .. } => "no_path",
    }
}

fn collect_snapshot_anomalies(snapshot: &Snapshot, grid: &TerrainGrid) -> Vec<String> {
    let mut anomalies = Vec::new();
    if snapshot.crash_penalty < 0 {
        anomalies.push(format!("negative crash penalty: {}", snapshot.crash_penalty));
    }
    for ship in &snapshot.ships {
        if !ship.x.is_finite() || !ship.y.is_finite() {
            anomalies.push(format!("ship position is not finite: {}", ship.id));
        } else if !grid.in_bounds(ship.cell.x, ship.cell.y) {
            anomalies.push(format!(
                "ship left the map: {} at ({}, {})",
                ship.id, ship.cell.x, ship.cell.y
            ));
        }
        if let Some(node) = grid.node_at(ship.cell.x, ship.cell.y) {
            if !node.terrain.is_passable() {
                anomalies.push(format!(
                    "ship on land: {} at ({}, {})",
                    ship.id, ship.cell.x, ship.cell.y
                ));
            }
        }
    }
    anomalies
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    tick: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        tick,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_run_id(seed: u64, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    run_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    batches: Vec<BatchResultLine>,
    skipped_batches: Vec<usize>,
    anomaly_count: usize,
) -> RunSummary {
    let total_planned_cost = batches
        .iter()
        .map(|batch| batch.summary.plan.total_planned_cost as i64)
        .sum();
    let total_actual_cost = batches
        .iter()
        .map(|batch| batch.summary.actual.actual_cost as i64)
        .sum();
    let total_crashes = batches.iter().map(|batch| batch.summary.actual.crashes).sum();
    RunSummary {
        run_id,
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        started_at_ms,
        finished_at_ms,
        batch_count: batches.len(),
        anomaly_count,
        total_planned_cost,
        total_actual_cost,
        total_crashes,
        skipped_batches,
        batches,
    }
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}
