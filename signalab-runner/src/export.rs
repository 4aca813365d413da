//! Report assembly: CSV tables, persisted aggregates and the run manifest.
//!
//! Artifacts of a sweep, all under one output directory:
//! - `backtest_results_{h}h.csv`: one row per (tp, sl) for window `h`
//! - `backtest_results_all.csv`: every combination across windows
//! - `optimal_parameters.csv`: top-N ranked recommendations
//! - `aggregates.json`: every aggregate, for re-ranking without re-simulation
//! - `manifest.json`: run id, config, signal summary, skip tally, timestamps
//!
//! Replay writes `simple_backtest_{h}h.csv` and `replay_summary.json`.
//!
//! Persisted JSON carries a `schema_version`; newer versions are rejected on
//! load. Every file is written to a temp path and renamed into place.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::acquisition::{SkipTally, SkippedSignal};
use crate::aggregate::AggregateResult;
use crate::config::{RunId, SweepConfig};
use crate::replay::{ExitModel, ReplayReport, ReplaySummary, ReplayTrade};
use crate::scoring::{Ranking, ScoredCombination};
use crate::signal_loader::SignalSummary;
use crate::sweep::{SweepRun, SweepStats};

/// Version of the persisted JSON layout.
pub const SCHEMA_VERSION: u32 = 1;

pub const AGGREGATES_FILE: &str = "aggregates.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ALL_RESULTS_FILE: &str = "backtest_results_all.csv";
pub const RECOMMENDATIONS_FILE: &str = "optimal_parameters.csv";
pub const REPLAY_SUMMARY_FILE: &str = "replay_summary.json";

pub fn window_results_file(hours_window: u32) -> String {
    format!("backtest_results_{hours_window}h.csv")
}

pub fn replay_trades_file(hours_window: u32) -> String {
    format!("simple_backtest_{hours_window}h.csv")
}

// ─── Persisted aggregates ───────────────────────────────────────────

/// Contents of `aggregates.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatesFile {
    pub schema_version: u32,
    pub run_id: RunId,
    pub stats: SweepStats,
    pub aggregates: Vec<AggregateResult>,
}

impl AggregatesFile {
    pub fn from_run(run: &SweepRun) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: run.run_id.clone(),
            stats: run.stats(),
            aggregates: run.grid.aggregates.values().cloned().collect(),
        }
    }
}

pub fn export_aggregates_json(file: &AggregatesFile) -> Result<String> {
    serde_json::to_string_pretty(file).context("failed to serialize aggregates to JSON")
}

/// Parse `aggregates.json`, rejecting unknown schema versions.
pub fn import_aggregates_json(json: &str) -> Result<AggregatesFile> {
    let file: AggregatesFile =
        serde_json::from_str(json).context("failed to deserialize aggregates from JSON")?;
    if file.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            file.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(file)
}

pub fn load_aggregates(path: &Path) -> Result<AggregatesFile> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_aggregates_json(&json)
}

// ─── Manifest ───────────────────────────────────────────────────────

/// Contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub run_id: RunId,
    pub config: SweepConfig,
    pub signal_summary: SignalSummary,
    pub skips: SkipTally,
    pub skipped_signals: Vec<SkippedSignal>,
    pub stats: SweepStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: Vec<String>,
}

// ─── CSV export ─────────────────────────────────────────────────────

fn opt(v: Option<f64>, precision: usize) -> String {
    v.map(|x| format!("{x:.precision$}")).unwrap_or_default()
}

fn opt_time<T: ToString>(v: Option<T>) -> String {
    v.map(|t| t.to_string()).unwrap_or_default()
}

fn finish_csv(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Aggregate table: base counters and every derived metric.
///
/// Columns: tp_percent, sl_percent, hours_window, total_trades, wins, losses,
/// expired, no_entry, skipped, entry_hit_rate, win_rate, loss_rate,
/// expired_rate, total_pnl, avg_pnl, avg_win, avg_loss, expectancy,
/// expired_pnl, avg_expired_pnl, gross_profit, gross_loss, profit_factor
pub fn export_results_csv<'a, I>(aggregates: I) -> Result<String>
where
    I: IntoIterator<Item = &'a AggregateResult>,
{
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "tp_percent",
        "sl_percent",
        "hours_window",
        "total_trades",
        "wins",
        "losses",
        "expired",
        "no_entry",
        "skipped",
        "entry_hit_rate",
        "win_rate",
        "loss_rate",
        "expired_rate",
        "total_pnl",
        "avg_pnl",
        "avg_win",
        "avg_loss",
        "expectancy",
        "expired_pnl",
        "avg_expired_pnl",
        "gross_profit",
        "gross_loss",
        "profit_factor",
    ])?;

    for a in aggregates {
        wtr.write_record([
            &format!("{:.2}", a.tp_percent),
            &format!("{:.2}", a.sl_percent),
            &a.hours_window.to_string(),
            &a.total_trades.to_string(),
            &a.wins.to_string(),
            &a.losses.to_string(),
            &a.expired.to_string(),
            &a.no_entry.to_string(),
            &a.skipped.to_string(),
            &format!("{:.2}", a.entry_hit_rate()),
            &format!("{:.2}", a.win_rate()),
            &format!("{:.2}", a.loss_rate()),
            &format!("{:.2}", a.expired_rate()),
            &format!("{:.4}", a.total_pnl),
            &format!("{:.4}", a.avg_pnl()),
            &format!("{:.4}", a.avg_win()),
            &format!("{:.4}", a.avg_loss()),
            &format!("{:.4}", a.expectancy()),
            &format!("{:.4}", a.expired_pnl),
            &format!("{:.4}", a.avg_expired_pnl()),
            &format!("{:.4}", a.gross_profit),
            &format!("{:.4}", a.gross_loss),
            &opt(a.profit_factor(), 4),
        ])?;
    }
    finish_csv(wtr)
}

/// Recommendation table.
///
/// Columns: rank, tp_percent, sl_percent, hours_window, total_trades, wins,
/// losses, expired, win_rate, expectancy, total_pnl, profit_factor, score
pub fn export_recommendations_csv(top: &[ScoredCombination]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "rank",
        "tp_percent",
        "sl_percent",
        "hours_window",
        "total_trades",
        "wins",
        "losses",
        "expired",
        "win_rate",
        "expectancy",
        "total_pnl",
        "profit_factor",
        "score",
    ])?;
    for s in top {
        let a = &s.aggregate;
        wtr.write_record([
            &s.rank.map(|r| r.to_string()).unwrap_or_default(),
            &format!("{:.2}", a.tp_percent),
            &format!("{:.2}", a.sl_percent),
            &a.hours_window.to_string(),
            &a.total_trades.to_string(),
            &a.wins.to_string(),
            &a.losses.to_string(),
            &a.expired.to_string(),
            &format!("{:.2}", a.win_rate()),
            &format!("{:.4}", a.expectancy()),
            &format!("{:.4}", a.total_pnl),
            &opt(a.profit_factor(), 4),
            &format!("{:.6}", s.score),
        ])?;
    }
    finish_csv(wtr)
}

/// Replay trade table.
pub fn export_replay_csv(trades: &[ReplayTrade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "status",
        "symbol",
        "side",
        "signal_time",
        "entry",
        "exit_model",
        "tp_percent",
        "sl_percent",
        "result",
        "entry_time",
        "exit_time",
        "exit_price",
        "pnl",
        "targets_hit",
        "duration_minutes",
        "balance_after",
        "note",
    ])?;
    for t in trades {
        let exit_model = match t.exit_model {
            Some(ExitModel::Ladder) => "ladder",
            Some(ExitModel::SingleExit) => "single_exit",
            None => "",
        }
        .to_string();
        let note = t.note.clone().unwrap_or_default();
        wtr.write_record([
            &t.status.to_string(),
            &t.symbol,
            &t.side.to_string(),
            &t.signal_time.to_string(),
            &t.entry.to_string(),
            &exit_model,
            &opt(t.tp_percent, 4),
            &opt(t.sl_percent, 4),
            &opt_time(t.outcome),
            &opt_time(t.entry_time),
            &opt_time(t.exit_time),
            &opt(t.exit_price, 6),
            &format!("{:.4}", t.pnl_usdt),
            &t.targets_hit.to_string(),
            &opt_time(t.duration_minutes()),
            &format!("{:.2}", t.balance_after),
            &note,
        ])?;
    }
    finish_csv(wtr)
}

// ─── Artifact writing ───────────────────────────────────────────────

/// Write `contents` to `path` through a temp file and a rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move {} into place", path.display()))?;
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output dir: {}", dir.display()))
}

/// Write the recommendation table. Returns its path.
pub fn save_recommendations(ranking: &Ranking, output_dir: &Path) -> Result<PathBuf> {
    ensure_dir(output_dir)?;
    let path = output_dir.join(RECOMMENDATIONS_FILE);
    write_atomic(&path, &export_recommendations_csv(ranking.top())?)?;
    Ok(path)
}

/// Write every sweep artifact. Returns the paths written, manifest last.
pub fn save_sweep(run: &SweepRun, ranking: &Ranking, output_dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(output_dir)?;
    let mut written = Vec::new();

    let windows: Vec<u32> = {
        let mut w: Vec<u32> = run.grid.aggregates.keys().map(|k| k.hours_window).collect();
        w.dedup();
        w
    };
    for h in windows {
        let path = output_dir.join(window_results_file(h));
        let rows = run.grid.aggregates.values().filter(|a| a.hours_window == h);
        write_atomic(&path, &export_results_csv(rows)?)?;
        written.push(path);
    }

    let path = output_dir.join(ALL_RESULTS_FILE);
    write_atomic(&path, &export_results_csv(run.grid.aggregates.values())?)?;
    written.push(path);

    written.push(save_recommendations(ranking, output_dir)?);

    let path = output_dir.join(AGGREGATES_FILE);
    write_atomic(&path, &export_aggregates_json(&AggregatesFile::from_run(run))?)?;
    written.push(path);

    let manifest = Manifest {
        schema_version: SCHEMA_VERSION,
        run_id: run.run_id.clone(),
        config: run.config.clone(),
        signal_summary: run.signal_summary.clone(),
        skips: run.skips,
        skipped_signals: run.skipped_signals.clone(),
        stats: run.stats(),
        started_at: run.started_at,
        finished_at: run.finished_at,
        files: written
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect(),
    };
    let path = output_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(&manifest).context("failed to serialize manifest")?;
    write_atomic(&path, &json)?;
    written.push(path);

    Ok(written)
}

/// Replay summaries as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySummaryFile {
    pub schema_version: u32,
    pub windows: Vec<ReplaySummary>,
}

/// Write per-window replay tables and the summary file.
pub fn save_replay(report: &ReplayReport, output_dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(output_dir)?;
    let mut written = Vec::new();
    for w in &report.windows {
        let path = output_dir.join(replay_trades_file(w.summary.hours_window));
        write_atomic(&path, &export_replay_csv(&w.trades)?)?;
        written.push(path);
    }

    let summary = ReplaySummaryFile {
        schema_version: SCHEMA_VERSION,
        windows: report.windows.iter().map(|w| w.summary.clone()).collect(),
    };
    let path = output_dir.join(REPLAY_SUMMARY_FILE);
    let json =
        serde_json::to_string_pretty(&summary).context("failed to serialize replay summary")?;
    write_atomic(&path, &json)?;
    written.push(path);
    Ok(written)
}
