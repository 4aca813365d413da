//! Signalab CLI: download, sweep, rank, replay and cache commands.
//!
//! Commands:
//! - `download`: prefetch every signal's candle range into the cache
//! - `sweep`: grid search over (tp, sl, window), write reports
//! - `rank`: re-rank a persisted `aggregates.json` without re-simulating
//! - `replay`: chronological replay with balance and position limits
//! - `cache status`: report cached symbols, days and size

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signalab_core::data::{BinanceProvider, CachedPriceProvider, CandleCache, CircuitBreaker};
use signalab_runner::acquisition::{download, AcquisitionWindow, SkipTally, SkippedSignal};
use signalab_runner::aggregate::AggregateMap;
use signalab_runner::config::{Partitioning, SweepConfig};
use signalab_runner::export::{load_aggregates, save_recommendations, save_replay, save_sweep};
use signalab_runner::replay::run_replay;
use signalab_runner::scoring::{rank, top_by_expectancy, Ranking};
use signalab_runner::signal_loader::{load_signals, SignalSet};
use signalab_runner::sweep::{run_sweep, CancelToken};

#[derive(Parser)]
#[command(
    name = "signalab",
    about = "Signalab CLI: exit-parameter backtesting for trading signals"
)]
struct Cli {
    /// Default log level; RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prefetch candle data for every signal into the cache.
    Download {
        /// Signal CSV file.
        #[arg(long)]
        signals: PathBuf,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cache directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,
    },
    /// Evaluate every (tp, sl, window) combination and write reports.
    Sweep {
        /// Signal CSV file.
        #[arg(long)]
        signals: PathBuf,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory for reports.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Cache directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,

        /// Offline mode: cache only, no network access.
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// Evaluate on the current thread only.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Partition work into signal batches of this size.
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Re-rank persisted aggregates without re-simulating.
    Rank {
        /// Path to aggregates.json from a previous sweep.
        #[arg(long)]
        aggregates: PathBuf,

        /// Path to a TOML config file (only `[ranking]` is used).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of recommendations to keep.
        #[arg(long)]
        top_n: Option<usize>,
    },
    /// Replay signals in time order against a running balance.
    Replay {
        /// Signal CSV file.
        #[arg(long)]
        signals: PathBuf,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory for reports.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Cache directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,

        /// Offline mode: cache only, no network access.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached symbols, day counts, date ranges and size.
    Status {
        /// Cache directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Download {
            signals,
            config,
            cache_dir,
        } => run_download(&signals, config.as_deref(), &cache_dir),
        Commands::Sweep {
            signals,
            config,
            output_dir,
            cache_dir,
            offline,
            sequential,
            batch_size,
        } => {
            let mut config = load_config(config.as_deref())?;
            if sequential {
                config.grid.parallel = false;
            }
            if let Some(n) = batch_size {
                config.grid.partitioning = Partitioning::SignalBatch;
                config.grid.batch_size = n;
            }
            config.validate()?;
            run_sweep_cmd(&signals, &config, &output_dir, &cache_dir, offline)
        }
        Commands::Rank {
            aggregates,
            config,
            top_n,
        } => run_rank(&aggregates, config.as_deref(), top_n),
        Commands::Replay {
            signals,
            config,
            output_dir,
            cache_dir,
            offline,
        } => run_replay_cmd(&signals, config.as_deref(), &output_dir, &cache_dir, offline),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
        },
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<SweepConfig> {
    match path {
        Some(p) => SweepConfig::load(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(SweepConfig::default()),
    }
}

fn load_signal_file(path: &Path, config: &SweepConfig) -> Result<SignalSet> {
    load_signals(path, &config.defaults)
        .with_context(|| format!("loading signals from {}", path.display()))
}

fn build_provider(cache_dir: &Path, offline: bool) -> Result<CachedPriceProvider> {
    let cache = CandleCache::new(cache_dir);
    if offline {
        return Ok(CachedPriceProvider::offline(cache));
    }
    let breaker = Arc::new(CircuitBreaker::default_exchange());
    let source = BinanceProvider::new(breaker).context("building Binance client")?;
    Ok(CachedPriceProvider::new(cache, Arc::new(source)))
}

fn run_download(signals_path: &Path, config_path: Option<&Path>, cache_dir: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let signals = load_signal_file(signals_path, &config)?;
    let provider = build_provider(cache_dir, false)?;

    let report = download(
        signals.signals(),
        &provider,
        AcquisitionWindow::from_config(&config),
    );

    println!("Cache: {}", cache_dir.display());
    println!("Signals:        {}", signals.len());
    println!("Days cached:    {}", report.days.from_cache);
    println!("Days fetched:   {}", report.days.fetched);
    println!("Days written:   {}", report.days.written);
    println!("Days missing:   {}", report.days.missing);
    if !report.failed.is_empty() {
        println!();
        println!("Failed ({}):", report.failed.len());
        for s in &report.failed {
            println!("  {} {} {}: {}", s.symbol, s.side, s.signal_time, s.reason);
        }
    }
    Ok(())
}

fn run_sweep_cmd(
    signals_path: &Path,
    config: &SweepConfig,
    output_dir: &Path,
    cache_dir: &Path,
    offline: bool,
) -> Result<()> {
    let signals = load_signal_file(signals_path, config)?;
    let provider = build_provider(cache_dir, offline)?;

    let run = run_sweep(config, &signals, &provider, CancelToken::new())?;
    let ranking = rank(run.grid.aggregates.values(), &config.ranking);
    let written = save_sweep(&run, &ranking, output_dir)?;
    info!(run_id = %run.run_id, files = written.len(), "sweep reports written");

    print_skip_summary(&signals, &run.skips, &run.skipped_signals);
    print_top_by_expectancy(&run.grid.aggregates);
    print_ranking(&ranking);
    println!("Reports saved to: {}", output_dir.display());
    Ok(())
}

fn run_rank(
    aggregates_path: &Path,
    config_path: Option<&Path>,
    top_n: Option<usize>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut ranking_config = config.ranking;
    if let Some(n) = top_n {
        ranking_config.top_n = n;
    }

    let file = load_aggregates(aggregates_path)?;
    info!(run_id = %file.run_id, aggregates = file.aggregates.len(), "loaded aggregates");
    if file.stats.cancelled {
        println!("WARNING: aggregates come from a cancelled sweep");
    }

    let ranking = rank(&file.aggregates, &ranking_config);
    let output_dir = aggregates_path.parent().unwrap_or_else(|| Path::new("."));
    let path = save_recommendations(&ranking, output_dir)?;

    print_ranking(&ranking);
    println!("Recommendations saved to: {}", path.display());
    Ok(())
}

fn run_replay_cmd(
    signals_path: &Path,
    config_path: Option<&Path>,
    output_dir: &Path,
    cache_dir: &Path,
    offline: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let signals = load_signal_file(signals_path, &config)?;
    let provider = build_provider(cache_dir, offline)?;

    let report = run_replay(&config, &signals, &provider)?;
    save_replay(&report, output_dir)?;

    for w in &report.windows {
        let s = &w.summary;
        println!();
        println!("=== Replay {}h ===", s.hours_window);
        println!("Signals:        {} ({} updates)", s.total_signals, s.signal_updates);
        println!("Filled:         {}", s.entries_filled);
        println!("No entry:       {}", s.no_entry);
        println!("Low balance:    {}", s.insufficient_balance);
        println!("Max positions:  {}", s.max_positions_reached);
        println!("Data missing:   {}", s.data_unavailable);
        println!("Invalid:        {}", s.invalid_signal);
        println!(
            "Balance:        {:.2} -> {:.2} ({:+.2}%)",
            s.starting_balance,
            s.final_balance,
            s.return_pct()
        );
        println!(
            "{:<12} {:>7} {:>6} {:>6} {:>8} {:>8} {:>11}",
            "Group", "Trades", "Wins", "Losses", "Expired", "Win %", "PnL"
        );
        println!("{}", "-".repeat(64));
        for (name, stats) in [
            ("overall", &s.overall),
            ("long", &s.long),
            ("short", &s.short),
            ("ladder", &s.ladder),
            ("single_exit", &s.single_exit),
        ] {
            println!(
                "{:<12} {:>7} {:>6} {:>6} {:>8} {:>7.2}% {:>11.4}",
                name,
                stats.trades,
                stats.wins,
                stats.losses,
                stats.expired,
                stats.win_rate(),
                stats.total_pnl
            );
        }
    }
    println!();
    println!("Reports saved to: {}", output_dir.display());
    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let rows = CandleCache::new(cache_dir).status();
    if rows.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    let total_size: u64 = rows.iter().map(|r| r.bytes).sum();
    println!("Cache: {}", cache_dir.display());
    println!("Symbols: {}", rows.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!(
        "{:<12} {:<25} {:>6} {:>11} {:>10}",
        "Symbol", "Date Range", "Days", "Quarantine", "Size"
    );
    println!("{}", "-".repeat(68));
    for row in &rows {
        let range = match (row.first_day, row.last_day) {
            (Some(first), Some(last)) => format!("{first} to {last}"),
            _ => "(none)".to_string(),
        };
        println!(
            "{:<12} {:<25} {:>6} {:>11} {:>10}",
            row.symbol,
            range,
            row.days,
            row.quarantined,
            format_size(row.bytes)
        );
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn print_skip_summary(signals: &SignalSet, skips: &SkipTally, skipped: &[SkippedSignal]) {
    let summary = signals.summary();
    println!();
    println!("=== Signals ===");
    println!(
        "Loaded:         {} ({} long, {} short)",
        summary.total, summary.long, summary.short
    );
    println!("With ladder:    {}", summary.with_ladder);
    println!("Malformed:      {}", skips.malformed);
    println!("No price data:  {}", skips.data_unavailable);
    for s in skipped {
        println!("  {} {} {}: {}", s.symbol, s.side, s.signal_time, s.reason);
    }
}

fn print_top_by_expectancy(aggregates: &AggregateMap) {
    let mut windows: Vec<u32> = aggregates.keys().map(|k| k.hours_window).collect();
    windows.dedup();

    for h in windows {
        println!();
        println!("=== Top 10 by expectancy, {h}h window ===");
        println!(
            "{:>6} {:>6} {:>6} {:>6} {:>8} {:>8} {:>11} {:>11}",
            "TP %", "SL %", "Wins", "Losses", "Expired", "Win %", "Expectancy", "Total PnL"
        );
        println!("{}", "-".repeat(70));
        for a in top_by_expectancy(aggregates.values(), h, 10) {
            println!(
                "{:>6.2} {:>6.2} {:>6} {:>6} {:>8} {:>7.2}% {:>11.4} {:>11.4}",
                a.tp_percent,
                a.sl_percent,
                a.wins,
                a.losses,
                a.expired,
                a.win_rate(),
                a.expectancy(),
                a.total_pnl
            );
        }
    }
}

fn print_ranking(ranking: &Ranking) {
    println!();
    println!("=== Recommended parameters ===");
    if ranking.top().is_empty() {
        println!("No combination meets the minimum support.");
    } else {
        println!(
            "{:>4} {:>6} {:>6} {:>4} {:>7} {:>8} {:>11} {:>11} {:>7}",
            "Rank", "TP %", "SL %", "H", "Trades", "Win %", "Expectancy", "Total PnL", "Score"
        );
        println!("{}", "-".repeat(75));
        for s in ranking.top() {
            let a = &s.aggregate;
            println!(
                "{:>4} {:>6.2} {:>6.2} {:>4} {:>7} {:>7.2}% {:>11.4} {:>11.4} {:>7.4}",
                s.rank.unwrap_or_default(),
                a.tp_percent,
                a.sl_percent,
                a.hours_window,
                a.total_trades,
                a.win_rate(),
                a.expectancy(),
                a.total_pnl,
                s.score
            );
        }
    }
    let excluded = ranking.excluded.len();
    if excluded > 0 {
        println!(
            "{excluded} combination(s) excluded ({} below minimum support)",
            ranking.below_support().count()
        );
    }
    println!();
}
