//! End-to-end sweep, ranking, persisted artifacts and replay.
//!
//! Tests:
//! 1. A sweep writes per-window, combined, recommendation, aggregates and manifest files
//! 2. Re-ranking from aggregates.json reproduces the in-memory ranking
//! 3. Re-ranking with a stricter support threshold needs no re-simulation
//! 4. Ranking is stable across repeated runs
//! 5. Replay accounts for every signal in every window

mod common;

use tempfile::TempDir;

use signalab_runner::config::RankingConfig;
use signalab_runner::export::{
    load_aggregates, save_replay, save_sweep, window_results_file, Manifest, ALL_RESULTS_FILE,
    AGGREGATES_FILE, MANIFEST_FILE, RECOMMENDATIONS_FILE, REPLAY_SUMMARY_FILE,
};
use signalab_runner::replay::{run_replay, ReplayStatus};
use signalab_runner::scoring::{rank, Ranking};
use signalab_runner::sweep::{run_sweep, CancelToken, SweepRun};

// ─── Shared helpers ──────────────────────────────────────────────────

fn sweep() -> SweepRun {
    run_sweep(
        &common::config(),
        &common::signal_set(),
        &common::provider(),
        CancelToken::new(),
    )
    .unwrap()
}

fn ranked_keys(ranking: &Ranking) -> Vec<String> {
    ranking
        .all()
        .filter(|s| s.rank.is_some())
        .map(|s| s.aggregate.key().to_string())
        .collect()
}

// ── Artifacts ──

#[test]
fn sweep_writes_every_artifact() {
    let dir = TempDir::new().unwrap();
    let run = sweep();
    let ranking = rank(run.grid.aggregates.values(), &run.config.ranking);
    let written = save_sweep(&run, &ranking, dir.path()).unwrap();

    for name in [
        window_results_file(4),
        window_results_file(12),
        ALL_RESULTS_FILE.to_string(),
        RECOMMENDATIONS_FILE.to_string(),
        AGGREGATES_FILE.to_string(),
        MANIFEST_FILE.to_string(),
    ] {
        assert!(dir.path().join(&name).exists(), "missing {name}");
    }
    assert_eq!(written.last().unwrap(), &dir.path().join(MANIFEST_FILE));

    // 16 rows per window plus header; 32 plus header combined
    let per_window = std::fs::read_to_string(dir.path().join(window_results_file(4))).unwrap();
    assert_eq!(per_window.lines().count(), 17);
    let all = std::fs::read_to_string(dir.path().join(ALL_RESULTS_FILE)).unwrap();
    assert_eq!(all.lines().count(), 33);

    let recs = std::fs::read_to_string(dir.path().join(RECOMMENDATIONS_FILE)).unwrap();
    assert!(recs.lines().count() <= run.config.ranking.top_n + 1);
    assert!(recs.starts_with("rank,tp_percent,sl_percent,hours_window"));

    let manifest: Manifest = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest.run_id, run.run_id);
    assert_eq!(manifest.signal_summary.total, 48);
    assert_eq!(manifest.skips.total(), 0);
    assert!(!manifest.stats.cancelled);
    assert_eq!(manifest.files.len(), written.len() - 1);
}

// ── Re-ranking ──

#[test]
fn reranking_from_disk_matches_memory() {
    let dir = TempDir::new().unwrap();
    let run = sweep();
    let ranking = rank(run.grid.aggregates.values(), &run.config.ranking);
    save_sweep(&run, &ranking, dir.path()).unwrap();

    let loaded = load_aggregates(&dir.path().join(AGGREGATES_FILE)).unwrap();
    assert_eq!(loaded.run_id, run.run_id);
    assert_eq!(loaded.aggregates.len(), 32);

    let reranked = rank(&loaded.aggregates, &run.config.ranking);
    assert_eq!(ranked_keys(&reranked), ranked_keys(&ranking));
}

#[test]
fn stricter_support_excludes_everything_without_resimulating() {
    let run = sweep();
    let strict = RankingConfig {
        min_support: 49,
        ..run.config.ranking
    };
    let ranking = rank(run.grid.aggregates.values(), &strict);
    assert!(ranking.top().is_empty());
    assert_eq!(ranking.below_support().count(), 32);
}

#[test]
fn ranking_is_stable_across_runs() {
    let a = sweep();
    let b = sweep();
    assert_eq!(a.run_id, b.run_id);
    let ra = rank(a.grid.aggregates.values(), &a.config.ranking);
    let rb = rank(b.grid.aggregates.values(), &b.config.ranking);
    assert_eq!(ranked_keys(&ra), ranked_keys(&rb));

    let ranks: Vec<usize> = ra.all().filter_map(|s| s.rank).collect();
    assert_eq!(ranks, (1..=ranks.len()).collect::<Vec<_>>());
}

// ── Replay ──

#[test]
fn replay_accounts_for_every_signal() {
    let dir = TempDir::new().unwrap();
    let config = common::config();
    let report = run_replay(&config, &common::signal_set(), &common::provider()).unwrap();
    assert_eq!(report.windows.len(), 2);

    for w in &report.windows {
        let s = &w.summary;
        assert_eq!(s.total_signals, 48);
        assert_eq!(w.trades.len(), 48);
        assert_eq!(
            s.entries_filled
                + s.no_entry
                + s.insufficient_balance
                + s.max_positions_reached
                + s.data_unavailable
                + s.invalid_signal,
            s.total_signals
        );
        assert!((s.final_balance - s.starting_balance - s.overall.total_pnl).abs() < 1e-9);
        assert_eq!(s.invalid_signal, 0);
        assert!(w
            .trades
            .iter()
            .all(|t| t.status != ReplayStatus::DataUnavailable));
    }

    let written = save_replay(&report, dir.path()).unwrap();
    assert_eq!(written.len(), 3);
    assert!(dir.path().join("simple_backtest_4h.csv").exists());
    assert!(dir.path().join(REPLAY_SUMMARY_FILE).exists());
}
