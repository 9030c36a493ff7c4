use crate::env::Environment;
use crate::snapshot::PolicySnapshot;
use crate::stats::{CohortCounts, HealthCounts, RollingReport, TrainingStats};
use anyhow::{Context, Result};
use rmp_serde::encode;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Episodes covered by the summary means.
const SUMMARY_WINDOW: usize = 100;

#[derive(Debug, Serialize)]
struct TrainingSummary {
    n_episodes: usize,
    n_people: usize,
    final_epsilon: f64,
    final_counts: HealthCounts,
    recent: RollingReport,
}

/// Save the episode statistics, the learned tables and a readable summary.
///
/// Returns the written files.
pub fn save_results<E, P>(
    env: &E,
    stats: &TrainingStats,
    n_episodes: usize,
    dir: P,
) -> Result<Vec<PathBuf>>
where
    E: Environment + ?Sized,
    P: AsRef<Path>,
{
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;

    let stats_file = dir.join(format!("training_stats_{n_episodes}.msgpack"));
    write_msgpack(&stats_file, stats).context("failed to save training statistics")?;

    let q_tables_file = dir.join(format!("q_tables_{n_episodes}.msgpack"));
    PolicySnapshot::extract(env.people())
        .save(&q_tables_file)
        .context("failed to save policy snapshot")?;

    let summary = TrainingSummary {
        n_episodes,
        n_people: env.people().len(),
        final_epsilon: stats.epsilon.last().copied().unwrap_or(f64::NAN),
        final_counts: HealthCounts::from_people(env.people()),
        recent: stats.rolling(SUMMARY_WINDOW),
    };
    let summary_file = dir.join(format!("summary_{n_episodes}.toml"));
    write_toml(&summary_file, &summary).context("failed to save training summary")?;

    Ok(vec![stats_file, q_tables_file, summary_file])
}

#[derive(Debug, Serialize)]
struct FinalCohortStats<'a> {
    n_episodes: usize,
    cohorts: &'a [CohortCounts],
}

/// Save the per-episode cohort breakdowns and the current population's one.
///
/// Returns the written files.
pub fn save_cohort_statistics<E, P>(env: &E, stats: &TrainingStats, dir: P) -> Result<Vec<PathBuf>>
where
    E: Environment + ?Sized,
    P: AsRef<Path>,
{
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;

    let history_file = dir.join("cohort_stats.msgpack");
    write_msgpack(&history_file, &stats.cohort_stats)
        .context("failed to save cohort statistics history")?;

    let current = env
        .cohort_statistics()
        .context("failed to compute cohort statistics")?;
    let final_file = dir.join("final_cohort_stats.toml");
    let final_stats = FinalCohortStats {
        n_episodes: stats.len(),
        cohorts: &current.cohorts,
    };
    write_toml(&final_file, &final_stats).context("failed to save final cohort statistics")?;

    Ok(vec![history_file, final_file])
}

fn write_msgpack<T: Serialize + ?Sized>(file: &Path, value: &T) -> Result<()> {
    let handle = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(handle);
    encode::write_named(&mut writer, value).context("failed to serialize value")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

fn write_toml<T: Serialize + ?Sized>(file: &Path, value: &T) -> Result<()> {
    let contents = toml::to_string(value).context("failed to serialize value")?;
    fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
    Ok(())
}
