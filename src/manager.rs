use crate::config::Config;
use crate::env::{Environment, InfectionEnv};
use crate::persist::{save_cohort_statistics, save_results};
use crate::snapshot::PolicySnapshot;
use crate::stats::TrainingStats;
use crate::trainer::{Trainer, replay};
use crate::viz::visualize_agents_by_cohort;
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::path::{Path, PathBuf};

/// Everything produced by a training run.
pub struct TrainingRun {
    pub env: InfectionEnv,
    pub snapshot: PolicySnapshot,
    pub stats: TrainingStats,
    pub files: Vec<PathBuf>,
}

/// Sequences training, persistence, replay and visualization.
pub struct Manager {
    cfg: Config,
    rng: ChaCha12Rng,
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        cfg.validate().context("failed to validate config")?;
        log::debug!("{cfg:#?}");

        let rng = match cfg.training.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng().context("failed to seed rng from os")?,
        };

        Ok(Self { cfg, rng })
    }

    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let cfg = Config::from_file(file).context("failed to construct cfg")?;
        Self::new(cfg)
    }

    fn new_env(&mut self) -> Result<InfectionEnv> {
        let env_rng = ChaCha12Rng::from_rng(&mut self.rng);
        InfectionEnv::new(&self.cfg, self.cfg.training.epsilon_start, env_rng)
            .context("failed to construct environment")
    }

    /// Train, save the results and capture the learned tables.
    pub fn train(&mut self) -> Result<TrainingRun> {
        let mut env = self.new_env()?;

        let out = &self.cfg.output;
        let trainer_rng = ChaCha12Rng::from_rng(&mut self.rng);
        let mut trainer = Trainer::new(&self.cfg.training, out.report_every, trainer_rng)
            .context("failed to construct trainer")?;
        let stats = trainer.train(&mut env).context("failed to train agents")?;

        let n_episodes = self.cfg.training.n_episodes;
        let mut files = save_results(&env, &stats, n_episodes, &out.results_dir)
            .context("failed to save results")?;
        files.extend(
            save_cohort_statistics(&env, &stats, &out.cohort_stats_dir)
                .context("failed to save cohort statistics")?,
        );
        log::info!("simulation complete");
        log::info!("final results saved to: {files:?}");

        let snapshot = PolicySnapshot::extract(env.people());

        Ok(TrainingRun {
            env,
            snapshot,
            stats,
            files,
        })
    }

    /// Run the noiseless replay episode and plot the outcome.
    ///
    /// Returns the figure path.
    pub fn replay<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        snapshot: &PolicySnapshot,
    ) -> Result<PathBuf> {
        let mut replay_rng = ChaCha12Rng::from_rng(&mut self.rng);
        replay(env, snapshot, self.cfg.output.tally_every, &mut replay_rng)
            .context("failed to replay learned policies")?;

        visualize_agents_by_cohort(&*env, &self.cfg.output.figure_dir, &mut replay_rng)
            .context("failed to visualize agents by cohort")
    }

    /// Replay tables saved by an earlier run in a fresh environment.
    pub fn replay_file<P: AsRef<Path>>(&mut self, q_tables: P) -> Result<PathBuf> {
        let q_tables = q_tables.as_ref();
        let snapshot = PolicySnapshot::load(q_tables)
            .with_context(|| format!("failed to load {q_tables:?}"))?;
        log::info!("loaded {} tables from {q_tables:?}", snapshot.len());

        let mut env = self.new_env()?;
        self.replay(&mut env, &snapshot)
    }

    /// Train, then replay and visualize.
    pub fn run(&mut self) -> Result<PathBuf> {
        let TrainingRun {
            mut env, snapshot, ..
        } = self.train()?;
        self.replay(&mut env, &snapshot)
    }
}
