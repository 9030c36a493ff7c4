use crate::model::CohortProfile;
use crate::viz::COHORT_CENTERS;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path, path::PathBuf};

/// Run configuration.
///
/// Every section falls back to its defaults when missing, so an empty file
/// reproduces the built-in training regimen. See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub training: TrainingConfig,
    pub disease: DiseaseConfig,
    pub population: PopulationConfig,
    pub output: OutputConfig,
}

/// Training loop parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of training episodes.
    pub n_episodes: usize,
    /// Maximum number of steps (days) per episode.
    pub max_steps: usize,
    /// Exploration rate of the first episode.
    pub epsilon_start: f64,
    /// Exploration rate reached after the last episode.
    pub epsilon_end: f64,
    /// Discount factor.
    pub gamma: f64,
    /// Learning rate.
    pub alpha: f64,
    /// Seed for all random number generators (OS entropy when absent).
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_episodes: 1000,
            max_steps: 28,
            epsilon_start: 1.0,
            epsilon_end: 0.01,
            gamma: 0.9,
            alpha: 0.1,
            seed: None,
        }
    }
}

/// Transmission and progression probabilities, all per day.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiseaseConfig {
    /// Probability that one contact with an infectious agent transmits.
    pub transmission_prob: f64,
    /// Probability that an exposed agent becomes infected.
    pub incubation_prob: f64,
    /// Probability that an infected agent recovers.
    pub recovery_prob: f64,
    /// Probability that an infected agent dies.
    pub death_prob: f64,
    /// Relative transmission reduction from wearing a mask.
    pub mask_efficacy: f64,
    /// Relative transmission reduction from vaccination.
    pub vaccine_efficacy: f64,
}

impl Default for DiseaseConfig {
    fn default() -> Self {
        Self {
            transmission_prob: 0.1,
            incubation_prob: 0.3,
            recovery_prob: 0.1,
            death_prob: 0.01,
            mask_efficacy: 0.6,
            vaccine_efficacy: 0.9,
        }
    }
}

/// Agent population parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Number of agents.
    pub n_people: usize,
    /// Number of agents infected at the start of each episode.
    pub initial_infected: usize,
    /// Behavioral cohorts, in cohort-id order.
    pub cohorts: Vec<CohortProfile>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            n_people: 100,
            initial_infected: 3,
            cohorts: CohortProfile::defaults(),
        }
    }
}

/// Output locations and reporting cadence.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub results_dir: PathBuf,
    pub cohort_stats_dir: PathBuf,
    pub figure_dir: PathBuf,
    /// Episodes between rolling progress summaries.
    pub report_every: usize,
    /// Days between health tallies during replay.
    pub tally_every: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("simulation_results"),
            cohort_stats_dir: PathBuf::from("cohort_stats"),
            figure_dir: PathBuf::from("."),
            report_every: 100,
            tally_every: 7,
        }
    }
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let trn = &self.training;
        check_num(trn.n_episodes, 1..1_000_000).context("invalid number of episodes")?;
        check_num(trn.max_steps, 1..10_000).context("invalid maximum number of steps")?;
        // A zero initial epsilon would make the decay rate undefined.
        if !(trn.epsilon_start > 0.0 && trn.epsilon_start <= 1.0) {
            bail!(
                "initial exploration rate must be in the range (0, 1], but is {:?}",
                trn.epsilon_start
            );
        }
        check_num(trn.epsilon_end, 0.0..=trn.epsilon_start)
            .context("invalid final exploration rate")?;
        check_num(trn.gamma, 0.0..=1.0).context("invalid discount factor")?;
        check_num(trn.alpha, 0.0..=1.0).context("invalid learning rate")?;

        let dis = &self.disease;
        check_num(dis.transmission_prob, 0.0..=1.0).context("invalid transmission probability")?;
        check_num(dis.incubation_prob, 0.0..=1.0).context("invalid incubation probability")?;
        check_num(dis.recovery_prob, 0.0..=1.0).context("invalid recovery probability")?;
        check_num(dis.death_prob, 0.0..=1.0).context("invalid death probability")?;
        check_num(dis.recovery_prob + dis.death_prob, 0.0..=1.0)
            .context("invalid combined recovery and death probability")?;
        check_num(dis.mask_efficacy, 0.0..=1.0).context("invalid mask efficacy")?;
        check_num(dis.vaccine_efficacy, 0.0..=1.0).context("invalid vaccine efficacy")?;

        let pop = &self.population;
        check_num(pop.n_people, 1..100_000).context("invalid number of people")?;
        check_num(pop.initial_infected, 0..=pop.n_people)
            .context("invalid initial number of infected")?;
        check_cohorts(&pop.cohorts).context("invalid cohorts")?;

        let out = &self.output;
        check_num(out.report_every, 1..1_000_000).context("invalid report interval")?;
        check_num(out.tally_every, 1..10_000).context("invalid tally interval")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_cohorts(cohorts: &[CohortProfile]) -> Result<()> {
    check_num(cohorts.len(), 1..=COHORT_CENTERS.len()).context("invalid number of cohorts")?;
    for (i_coh, coh) in cohorts.iter().enumerate() {
        check_cohort(coh).with_context(|| format!("invalid cohort {i_coh}"))?;
    }
    let sum: f64 = cohorts.iter().map(|coh| coh.share).sum();
    if sum <= 0.0 {
        bail!("cohort shares must not all be zero");
    }
    Ok(())
}

fn check_cohort(coh: &CohortProfile) -> Result<()> {
    if coh.name.trim().is_empty() {
        bail!("name must not be empty");
    }
    check_num(coh.share, 0.0..=1.0).context("invalid share")?;
    check_num(coh.contact_rate, 0.0..100.0).context("invalid contact rate")?;
    check_num(coh.social_reward, 0.0..100.0).context("invalid social reward")?;
    check_num(coh.infection_penalty, 0.0..1000.0).context("invalid infection penalty")?;
    Ok(())
}
