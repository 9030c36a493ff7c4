use crate::model::{CohortProfile, Health, Person};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of agents in each health state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounts {
    pub susceptible: usize,
    pub exposed: usize,
    pub infected: usize,
    pub recovered: usize,
    pub dead: usize,
}

impl HealthCounts {
    pub fn from_people<'a, I>(people: I) -> Self
    where
        I: IntoIterator<Item = &'a Person>,
    {
        let mut counts = Self::default();
        for person in people {
            counts.add(person.health);
        }
        counts
    }

    pub fn add(&mut self, health: Health) {
        *self.get_mut(health) += 1;
    }

    pub fn get(&self, health: Health) -> usize {
        match health {
            Health::Susceptible => self.susceptible,
            Health::Exposed => self.exposed,
            Health::Infected => self.infected,
            Health::Recovered => self.recovered,
            Health::Dead => self.dead,
        }
    }

    fn get_mut(&mut self, health: Health) -> &mut usize {
        match health {
            Health::Susceptible => &mut self.susceptible,
            Health::Exposed => &mut self.exposed,
            Health::Infected => &mut self.infected,
            Health::Recovered => &mut self.recovered,
            Health::Dead => &mut self.dead,
        }
    }

    pub fn total(&self) -> usize {
        Health::ALL.iter().map(|&health| self.get(health)).sum()
    }

    /// Compact `S=.., E=.., I=.., R=.., D=..` tally.
    pub fn tally(&self) -> String {
        Health::ALL
            .iter()
            .map(|&health| format!("{}={}", health.tag(), self.get(health)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Health breakdown of one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortCounts {
    pub cohort_id: usize,
    pub name: String,
    pub total: usize,
    pub counts: HealthCounts,
}

/// Per-cohort health breakdown of the whole population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortStats {
    pub cohorts: Vec<CohortCounts>,
}

impl CohortStats {
    /// Partition `people` by cohort.
    ///
    /// Fails if an agent refers to a cohort that has no profile.
    pub fn collect(people: &[Person], profiles: &[CohortProfile]) -> Result<Self> {
        let mut cohorts: Vec<_> = profiles
            .iter()
            .enumerate()
            .map(|(cohort_id, profile)| CohortCounts {
                cohort_id,
                name: profile.name.clone(),
                total: 0,
                counts: HealthCounts::default(),
            })
            .collect();

        for person in people {
            let Some(coh) = cohorts.get_mut(person.cohort_id) else {
                bail!(
                    "agent {} has cohort id {} but only {} cohorts exist",
                    person.id,
                    person.cohort_id,
                    profiles.len()
                );
            };
            coh.total += 1;
            coh.counts.add(person.health);
        }

        Ok(Self { cohorts })
    }

    pub fn population(&self) -> usize {
        self.cohorts.iter().map(|coh| coh.total).sum()
    }
}

/// Scalar reductions of the population at the end of one episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub reward: f64,
    pub infection_rate: f64,
    pub death_rate: f64,
    pub avg_vaccination: f64,
    pub avg_mask_usage: f64,
    pub avg_social_contacts: f64,
}

impl EpisodeSummary {
    /// Reduce the end-of-episode population.
    ///
    /// Vaccination and contact averages run over living agents and fall back
    /// to 0 when nobody is alive.
    pub fn from_people(people: &[Person], reward: f64, avg_mask_usage: f64) -> Self {
        let n_people = people.len();
        let counts = HealthCounts::from_people(people);

        let alive: Vec<_> = people.iter().filter(|p| p.health.is_alive()).collect();
        let avg_vaccination =
            mean_or_zero(alive.iter().map(|p| if p.vaccinated { 1.0 } else { 0.0 }));
        let avg_social_contacts = mean_or_zero(alive.iter().map(|p| f64::from(p.social_contacts)));

        Self {
            reward,
            infection_rate: ratio_or_zero(counts.infected, n_people),
            death_rate: ratio_or_zero(counts.dead, n_people),
            avg_vaccination,
            avg_mask_usage,
            avg_social_contacts,
        }
    }
}

fn ratio_or_zero(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn mean_or_zero<I: Iterator<Item = f64>>(vals: I) -> f64 {
    let mut acc = Accumulator::new();
    for val in vals {
        acc.add(val);
    }
    if acc.n_vals == 0 { 0.0 } else { acc.mean }
}

/// Statistics gathered over a training run.
///
/// One summary per completed episode, plus the cohort breakdown keyed by
/// 1-based episode number.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub episodes: Vec<EpisodeSummary>,
    pub cohort_stats: BTreeMap<usize, CohortStats>,
    /// Exploration rate after each episode's decay step.
    pub epsilon: Vec<f64>,
}

impl TrainingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed episode and return its 1-based number.
    pub fn push(
        &mut self,
        summary: EpisodeSummary,
        cohort_stats: CohortStats,
        epsilon: f64,
    ) -> usize {
        self.episodes.push(summary);
        self.epsilon.push(epsilon);
        let episode = self.episodes.len();
        self.cohort_stats.insert(episode, cohort_stats);
        episode
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Mean and spread of each quantity over the last `window` episodes.
    pub fn rolling(&self, window: usize) -> RollingReport {
        let start = self.episodes.len().saturating_sub(window);
        let recent = &self.episodes[start..];

        let mut reward = Accumulator::new();
        let mut infection_rate = Accumulator::new();
        let mut death_rate = Accumulator::new();
        let mut avg_vaccination = Accumulator::new();
        let mut avg_mask_usage = Accumulator::new();
        let mut avg_social_contacts = Accumulator::new();
        for ep in recent {
            reward.add(ep.reward);
            infection_rate.add(ep.infection_rate);
            death_rate.add(ep.death_rate);
            avg_vaccination.add(ep.avg_vaccination);
            avg_mask_usage.add(ep.avg_mask_usage);
            avg_social_contacts.add(ep.avg_social_contacts);
        }

        RollingReport {
            n_episodes: recent.len(),
            reward: reward.report(),
            infection_rate: infection_rate.report(),
            death_rate: death_rate.report(),
            avg_vaccination: avg_vaccination.report(),
            avg_mask_usage: avg_mask_usage.report(),
            avg_social_contacts: avg_social_contacts.report(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingReport {
    pub n_episodes: usize,
    pub reward: AccumulatorReport,
    pub infection_rate: AccumulatorReport,
    pub death_rate: AccumulatorReport,
    pub avg_vaccination: AccumulatorReport,
    pub avg_mask_usage: AccumulatorReport,
    pub avg_social_contacts: AccumulatorReport,
}

/// Running mean and variance (Welford).
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    /// An empty accumulator reports zeros; a single value has zero spread.
    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            mean: self.mean,
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                0.0
            },
        }
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}
