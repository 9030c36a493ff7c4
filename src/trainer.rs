use crate::config::TrainingConfig;
use crate::env::{Environment, Transition};
use crate::model::Action;
use crate::schedule::EpsilonSchedule;
use crate::snapshot::PolicySnapshot;
use crate::stats::{EpisodeSummary, HealthCounts, TrainingStats};
use anyhow::{Context, Result};
use rand::Rng;
use rand_chacha::ChaCha12Rng;

/// How an episode ended.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpisodeOutcome {
    pub reward: f64,
    pub n_steps: usize,
    pub terminated: bool,
    pub truncated: bool,
}

/// Run one episode of at most `max_steps` steps.
///
/// Every living agent picks its own action; dead agents are given
/// [`Action::StayHome`] so the action vector always has one entry per agent.
/// `on_step` is called after each step with the 0-based day index.
pub fn run_episode<E, R, F>(
    env: &mut E,
    max_steps: usize,
    rng: &mut R,
    mut on_step: F,
) -> Result<EpisodeOutcome>
where
    E: Environment + ?Sized,
    R: Rng + ?Sized,
    F: FnMut(usize, &E, &Transition),
{
    let mut outcome = EpisodeOutcome::default();
    for day in 0..max_steps {
        let actions: Vec<Action> = env
            .people()
            .iter()
            .map(|person| {
                if person.health.is_alive() {
                    person.choose_action(rng)
                } else {
                    Action::StayHome
                }
            })
            .collect();

        let trans = env
            .step(&actions)
            .with_context(|| format!("failed to perform step {day}"))?;

        outcome.reward += trans.reward;
        outcome.n_steps = day + 1;
        on_step(day, env, &trans);

        if trans.terminated || trans.truncated {
            outcome.terminated = trans.terminated;
            outcome.truncated = trans.truncated;
            break;
        }
    }
    Ok(outcome)
}

/// Drives the episodic training regimen.
pub struct Trainer {
    n_episodes: usize,
    max_steps: usize,
    report_every: usize,
    schedule: EpsilonSchedule,
    rng: ChaCha12Rng,
}

impl Trainer {
    pub fn new(cfg: &TrainingConfig, report_every: usize, rng: ChaCha12Rng) -> Result<Self> {
        let schedule = EpsilonSchedule::new(cfg.epsilon_start, cfg.epsilon_end, cfg.n_episodes)
            .context("failed to construct epsilon schedule")?;
        Ok(Self {
            n_episodes: cfg.n_episodes,
            max_steps: cfg.max_steps,
            report_every: report_every.max(1),
            schedule,
            rng,
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.schedule.current()
    }

    /// Run every episode and return the gathered statistics.
    pub fn train<E: Environment + ?Sized>(&mut self, env: &mut E) -> Result<TrainingStats> {
        let mut stats = TrainingStats::new();
        env.set_epsilon(self.schedule.current());

        log::info!(
            "starting training with {} agents for {} episodes",
            env.people().len(),
            self.n_episodes
        );

        for i_ep in 0..self.n_episodes {
            env.reset()
                .with_context(|| format!("failed to reset episode {}", i_ep + 1))?;

            let outcome = run_episode(env, self.max_steps, &mut self.rng, |_, _, _| {})
                .with_context(|| format!("failed to run episode {}", i_ep + 1))?;

            let summary =
                EpisodeSummary::from_people(env.people(), outcome.reward, env.avg_mask_usage());
            let cohort_stats = env
                .cohort_statistics()
                .context("failed to compute cohort statistics")?;

            let epsilon = self.schedule.advance();
            env.set_epsilon(epsilon);

            let episode = stats.push(summary, cohort_stats, epsilon);
            log::debug!(
                "episode {episode}: {} steps, reward {:.2}, epsilon {epsilon:.4}",
                outcome.n_steps,
                outcome.reward
            );

            if episode % self.report_every == 0 {
                let report = stats.rolling(self.report_every);
                log::info!(
                    "Episode {episode}/{} | Avg Reward: {:.2} | Avg Infections: {:.2}% | Avg Deaths: {:.2}%",
                    self.n_episodes,
                    report.reward.mean,
                    100.0 * report.infection_rate.mean,
                    100.0 * report.death_rate.mean
                );
            }
        }

        log::info!("training complete");
        Ok(stats)
    }
}

/// Result of a replay episode.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub episode: EpisodeOutcome,
    /// Number of agents whose policy came from the snapshot.
    pub n_restored: usize,
    /// Health counts sampled every `tally_every` days.
    pub tallies: Vec<(usize, HealthCounts)>,
}

/// Re-run one episode with frozen, purely exploiting policies.
pub fn replay<E, R>(
    env: &mut E,
    snapshot: &PolicySnapshot,
    tally_every: usize,
    rng: &mut R,
) -> Result<ReplayOutcome>
where
    E: Environment + ?Sized,
    R: Rng + ?Sized,
{
    env.reset().context("failed to reset replay episode")?;
    let n_restored = snapshot.restore(env.people_mut());
    log::info!("running visualization episode with learned policies ({n_restored} agents)");

    let tally_every = tally_every.max(1);
    let max_steps = env.max_steps();
    let mut tallies = Vec::new();
    let episode = run_episode(env, max_steps, rng, |day, env, _| {
        if day % tally_every == 0 {
            let counts = HealthCounts::from_people(env.people());
            log::info!("Day {day}: {}", counts.tally());
            tallies.push((day, counts));
        }
    })
    .context("failed to run replay episode")?;

    log::info!("Final Day {}:", env.current_step());
    log::info!("{}", env.render());

    Ok(ReplayOutcome {
        episode,
        n_restored,
        tallies,
    })
}
