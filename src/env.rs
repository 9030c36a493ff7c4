use crate::config::{Config, DiseaseConfig};
use crate::model::{Action, CohortProfile, Health, Person, Pressure, StateKey};
use crate::stats::{CohortStats, HealthCounts};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand::seq::index;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Poisson, weighted::WeightedIndex};

/// Reward lost when vaccinating.
const VACCINATION_COST: f64 = 1.0;
/// Reward lost when dying.
const DEATH_PENALTY: f64 = 50.0;

/// What the environment reports after a reset or a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub step: usize,
    pub counts: HealthCounts,
}

/// Outcome of one environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub observation: Observation,
    pub reward: f64,
    /// The episode reached a terminal state.
    pub terminated: bool,
    /// The episode hit the step limit.
    pub truncated: bool,
}

/// Multi-agent simulation driven by the training loop.
pub trait Environment {
    /// Start a new episode with fresh health states.
    fn reset(&mut self) -> Result<Observation>;

    /// Advance one step given one action per agent, in agent order.
    fn step(&mut self, actions: &[Action]) -> Result<Transition>;

    fn people(&self) -> &[Person];

    fn people_mut(&mut self) -> &mut [Person];

    fn cohort_profiles(&self) -> &[CohortProfile];

    fn max_steps(&self) -> usize;

    fn current_step(&self) -> usize;

    /// Fraction of living agents that wore a mask on the last step.
    fn avg_mask_usage(&self) -> f64;

    fn cohort_statistics(&self) -> Result<CohortStats> {
        CohortStats::collect(self.people(), self.cohort_profiles())
    }

    /// Set the exploration rate of every agent.
    fn set_epsilon(&mut self, epsilon: f64) {
        for person in self.people_mut() {
            person.policy.epsilon = epsilon;
        }
    }

    /// Human-readable summary of the current population.
    fn render(&self) -> String {
        let counts = HealthCounts::from_people(self.people());
        format!("Day {}: {}", self.current_step(), counts.tally())
    }
}

/// Cohort-structured SEIRD epidemic with learning agents.
pub struct InfectionEnv {
    disease: DiseaseConfig,
    profiles: Vec<CohortProfile>,
    people: Vec<Person>,
    initial_infected: usize,
    max_steps: usize,
    gamma: f64,
    alpha: f64,
    current_step: usize,
    avg_mask_usage: f64,
    rng: ChaCha12Rng,
}

impl InfectionEnv {
    /// Create the population and assign every agent to a cohort.
    pub fn new(cfg: &Config, epsilon: f64, mut rng: ChaCha12Rng) -> Result<Self> {
        let pop = &cfg.population;
        let shares: Vec<f64> = pop.cohorts.iter().map(|coh| coh.share).collect();
        let coh_dist = WeightedIndex::new(&shares).context("failed to build cohort distribution")?;

        let people = (0..pop.n_people)
            .map(|id| Person::new(id, coh_dist.sample(&mut rng), epsilon))
            .collect();

        let mut env = Self {
            disease: cfg.disease.clone(),
            profiles: pop.cohorts.clone(),
            people,
            initial_infected: pop.initial_infected,
            max_steps: cfg.training.max_steps,
            gamma: cfg.training.gamma,
            alpha: cfg.training.alpha,
            current_step: 0,
            avg_mask_usage: 0.0,
            rng,
        };
        env.reset().context("failed to reset new environment")?;
        Ok(env)
    }

    fn observe(&mut self) -> Observation {
        let counts = HealthCounts::from_people(&self.people);
        let n_infectious = counts.exposed + counts.infected;
        let pressure = Pressure::from_fraction(n_infectious as f64 / self.people.len() as f64);
        for person in &mut self.people {
            person.pressure = pressure;
        }
        Observation {
            step: self.current_step,
            counts,
        }
    }

    fn apply_actions(&mut self, actions: &[Action], rewards: &mut [f64]) -> Vec<usize> {
        let mut i_out = Vec::new();
        let mut n_alive = 0;
        let mut n_masked = 0;

        for (i_agt, (person, &action)) in self.people.iter_mut().zip(actions).enumerate() {
            if !person.health.is_alive() {
                continue;
            }
            n_alive += 1;
            let profile = &self.profiles[person.cohort_id];
            match action {
                Action::StayHome => {}
                Action::GoOut => {
                    rewards[i_agt] += profile.social_reward;
                }
                Action::GoOutMasked => {
                    rewards[i_agt] += 0.5 * profile.social_reward;
                    n_masked += 1;
                }
                Action::Vaccinate => {
                    if !person.vaccinated {
                        person.vaccinated = true;
                        rewards[i_agt] -= VACCINATION_COST;
                    }
                }
            }
            if action.goes_out() {
                i_out.push(i_agt);
            }
        }

        self.avg_mask_usage = if n_alive == 0 {
            0.0
        } else {
            n_masked as f64 / n_alive as f64
        };

        i_out
    }

    fn spread_infection(&mut self, actions: &[Action], i_out: &[usize]) -> Result<Vec<bool>> {
        let mut exposed = vec![false; self.people.len()];
        if i_out.len() < 2 {
            return Ok(exposed);
        }

        let mut contact_dists = Vec::with_capacity(self.profiles.len());
        for profile in &self.profiles {
            contact_dists.push(if profile.contact_rate > 0.0 {
                Some(Poisson::new(profile.contact_rate)?)
            } else {
                None
            });
        }

        let infectious: Vec<bool> = self.people.iter().map(|p| p.health.is_infectious()).collect();
        let mask_factor = 1.0 - self.disease.mask_efficacy;
        let vaccine_factor = 1.0 - self.disease.vaccine_efficacy;

        for (pos, &i_agt) in i_out.iter().enumerate() {
            let Some(dist) = &contact_dists[self.people[i_agt].cohort_id] else {
                continue;
            };
            let n_contacts = dist.sample(&mut self.rng) as u32;
            self.people[i_agt].social_contacts += n_contacts;

            if self.people[i_agt].health != Health::Susceptible {
                continue;
            }
            for _ in 0..n_contacts {
                // Uniform partner among the others who went out.
                let mut k = self.rng.random_range(0..i_out.len() - 1);
                if k >= pos {
                    k += 1;
                }
                let j_agt = i_out[k];
                if !infectious[j_agt] {
                    continue;
                }
                let mut prob = self.disease.transmission_prob;
                if actions[i_agt] == Action::GoOutMasked {
                    prob *= mask_factor;
                }
                if actions[j_agt] == Action::GoOutMasked {
                    prob *= mask_factor;
                }
                if self.people[i_agt].vaccinated {
                    prob *= vaccine_factor;
                }
                if Bernoulli::new(prob)?.sample(&mut self.rng) {
                    exposed[i_agt] = true;
                    break;
                }
            }
        }

        Ok(exposed)
    }

    fn progress_disease(&mut self, exposed: &[bool], rewards: &mut [f64]) -> Result<()> {
        let inc_dist = Bernoulli::new(self.disease.incubation_prob)?;
        let death_prob = self.disease.death_prob;
        let leave_prob = death_prob + self.disease.recovery_prob;

        for (i_agt, person) in self.people.iter_mut().enumerate() {
            match person.health {
                Health::Susceptible if exposed[i_agt] => {
                    person.health = Health::Exposed;
                    rewards[i_agt] -= self.profiles[person.cohort_id].infection_penalty;
                }
                Health::Exposed if inc_dist.sample(&mut self.rng) => {
                    person.health = Health::Infected;
                }
                Health::Infected => {
                    let u: f64 = self.rng.random();
                    if u < death_prob {
                        person.health = Health::Dead;
                        rewards[i_agt] -= DEATH_PENALTY;
                    } else if u < leave_prob {
                        person.health = Health::Recovered;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Environment for InfectionEnv {
    fn reset(&mut self) -> Result<Observation> {
        for person in &mut self.people {
            person.health = Health::Susceptible;
            person.vaccinated = false;
            person.social_contacts = 0;
        }

        let n_people = self.people.len();
        let n_infected = self.initial_infected.min(n_people);
        for i_agt in index::sample(&mut self.rng, n_people, n_infected) {
            self.people[i_agt].health = Health::Infected;
        }

        self.current_step = 0;
        self.avg_mask_usage = 0.0;

        Ok(self.observe())
    }

    fn step(&mut self, actions: &[Action]) -> Result<Transition> {
        if actions.len() != self.people.len() {
            bail!(
                "expected {} actions, one per agent, but got {}",
                self.people.len(),
                actions.len()
            );
        }

        let states: Vec<StateKey> = self.people.iter().map(Person::state).collect();
        let was_alive: Vec<bool> = self.people.iter().map(|p| p.health.is_alive()).collect();
        let mut rewards = vec![0.0; self.people.len()];

        let i_out = self.apply_actions(actions, &mut rewards);

        let exposed = self
            .spread_infection(actions, &i_out)
            .context("failed to spread infection")?;

        self.progress_disease(&exposed, &mut rewards)
            .context("failed to progress disease")?;

        self.current_step += 1;
        let observation = self.observe();

        let terminated = observation.counts.exposed + observation.counts.infected == 0;
        let truncated = self.current_step >= self.max_steps;

        for (i_agt, person) in self.people.iter_mut().enumerate() {
            if !was_alive[i_agt] {
                continue;
            }
            let next = person.state();
            let next = (person.health.is_alive() && !terminated).then_some(&next);
            person.policy.learn(
                &states[i_agt],
                actions[i_agt],
                rewards[i_agt],
                next,
                self.alpha,
                self.gamma,
            );
        }

        Ok(Transition {
            observation,
            reward: rewards.iter().sum(),
            terminated,
            truncated,
        })
    }

    fn people(&self) -> &[Person] {
        &self.people
    }

    fn people_mut(&mut self) -> &mut [Person] {
        &mut self.people
    }

    fn cohort_profiles(&self) -> &[CohortProfile] {
        &self.profiles
    }

    fn max_steps(&self) -> usize {
        self.max_steps
    }

    fn current_step(&self) -> usize {
        self.current_step
    }

    fn avg_mask_usage(&self) -> f64 {
        self.avg_mask_usage
    }
}
