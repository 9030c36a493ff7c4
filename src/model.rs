//! Agent population data types.

use crate::policy::{EpsilonGreedy, Policy};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Epidemic status of an agent. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Susceptible,
    Exposed,
    Infected,
    Recovered,
    Dead,
}

impl Health {
    pub const COUNT: usize = 5;

    pub const ALL: [Health; Self::COUNT] = [
        Health::Susceptible,
        Health::Exposed,
        Health::Infected,
        Health::Recovered,
        Health::Dead,
    ];

    pub fn index(self) -> usize {
        match self {
            Health::Susceptible => 0,
            Health::Exposed => 1,
            Health::Infected => 2,
            Health::Recovered => 3,
            Health::Dead => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Health::Susceptible => "susceptible",
            Health::Exposed => "exposed",
            Health::Infected => "infected",
            Health::Recovered => "recovered",
            Health::Dead => "dead",
        }
    }

    /// One-letter tag used in tallies.
    pub fn tag(self) -> char {
        match self {
            Health::Susceptible => 'S',
            Health::Exposed => 'E',
            Health::Infected => 'I',
            Health::Recovered => 'R',
            Health::Dead => 'D',
        }
    }

    pub fn is_alive(self) -> bool {
        self != Health::Dead
    }

    /// Exposed and infected agents can transmit.
    pub fn is_infectious(self) -> bool {
        matches!(self, Health::Exposed | Health::Infected)
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Daily decision of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    StayHome,
    GoOut,
    GoOutMasked,
    Vaccinate,
}

impl Action {
    pub const COUNT: usize = 4;

    pub const ALL: [Action; Self::COUNT] = [
        Action::StayHome,
        Action::GoOut,
        Action::GoOutMasked,
        Action::Vaccinate,
    ];

    pub fn index(self) -> usize {
        match self {
            Action::StayHome => 0,
            Action::GoOut => 1,
            Action::GoOutMasked => 2,
            Action::Vaccinate => 3,
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn goes_out(self) -> bool {
        matches!(self, Action::GoOut | Action::GoOutMasked)
    }
}

/// Static description of a behavioral sub-population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortProfile {
    /// Display name.
    pub name: String,
    /// Relative weight used when assigning agents to cohorts.
    pub share: f64,
    /// Mean number of daily contacts when going out.
    pub contact_rate: f64,
    /// Reward for a day out (halved when masked).
    pub social_reward: f64,
    /// Penalty for becoming exposed.
    pub infection_penalty: f64,
}

impl CohortProfile {
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                name: "Science Followers".into(),
                share: 0.3,
                contact_rate: 3.0,
                social_reward: 0.5,
                infection_penalty: 20.0,
            },
            Self {
                name: "Moderates".into(),
                share: 0.4,
                contact_rate: 5.0,
                social_reward: 1.0,
                infection_penalty: 10.0,
            },
            Self {
                name: "Freedom Prioritizers".into(),
                share: 0.3,
                contact_rate: 8.0,
                social_reward: 2.0,
                infection_penalty: 5.0,
            },
        ]
    }
}

/// Share of the population that is currently infectious, bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pressure {
    /// Under 5% infectious.
    Low,
    /// 5% to 20% infectious.
    Medium,
    /// Over 20% infectious.
    High,
}

impl Pressure {
    pub const COUNT: usize = 3;

    pub fn from_fraction(frac: f64) -> Self {
        match frac {
            f if f < 0.05 => Self::Low,
            f if f <= 0.2 => Self::Medium,
            _ => Self::High,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

/// Discretized state observed by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub health: Health,
    pub pressure: Pressure,
    pub vaccinated: bool,
}

impl StateKey {
    pub const COUNT: usize = Health::COUNT * Pressure::COUNT * 2;

    pub fn index(&self) -> usize {
        (self.health.index() * Pressure::COUNT + self.pressure.index()) * 2
            + usize::from(self.vaccinated)
    }
}

/// Agent of the simulation.
///
/// Identity and cohort are fixed for the lifetime of the environment; the
/// remaining fields are reset at the start of every episode, except the
/// policy, which carries what the agent has learned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: usize,
    pub cohort_id: usize,
    pub health: Health,
    pub vaccinated: bool,
    /// Contacts accumulated during the current episode.
    pub social_contacts: u32,
    /// Pressure bucket seen at the last observation.
    pub pressure: Pressure,
    pub policy: EpsilonGreedy,
}

impl Person {
    pub fn new(id: usize, cohort_id: usize, epsilon: f64) -> Self {
        Self {
            id,
            cohort_id,
            health: Health::Susceptible,
            vaccinated: false,
            social_contacts: 0,
            pressure: Pressure::Low,
            policy: EpsilonGreedy::new(epsilon),
        }
    }

    /// Stable key used for policy snapshots.
    pub fn key(&self) -> String {
        format!("agent_{}", self.id)
    }

    pub fn state(&self) -> StateKey {
        StateKey {
            health: self.health,
            pressure: self.pressure,
            vaccinated: self.vaccinated,
        }
    }

    pub fn choose_action<R: Rng + ?Sized>(&self, rng: &mut R) -> Action {
        self.policy.select_action(&self.state(), rng)
    }
}
