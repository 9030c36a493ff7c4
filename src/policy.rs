//! Tabular action-value policies.

use crate::model::{Action, StateKey};
use anyhow::{Result, bail};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Dense table of action-value estimates, one row per discretized state.
///
/// Cloning yields an independent copy, which is what snapshots rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    values: Vec<[f64; Action::COUNT]>,
}

impl QTable {
    pub fn new() -> Self {
        Self {
            values: vec![[0.0; Action::COUNT]; StateKey::COUNT],
        }
    }

    pub fn row(&self, state: &StateKey) -> &[f64; Action::COUNT] {
        &self.values[state.index()]
    }

    pub fn get(&self, state: &StateKey, action: Action) -> f64 {
        self.values[state.index()][action.index()]
    }

    pub fn set(&mut self, state: &StateKey, action: Action, value: f64) {
        self.values[state.index()][action.index()] = value;
    }

    pub fn max_value(&self, state: &StateKey) -> f64 {
        self.row(state)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Check that the table has one row per discretized state.
    pub fn validate(&self) -> Result<()> {
        if self.values.len() != StateKey::COUNT {
            bail!(
                "table must have {} rows, but has {}",
                StateKey::COUNT,
                self.values.len()
            );
        }
        Ok(())
    }
}

impl Default for QTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability of choosing an action in a discretized state.
pub trait Policy {
    fn select_action<R: Rng + ?Sized>(&self, state: &StateKey, rng: &mut R) -> Action;
}

/// Epsilon-greedy policy over a [`QTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpsilonGreedy {
    pub q_table: QTable,
    /// Probability of picking a uniformly random action.
    pub epsilon: f64,
}

impl EpsilonGreedy {
    pub fn new(epsilon: f64) -> Self {
        Self {
            q_table: QTable::new(),
            epsilon,
        }
    }

    /// Greedy action, breaking ties uniformly at random.
    pub fn greedy_action<R: Rng + ?Sized>(&self, state: &StateKey, rng: &mut R) -> Action {
        let row = self.q_table.row(state);
        let max = self.q_table.max_value(state);
        let best: Vec<Action> = Action::ALL
            .into_iter()
            .filter(|action| row[action.index()] == max)
            .collect();
        best.choose(rng).copied().unwrap_or(Action::StayHome)
    }

    /// One-step Q-learning update.
    ///
    /// `next_state` is `None` when the transition ended the agent's episode,
    /// in which case no future value is bootstrapped.
    pub fn learn(
        &mut self,
        state: &StateKey,
        action: Action,
        reward: f64,
        next_state: Option<&StateKey>,
        alpha: f64,
        gamma: f64,
    ) {
        let future = next_state.map_or(0.0, |next| self.q_table.max_value(next));
        let old = self.q_table.get(state, action);
        let target = reward + gamma * future;
        self.q_table.set(state, action, old + alpha * (target - old));
    }
}

impl Policy for EpsilonGreedy {
    fn select_action<R: Rng + ?Sized>(&self, state: &StateKey, rng: &mut R) -> Action {
        if self.epsilon > 0.0 && rng.random::<f64>() < self.epsilon {
            Action::ALL[rng.random_range(0..Action::COUNT)]
        } else {
            self.greedy_action(state, rng)
        }
    }
}
