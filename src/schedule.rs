use anyhow::{Result, bail};

/// Geometric annealing of the exploration rate.
///
/// The decay rate is chosen so that `n_episodes` calls to [`advance`]
/// take the rate from `start` to `end`; it never drops below `end`.
///
/// [`advance`]: EpsilonSchedule::advance
#[derive(Debug, Clone, PartialEq)]
pub struct EpsilonSchedule {
    start: f64,
    end: f64,
    decay_rate: f64,
    current: f64,
}

impl EpsilonSchedule {
    pub fn new(start: f64, end: f64, n_episodes: usize) -> Result<Self> {
        if start.is_nan() || start <= 0.0 {
            bail!("initial exploration rate must be positive, but is {start}");
        }
        if !(0.0..=start).contains(&end) {
            bail!("final exploration rate must be in the range [0, {start}], but is {end}");
        }
        if n_episodes == 0 {
            bail!("number of episodes must be positive");
        }
        let decay_rate = (end / start).powf(1.0 / n_episodes as f64);
        Ok(Self {
            start,
            end,
            decay_rate,
            current: start,
        })
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    /// Apply one decay step and return the new rate.
    pub fn advance(&mut self) -> f64 {
        self.current = f64::max(self.end, self.current * self.decay_rate);
        self.current
    }
}
