//! Q-learning agents in a cohort-structured epidemic simulation.
//!
//! [`trainer::Trainer`] runs the training episodes against an
//! [`env::Environment`], [`snapshot::PolicySnapshot`] freezes what the agents
//! learned, [`trainer::replay`] re-runs one episode without exploration and
//! [`viz`] plots the final population by cohort.

pub mod config;
pub mod env;
pub mod manager;
pub mod model;
pub mod persist;
pub mod policy;
pub mod schedule;
pub mod snapshot;
pub mod stats;
pub mod trainer;
pub mod viz;
