use anyhow::{Result, bail};
use epidemic_rl::config::{Config, TrainingConfig};
use epidemic_rl::env::{Environment, InfectionEnv, Observation, Transition};
use epidemic_rl::manager::Manager;
use epidemic_rl::model::{Action, CohortProfile, Health, Person, Pressure, StateKey};
use epidemic_rl::persist::{save_cohort_statistics, save_results};
use epidemic_rl::snapshot::PolicySnapshot;
use epidemic_rl::stats::{CohortStats, EpisodeSummary, HealthCounts, TrainingStats};
use epidemic_rl::trainer::{Trainer, replay, run_episode};
use epidemic_rl::viz::CohortFigure;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::{ffi::OsStr, fs, path::PathBuf, process::Command};

/// Environment with fixed rewards and scripted termination.
struct ScriptedEnv {
    people: Vec<Person>,
    profiles: Vec<CohortProfile>,
    max_steps: usize,
    current_step: usize,
    reward: f64,
    terminate_at: Option<usize>,
    fail_at: Option<usize>,
    kill_all: bool,
}

impl ScriptedEnv {
    fn new(n_people: usize, n_cohorts: usize, max_steps: usize) -> Self {
        let profiles = CohortProfile::defaults()[..n_cohorts].to_vec();
        let people = (0..n_people)
            .map(|id| Person::new(id, id % n_cohorts, 1.0))
            .collect();
        Self {
            people,
            profiles,
            max_steps,
            current_step: 0,
            reward: 1.0,
            terminate_at: None,
            fail_at: None,
            kill_all: false,
        }
    }

    fn observation(&self) -> Observation {
        Observation {
            step: self.current_step,
            counts: HealthCounts::from_people(&self.people),
        }
    }
}

impl Environment for ScriptedEnv {
    fn reset(&mut self) -> Result<Observation> {
        for person in &mut self.people {
            person.health = Health::Susceptible;
            person.vaccinated = false;
            person.social_contacts = 0;
        }
        self.current_step = 0;
        Ok(self.observation())
    }

    fn step(&mut self, actions: &[Action]) -> Result<Transition> {
        if actions.len() != self.people.len() {
            bail!("wrong number of actions");
        }
        self.current_step += 1;
        if self.fail_at == Some(self.current_step) {
            bail!("scripted failure");
        }
        for (person, action) in self.people.iter_mut().zip(actions) {
            if *action == Action::Vaccinate {
                person.vaccinated = true;
            }
            if action.goes_out() {
                person.social_contacts += 1;
            }
            if self.kill_all {
                person.health = Health::Dead;
            }
        }
        Ok(Transition {
            observation: self.observation(),
            reward: self.reward,
            terminated: self.terminate_at == Some(self.current_step),
            truncated: self.current_step >= self.max_steps,
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
        0.5
    }
}

fn training_cfg(n_episodes: usize, max_steps: usize) -> TrainingConfig {
    TrainingConfig {
        n_episodes,
        max_steps,
        seed: Some(1),
        ..TrainingConfig::default()
    }
}

fn small_config(n_episodes: usize, seed: u64) -> Config {
    let mut cfg = Config::default();
    cfg.training.n_episodes = n_episodes;
    cfg.training.seed = Some(seed);
    cfg.population.n_people = 30;
    cfg.output.report_every = 5;
    cfg
}

fn test_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);
    fs::remove_dir_all(&dir).ok();
    fs::create_dir_all(&dir).expect("failed to create test directory");
    dir
}

#[test]
fn episode_stops_on_termination() {
    let mut env = ScriptedEnv::new(4, 1, 10);
    env.terminate_at = Some(2);
    let mut rng = ChaCha12Rng::seed_from_u64(0);

    let mut days = Vec::new();
    let outcome = run_episode(&mut env, 10, &mut rng, |day, _, _| days.push(day)).unwrap();

    assert_eq!(outcome.reward, 2.0);
    assert_eq!(outcome.n_steps, 2);
    assert!(outcome.terminated);
    assert!(!outcome.truncated);
    assert_eq!(days, [0, 1]);
    assert_eq!(env.current_step(), 2);
}

#[test]
fn episode_stops_at_step_limit() {
    let mut env = ScriptedEnv::new(4, 1, 100);
    let mut rng = ChaCha12Rng::seed_from_u64(0);
    let outcome = run_episode(&mut env, 5, &mut rng, |_, _, _| {}).unwrap();
    assert_eq!(outcome.n_steps, 5);
    assert_eq!(outcome.reward, 5.0);
    assert!(!outcome.terminated && !outcome.truncated);
}

#[test]
fn step_failure_propagates() {
    let mut env = ScriptedEnv::new(4, 1, 10);
    env.fail_at = Some(3);
    let mut rng = ChaCha12Rng::seed_from_u64(0);
    let err = run_episode(&mut env, 10, &mut rng, |_, _, _| {}).unwrap_err();
    assert!(format!("{err:#}").contains("scripted failure"));
}

#[test]
fn two_episode_schedule_reaches_final_epsilon() {
    let mut env = ScriptedEnv::new(4, 1, 3);
    let mut cfg = training_cfg(2, 3);
    cfg.epsilon_start = 1.0;
    cfg.epsilon_end = 0.01;
    let mut trainer = Trainer::new(&cfg, 100, ChaCha12Rng::seed_from_u64(2)).unwrap();

    let stats = trainer.train(&mut env).unwrap();

    assert_eq!(stats.len(), 2);
    assert!((stats.epsilon[0] - 0.1).abs() < 1e-12);
    assert!((stats.epsilon[1] - 0.01).abs() < 1e-12);
    assert!((trainer.epsilon() - 0.01).abs() < 1e-12);
    assert!(env.people().iter().all(|p| (p.policy.epsilon - 0.01).abs() < 1e-12));
    assert_eq!(stats.episodes[0].reward, 3.0);
}

#[test]
fn all_dead_population_reports_zero_averages() {
    let mut env = ScriptedEnv::new(6, 3, 2);
    env.kill_all = true;
    let mut trainer = Trainer::new(&training_cfg(1, 2), 100, ChaCha12Rng::seed_from_u64(3)).unwrap();

    let stats = trainer.train(&mut env).unwrap();

    let ep = &stats.episodes[0];
    assert_eq!(ep.death_rate, 1.0);
    assert_eq!(ep.infection_rate, 0.0);
    assert_eq!(ep.avg_vaccination, 0.0);
    assert_eq!(ep.avg_social_contacts, 0.0);
    assert_eq!(ep.avg_mask_usage, 0.5);
}

#[test]
fn training_statistics_hold_invariants() {
    let cfg = small_config(40, 5);
    let mut rng = ChaCha12Rng::seed_from_u64(5);
    let mut env = InfectionEnv::new(&cfg, cfg.training.epsilon_start, ChaCha12Rng::from_rng(&mut rng))
        .unwrap();
    let mut trainer = Trainer::new(&cfg.training, 10, rng).unwrap();

    let stats = trainer.train(&mut env).unwrap();

    let n_people = cfg.population.n_people;
    assert_eq!(stats.len(), 40);
    assert_eq!(
        stats.cohort_stats.keys().copied().collect::<Vec<_>>(),
        (1..=40).collect::<Vec<_>>()
    );
    for ep in &stats.episodes {
        for rate in [
            ep.infection_rate,
            ep.death_rate,
            ep.avg_vaccination,
            ep.avg_mask_usage,
        ] {
            assert!((0.0..=1.0).contains(&rate), "rate out of range: {rate}");
        }
        assert!(ep.avg_social_contacts >= 0.0);
    }
    for coh_stats in stats.cohort_stats.values() {
        for coh in &coh_stats.cohorts {
            assert_eq!(coh.counts.total(), coh.total);
        }
        assert_eq!(coh_stats.population(), n_people);
    }
    let (start, end) = (cfg.training.epsilon_start, cfg.training.epsilon_end);
    for &eps in &stats.epsilon {
        assert!(eps >= end && eps <= start);
    }
    assert!((stats.epsilon.last().unwrap() - end).abs() < 1e-9);
}

#[test]
fn reductions_are_idempotent_on_live_population() {
    let cfg = small_config(5, 6);
    let mut rng = ChaCha12Rng::seed_from_u64(6);
    let mut env = InfectionEnv::new(&cfg, 1.0, ChaCha12Rng::from_rng(&mut rng)).unwrap();
    let mut trainer = Trainer::new(&cfg.training, 10, rng).unwrap();
    trainer.train(&mut env).unwrap();

    let a = EpisodeSummary::from_people(env.people(), 0.0, env.avg_mask_usage());
    let b = EpisodeSummary::from_people(env.people(), 0.0, env.avg_mask_usage());
    assert_eq!(a, b);
    assert_eq!(env.cohort_statistics().unwrap(), env.cohort_statistics().unwrap());
}

#[test]
fn replay_uses_frozen_policies_and_tallies_weekly() {
    let mut env = ScriptedEnv::new(9, 3, 28);
    let state = StateKey {
        health: Health::Susceptible,
        pressure: Pressure::Low,
        vaccinated: false,
    };
    for person in env.people_mut() {
        person.policy.q_table.set(&state, Action::GoOutMasked, 1.0);
    }
    let snapshot = PolicySnapshot::extract(env.people());
    for person in env.people_mut() {
        person.policy.q_table.set(&state, Action::GoOutMasked, -1.0);
        person.policy.epsilon = 1.0;
    }

    let mut rng = ChaCha12Rng::seed_from_u64(7);
    let out = replay(&mut env, &snapshot, 7, &mut rng).unwrap();

    assert_eq!(out.n_restored, 9);
    assert_eq!(out.episode.n_steps, 28);
    let days: Vec<_> = out.tallies.iter().map(|&(day, _)| day).collect();
    assert_eq!(days, [0, 7, 14, 21]);
    for (_, counts) in &out.tallies {
        assert_eq!(counts.total(), 9);
    }
    // Greedy agents went out masked every day.
    assert!(env.people().iter().all(|p| p.policy.epsilon == 0.0));
    assert!(env.people().iter().all(|p| p.social_contacts == 28));
}

#[test]
fn snapshot_survives_replay_learning() {
    let cfg = small_config(10, 8);
    let mut rng = ChaCha12Rng::seed_from_u64(8);
    let mut env = InfectionEnv::new(&cfg, 1.0, ChaCha12Rng::from_rng(&mut rng)).unwrap();
    let mut trainer = Trainer::new(&cfg.training, 10, ChaCha12Rng::from_rng(&mut rng)).unwrap();
    trainer.train(&mut env).unwrap();

    let snapshot = PolicySnapshot::extract(env.people());
    let frozen = snapshot.clone();

    // The environment keeps learning during replay.
    replay(&mut env, &snapshot, 7, &mut rng).unwrap();

    assert_eq!(snapshot, frozen);
    assert_eq!(snapshot.len(), cfg.population.n_people);
}

#[test]
fn figure_skips_empty_cohort() {
    let mut env = ScriptedEnv::new(4, 3, 1);
    // Nobody in cohort 1.
    for person in env.people_mut() {
        person.cohort_id = if person.id % 2 == 0 { 0 } else { 2 };
    }
    let mut rng = ChaCha12Rng::seed_from_u64(9);
    let fig = CohortFigure::build(env.people(), env.cohort_profiles(), &mut rng).unwrap();
    assert_eq!(fig.blocks.len(), 2);
    for blk in &fig.blocks {
        let pct: f64 = Health::ALL.iter().map(|&h| blk.percent(h)).sum();
        assert!((pct - 100.0).abs() < 1e-9);
    }
}

#[test]
fn results_are_saved_and_reloaded() {
    let dir = test_dir("results_are_saved_and_reloaded");
    let cfg = small_config(3, 10);
    let mut rng = ChaCha12Rng::seed_from_u64(10);
    let mut env = InfectionEnv::new(&cfg, 1.0, ChaCha12Rng::from_rng(&mut rng)).unwrap();
    let mut trainer = Trainer::new(&cfg.training, 10, rng).unwrap();
    let stats = trainer.train(&mut env).unwrap();

    let files = save_results(&env, &stats, 3, dir.join("results")).unwrap();
    assert_eq!(files.len(), 3);
    assert!(files.iter().all(|file| file.is_file()));

    let loaded = PolicySnapshot::load(&files[1]).unwrap();
    assert_eq!(loaded, PolicySnapshot::extract(env.people()));

    let stats_bytes = fs::read(&files[0]).unwrap();
    let reloaded: TrainingStats = rmp_serde::from_slice(&stats_bytes).unwrap();
    assert_eq!(reloaded, stats);

    let files = save_cohort_statistics(&env, &stats, dir.join("cohorts")).unwrap();
    assert_eq!(files.len(), 2);
    let history: std::collections::BTreeMap<usize, CohortStats> =
        rmp_serde::from_slice(&fs::read(&files[0]).unwrap()).unwrap();
    assert_eq!(history.len(), 3);
    let final_toml = fs::read_to_string(&files[1]).unwrap();
    assert!(final_toml.contains("Science Followers"));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn binary_trains_from_config_file() {
    let dir = test_dir("binary_trains_from_config_file");

    let mut cfg = small_config(12, 11);
    cfg.output.results_dir = dir.join("simulation_results");
    cfg.output.cohort_stats_dir = dir.join("cohort_stats");
    cfg.output.figure_dir = dir.clone();
    let config_path = dir.join("config.toml");
    fs::write(&config_path, toml::to_string(&cfg).unwrap()).expect("failed to write config file");

    let bin = PathBuf::from(env!("CARGO_BIN_EXE_epidemic-rl"));
    let output = Command::new(bin)
        .arg("--config")
        .arg(&config_path)
        .arg("train")
        .output()
        .expect("failed to execute command");

    let stdout_str = String::from_utf8_lossy(&output.stdout);
    let stderr_str = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "failed to run binary\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );
    assert!(stdout_str.contains("Episode 10/12"));

    for file in [
        "simulation_results/training_stats_12.msgpack",
        "simulation_results/q_tables_12.msgpack",
        "simulation_results/summary_12.toml",
        "cohort_stats/cohort_stats.msgpack",
        "cohort_stats/final_cohort_stats.toml",
    ] {
        assert!(dir.join(file).is_file(), "missing {file}");
    }

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn binary_rejects_invalid_config() {
    let dir = test_dir("binary_rejects_invalid_config");
    let config_path = dir.join("config.toml");
    fs::write(&config_path, "[training]\nepsilon_start = 0.0\nepsilon_end = 0.0\n")
        .expect("failed to write config file");

    let output = Command::new(env!("CARGO_BIN_EXE_epidemic-rl"))
        .arg("--config")
        .arg(&config_path)
        .arg("train")
        .output()
        .expect("failed to execute command");

    assert_eq!(output.status.code(), Some(1));
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn truncated_snapshot_is_rejected() {
    #[derive(serde::Serialize)]
    struct RawTable {
        values: Vec<[f64; Action::COUNT]>,
    }
    #[derive(serde::Serialize)]
    struct RawSnapshot {
        tables: std::collections::BTreeMap<String, RawTable>,
    }

    let dir = test_dir("truncated_snapshot_is_rejected");
    let file = dir.join("q_tables.msgpack");
    let mut tables = std::collections::BTreeMap::new();
    tables.insert(
        "agent_0".to_string(),
        RawTable {
            values: vec![[0.0; Action::COUNT]; StateKey::COUNT],
        },
    );
    tables.insert("agent_1".to_string(), RawTable { values: Vec::new() });
    let bytes = rmp_serde::to_vec_named(&RawSnapshot { tables }).unwrap();
    fs::write(&file, bytes).expect("failed to write snapshot file");

    let err = PolicySnapshot::load(&file).unwrap_err();
    assert!(format!("{err:#}").contains("agent_1"), "{err:#}");

    let cfg = small_config(1, 14);
    let mut mgr = Manager::new(cfg).unwrap();
    assert!(mgr.replay_file(&file).is_err());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn binary_replays_saved_tables() {
    let dir = test_dir("binary_replays_saved_tables");

    let mut cfg = small_config(4, 15);
    cfg.output.results_dir = dir.join("simulation_results");
    cfg.output.cohort_stats_dir = dir.join("cohort_stats");
    cfg.output.figure_dir = dir.join("figures");
    let config_path = dir.join("config.toml");
    fs::write(&config_path, toml::to_string(&cfg).unwrap()).expect("failed to write config file");

    let bin = PathBuf::from(env!("CARGO_BIN_EXE_epidemic-rl"));
    let run = |args: &[&OsStr]| {
        let output = Command::new(&bin)
            .arg("--config")
            .arg(&config_path)
            .args(args)
            .output()
            .expect("failed to execute command");
        let stdout_str = String::from_utf8_lossy(&output.stdout);
        let stderr_str = String::from_utf8_lossy(&output.stderr);
        assert!(
            output.status.success(),
            "failed to run binary\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
        );
        stdout_str.into_owned()
    };

    run(&[OsStr::new("train")]);
    let q_tables = dir.join("simulation_results/q_tables_4.msgpack");
    assert!(q_tables.is_file());

    let stdout_str = run(&[
        OsStr::new("replay"),
        OsStr::new("--q-tables"),
        q_tables.as_os_str(),
    ]);
    assert!(stdout_str.contains("Visualization saved to"));

    let figures: Vec<_> = fs::read_dir(dir.join("figures"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("cohort_visualization_") && name.ends_with(".png"))
        .collect();
    assert_eq!(figures.len(), 1, "{figures:?}");
    assert!(fs::metadata(dir.join("figures").join(&figures[0])).unwrap().len() > 0);

    fs::remove_dir_all(&dir).ok();
}
