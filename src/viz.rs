//! Cohort scatter plot of final agent health states.

use crate::env::Environment;
use crate::model::{CohortProfile, Health, Person};
use crate::stats::{CohortStats, HealthCounts};
use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDateTime};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Cluster center of each cohort, in cohort-id order.
pub const COHORT_CENTERS: [(f64, f64); 3] = [(-5.0, 0.0), (0.0, 0.0), (5.0, 0.0)];

/// Height at which cohort names are written, below the clusters.
pub const LABEL_Y: f64 = -2.5;

/// Horizontal placement of the stats blocks, as a fraction of the width.
const BLOCK_X: [f64; 3] = [0.1, 0.4, 0.7];

const WIDTH: u32 = 1200;
const HEIGHT: u32 = 800;
const TEXT_HEIGHT: u32 = 140;

pub fn health_color(health: Health) -> RGBColor {
    match health {
        Health::Susceptible => RGBColor(0, 0, 255),
        Health::Exposed => RGBColor(255, 165, 0),
        Health::Infected => RGBColor(255, 0, 0),
        Health::Recovered => RGBColor(0, 128, 0),
        Health::Dead => RGBColor(0, 0, 0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentPoint {
    pub x: f64,
    pub y: f64,
    pub health: Health,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLabel {
    pub name: String,
    pub x: f64,
    pub y: f64,
}

/// Health breakdown printed under the plot for one non-empty cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortBlock {
    pub name: String,
    pub total: usize,
    pub counts: HealthCounts,
}

impl CohortBlock {
    /// Percentage of the cohort in `health`.
    pub fn percent(&self, health: Health) -> f64 {
        100.0 * self.counts.get(health) as f64 / self.total as f64
    }

    fn entry(&self, health: Health) -> String {
        format!(
            "{}: {} ({:.1}%)",
            health.tag(),
            self.counts.get(health),
            self.percent(health)
        )
    }

    pub fn lines(&self) -> [String; 3] {
        [
            format!("{} (n={}):", self.name, self.total),
            format!(
                "{}, {}, {},",
                self.entry(Health::Susceptible),
                self.entry(Health::Exposed),
                self.entry(Health::Infected)
            ),
            format!(
                "{}, {}",
                self.entry(Health::Recovered),
                self.entry(Health::Dead)
            ),
        ]
    }
}

/// Everything drawn in the figure, in data coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortFigure {
    pub points: Vec<AgentPoint>,
    pub labels: Vec<ClusterLabel>,
    pub blocks: Vec<CohortBlock>,
}

impl CohortFigure {
    /// Lay out one jittered point per agent around its cohort's center.
    ///
    /// Cohorts without members get no stats block.
    pub fn build<R: Rng + ?Sized>(
        people: &[Person],
        profiles: &[CohortProfile],
        rng: &mut R,
    ) -> Result<Self> {
        let noise = Normal::new(0.0, 1.0)?;

        let mut points = Vec::with_capacity(people.len());
        for person in people {
            let Some(&(cx, cy)) = COHORT_CENTERS.get(person.cohort_id) else {
                bail!(
                    "agent {} has cohort id {} but only {} clusters exist",
                    person.id,
                    person.cohort_id,
                    COHORT_CENTERS.len()
                );
            };
            points.push(AgentPoint {
                x: cx + noise.sample(rng),
                y: cy + noise.sample(rng),
                health: person.health,
            });
        }

        let labels = COHORT_CENTERS
            .iter()
            .zip(profiles)
            .map(|(&(x, _), profile)| ClusterLabel {
                name: profile.name.clone(),
                x,
                y: LABEL_Y,
            })
            .collect();

        let blocks = CohortStats::collect(people, profiles)
            .context("failed to partition agents by cohort")?
            .cohorts
            .into_iter()
            .filter(|coh| coh.total > 0)
            .map(|coh| CohortBlock {
                name: coh.name,
                total: coh.total,
                counts: coh.counts,
            })
            .collect();

        Ok(Self {
            points,
            labels,
            blocks,
        })
    }

    /// Draw the figure into a PNG file.
    pub fn render<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let root = BitMapBackend::new(file, (WIDTH, HEIGHT)).into_drawing_area();
        root.fill(&WHITE)?;
        let (plot_area, text_area) = root.split_vertically(HEIGHT - TEXT_HEIGHT);

        let mut chart = ChartBuilder::on(&plot_area)
            .caption(
                "Agent Health States by Cohort after Pandemic Simulation",
                ("sans-serif", 28),
            )
            .margin(20)
            .x_label_area_size(30)
            .build_cartesian_2d(-9.0..9.0, -4.0..4.0)?;

        chart
            .configure_mesh()
            .disable_mesh()
            .x_labels(0)
            .y_labels(0)
            .x_desc("Cohort Grouping (Position is arbitrary)")
            .draw()?;

        for health in Health::ALL {
            let color = health_color(health);
            chart
                .draw_series(
                    self.points
                        .iter()
                        .filter(|pt| pt.health == health)
                        .map(|pt| Circle::new((pt.x, pt.y), 7, color.mix(0.7).filled())),
                )?
                .label(health.name())
                .legend(move |(x, y)| Circle::new((x, y), 6, color.filled()));
        }

        let label_style = TextStyle::from(("sans-serif", 22).into_font())
            .pos(Pos::new(HPos::Center, VPos::Top));
        chart.draw_series(
            self.labels
                .iter()
                .map(|lbl| Text::new(lbl.name.clone(), (lbl.x, lbl.y), label_style.clone())),
        )?;

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;

        for (block, frac) in self.blocks.iter().zip(BLOCK_X) {
            let x = (frac * f64::from(WIDTH)) as i32;
            for (i_line, line) in block.lines().into_iter().enumerate() {
                let y = 20 + 24 * i_line as i32;
                text_area.draw(&Text::new(line, (x, y), ("sans-serif", 16).into_font()))?;
            }
        }

        root.present()
            .with_context(|| format!("failed to write {file:?}"))?;
        Ok(())
    }
}

/// Name of the figure generated at `time`.
pub fn figure_file_name(time: &NaiveDateTime) -> String {
    format!("cohort_visualization_{}.png", time.format("%Y%m%d_%H%M%S"))
}

/// Plot the environment's current population and return the image path.
pub fn visualize_agents_by_cohort<E, R, P>(env: &E, dir: P, rng: &mut R) -> Result<PathBuf>
where
    E: Environment + ?Sized,
    R: Rng + ?Sized,
    P: AsRef<Path>,
{
    let figure = CohortFigure::build(env.people(), env.cohort_profiles(), rng)
        .context("failed to lay out figure")?;

    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
    let file = dir.join(figure_file_name(&Local::now().naive_local()));

    figure.render(&file).context("failed to render figure")?;
    log::info!("Visualization saved to {}", file.display());

    Ok(file)
}
