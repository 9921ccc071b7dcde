//! Shared 1-D line-world fixtures for the end-to-end scenarios
//!
//! The configuration space is the real line. The deterministic simulator
//! teleports every particle exactly onto its target; the noisy variant
//! adds Gaussian actuation noise. Clustering splits sorted outcomes on
//! gaps wider than a threshold.

use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Distribution, Normal};

use belief_rrt::{ConfigSampler, OutcomeClustering, RobotModel, SimulationResult, Simulator, Statistics};

pub struct LineRobot;

impl RobotModel<f64> for LineRobot {
    fn distance(&self, a: &f64, b: &f64) -> f64 {
        (a - b).abs()
    }

    fn dimension_distances(&self, a: &f64, b: &f64) -> DVector<f64> {
        DVector::from_vec(vec![(a - b).abs()])
    }

    fn interpolate(&self, a: &f64, b: &f64, fraction: f64) -> f64 {
        a + (b - a) * fraction
    }

    fn average(&self, configs: &[f64]) -> f64 {
        configs.iter().sum::<f64>() / configs.len() as f64
    }
}

pub struct LineSampler {
    pub min: f64,
    pub max: f64,
    pub goal: f64,
}

impl ConfigSampler<f64> for LineSampler {
    fn sample(&mut self, rng: &mut dyn RngCore) -> f64 {
        rng.gen_range(self.min..self.max)
    }

    fn sample_goal(&mut self, _rng: &mut dyn RngCore) -> f64 {
        self.goal
    }
}

/// Moves every particle exactly onto the commanded target
pub struct DeterministicLineSimulator {
    rng: StdRng,
    forward_calls: u64,
    reverse_calls: u64,
}

impl DeterministicLineSimulator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            forward_calls: 0,
            reverse_calls: 0,
        }
    }
}

impl Simulator<f64> for DeterministicLineSimulator {
    fn forward_simulate(
        &mut self,
        particles: &[f64],
        target: &f64,
        _allow_contacts: bool,
    ) -> Vec<SimulationResult<f64>> {
        self.forward_calls += 1;
        particles
            .iter()
            .map(|_| SimulationResult::new(*target, *target, false, true))
            .collect()
    }

    fn reverse_simulate(
        &mut self,
        particles: &[f64],
        target: &f64,
        _allow_contacts: bool,
    ) -> Vec<SimulationResult<f64>> {
        self.reverse_calls += 1;
        particles
            .iter()
            .map(|_| SimulationResult::new(*target, *target, false, true))
            .collect()
    }

    fn check_collision(&self, _config: &f64) -> bool {
        false
    }

    fn reset_statistics(&mut self) {
        self.forward_calls = 0;
        self.reverse_calls = 0;
    }

    fn statistics(&self) -> Statistics {
        let mut statistics = Statistics::new();
        statistics.insert("forward_simulations".into(), self.forward_calls as f64);
        statistics.insert("reverse_simulations".into(), self.reverse_calls as f64);
        statistics
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}

/// Adds zero-mean Gaussian actuation noise to every motion
pub struct NoisyLineSimulator {
    rng: StdRng,
    noise: Normal<f64>,
}

impl NoisyLineSimulator {
    pub fn new(seed: u64, sigma: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            noise: Normal::new(0.0, sigma).expect("sigma must be finite and positive"),
        }
    }
}

impl Simulator<f64> for NoisyLineSimulator {
    fn forward_simulate(
        &mut self,
        particles: &[f64],
        target: &f64,
        _allow_contacts: bool,
    ) -> Vec<SimulationResult<f64>> {
        particles
            .iter()
            .map(|_| {
                let landed = target + self.noise.sample(&mut self.rng);
                SimulationResult::new(landed, *target, false, true)
            })
            .collect()
    }

    fn reverse_simulate(
        &mut self,
        particles: &[f64],
        target: &f64,
        _allow_contacts: bool,
    ) -> Vec<SimulationResult<f64>> {
        particles
            .iter()
            .map(|_| {
                let landed = target + self.noise.sample(&mut self.rng);
                SimulationResult::new(landed, *target, false, true)
            })
            .collect()
    }

    fn check_collision(&self, _config: &f64) -> bool {
        false
    }

    fn reset_statistics(&mut self) {}

    fn statistics(&self) -> Statistics {
        Statistics::new()
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}

/// Splits sorted 1-D outcomes on gaps wider than the threshold
pub struct GapClustering {
    pub threshold: f64,
}

impl OutcomeClustering<f64> for GapClustering {
    fn cluster_particles(
        &mut self,
        _parent_particles: &[f64],
        results: &[SimulationResult<f64>],
    ) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..results.len()).collect();
        order.sort_by(|&a, &b| {
            results[a]
                .result_config
                .partial_cmp(&results[b].result_config)
                .expect("line configurations are totally ordered")
        });
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for index in order {
            let joins_last = clusters.last().map_or(false, |cluster| {
                let previous = *cluster.last().expect("clusters are non-empty");
                (results[index].result_config - results[previous].result_config).abs()
                    <= self.threshold
            });
            if joins_last {
                clusters
                    .last_mut()
                    .expect("joins_last implies a cluster exists")
                    .push(index);
            } else {
                clusters.push(vec![index]);
            }
        }
        clusters
    }

    fn identify_cluster_members(
        &mut self,
        parent_particles: &[f64],
        results: &[SimulationResult<f64>],
    ) -> Vec<bool> {
        results
            .iter()
            .map(|result| {
                parent_particles
                    .iter()
                    .any(|p| (p - result.result_config).abs() <= self.threshold)
            })
            .collect()
    }

    fn reset_statistics(&mut self) {}

    fn statistics(&self) -> Statistics {
        Statistics::new()
    }
}
