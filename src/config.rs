//! Solver options and analysis requests handed to the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SimError};

/// Relative-residual cutoff used by the iterative solvers unless overridden.
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

/// Upper bound on the frequencies one AC sweep may expand to
pub const MAX_FREQUENCY_POINTS: usize = 10_000_000;

/// Companion-model integration rule for transient analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationRule {
    #[default]
    Trapezoidal,
    BackwardEuler,
}

impl fmt::Display for IntegrationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrationRule::Trapezoidal => write!(f, "TR"),
            IntegrationRule::BackwardEuler => write!(f, "BE"),
        }
    }
}

/// Numerical options, selected once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Store the system matrix in compressed sparse form
    pub sparse: bool,
    /// Use a Krylov method instead of a factorisation
    pub iterative: bool,
    /// Matrix is symmetric positive definite (Cholesky / CG)
    pub assume_spd: bool,
    pub integration: IntegrationRule,
    /// Relative residual cutoff for iterative solves
    pub tolerance: f64,
    /// Iteration cap; `2 * (n + m)` when unset
    pub max_iterations: Option<usize>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            sparse: false,
            iterative: false,
            assume_spd: false,
            integration: IntegrationRule::Trapezoidal,
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: None,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(SimError::InvalidOption(format!(
                "tolerance must be a small positive number, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(SimError::InvalidOption(
                "iteration cap must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Frequency grid of an AC analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcSweep {
    /// Explicit frequencies in Hz
    List(Vec<f64>),
    /// `points` equally spaced frequencies from `start` to `stop`
    Linear { points: usize, start: f64, stop: f64 },
    /// Logarithmic, `points` per decade
    Decade { points: usize, start: f64, stop: f64 },
    /// Logarithmic, `points` per octave
    Octave { points: usize, start: f64, stop: f64 },
}

impl AcSweep {
    /// Expand the sweep into the list of frequencies to solve.
    pub fn frequencies(&self) -> Result<Vec<f64>> {
        let freqs = match self {
            AcSweep::List(list) => {
                check_point_count(list.len() as f64)?;
                list.clone()
            }
            AcSweep::Linear { points, start, stop } => {
                check_range(*start, *stop, *points, false)?;
                check_point_count(*points as f64)?;
                if *points == 1 {
                    vec![*start]
                } else {
                    let step = (stop - start) / (*points - 1) as f64;
                    (0..*points).map(|i| start + i as f64 * step).collect()
                }
            }
            AcSweep::Decade { points, start, stop } => {
                check_range(*start, *stop, *points, true)?;
                log_sweep(*start, *stop, *points, 10.0)?
            }
            AcSweep::Octave { points, start, stop } => {
                check_range(*start, *stop, *points, true)?;
                log_sweep(*start, *stop, *points, 2.0)?
            }
        };

        if freqs.is_empty() {
            return Err(SimError::InvalidFrequency("no frequencies requested".to_string()));
        }
        if let Some(bad) = freqs.iter().find(|f| !f.is_finite() || **f < 0.0) {
            return Err(SimError::InvalidFrequency(format!(
                "frequency {} is not a finite non-negative value",
                bad
            )));
        }
        Ok(freqs)
    }
}

fn check_range(start: f64, stop: f64, points: usize, log: bool) -> Result<()> {
    if points == 0 {
        return Err(SimError::InvalidFrequency("point count must be positive".to_string()));
    }
    if !(start.is_finite() && stop.is_finite()) || stop < start {
        return Err(SimError::InvalidFrequency(format!(
            "range [{}, {}] is empty or not finite",
            start, stop
        )));
    }
    if log && start <= 0.0 {
        return Err(SimError::InvalidFrequency(
            "logarithmic sweeps need a positive start frequency".to_string(),
        ));
    }
    Ok(())
}

fn log_sweep(start: f64, stop: f64, points_per_interval: usize, base: f64) -> Result<Vec<f64>> {
    let intervals = (stop / start).log(base);
    let total = (intervals * points_per_interval as f64 + 1e-9).floor();
    check_point_count(total + 1.0)?;
    let ratio = base.powf(1.0 / points_per_interval as f64);
    Ok((0..=total as usize).map(|k| start * ratio.powf(k as f64)).collect())
}

fn check_point_count(points: f64) -> Result<()> {
    if points > MAX_FREQUENCY_POINTS as f64 {
        return Err(SimError::InvalidFrequency(format!(
            "{} frequency points exceed the limit of {}",
            points, MAX_FREQUENCY_POINTS
        )));
    }
    Ok(())
}

/// One analysis to run against the circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisRequest {
    OperatingPoint {
        outputs: Vec<String>,
    },
    DcSweep {
        source: String,
        start: f64,
        end: f64,
        increment: f64,
        outputs: Vec<String>,
    },
    Transient {
        time_step: f64,
        fin_time: f64,
        outputs: Vec<String>,
    },
    Ac {
        sweep: AcSweep,
        outputs: Vec<String>,
    },
}

impl AnalysisRequest {
    pub fn outputs(&self) -> &[String] {
        match self {
            AnalysisRequest::OperatingPoint { outputs }
            | AnalysisRequest::DcSweep { outputs, .. }
            | AnalysisRequest::Transient { outputs, .. }
            | AnalysisRequest::Ac { outputs, .. } => outputs,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisRequest::OperatingPoint { .. } => "op",
            AnalysisRequest::DcSweep { .. } => "dc",
            AnalysisRequest::Transient { .. } => "tran",
            AnalysisRequest::Ac { .. } => "ac",
        }
    }
}

/// Solver options plus every requested analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub options: SolverConfig,
    #[serde(default)]
    pub requests: Vec<AnalysisRequest>,
}
