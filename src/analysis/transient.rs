use log::{debug, info};
use nalgebra::DVector;
use std::time::Instant;

use super::OutputSelection;
use crate::circuit::{Circuit, Element, ElementKind};
use crate::config::IntegrationRule;
use crate::error::{Result, SimError};
use crate::mna::{Companion, MnaSystem, StampContext};
use crate::output::{AnalysisOutput, Record};
use crate::solver::{LinearSolver, Representation};

/// Upper bound on the number of time steps in one run
const MAX_STEPS: usize = 50_000_000;

/// Branch history of one dynamic element.
#[derive(Debug, Clone, Copy, PartialEq)]
enum History {
    Capacitor { voltage: f64, current: f64 },
    Inductor { current: f64, voltage: f64 },
}

impl History {
    /// Initial state from the operating point: capacitor current and inductor
    /// voltage start at zero.
    fn from_operating_point(
        system: &MnaSystem<f64>,
        x: &DVector<f64>,
        index: usize,
        element: &Element,
    ) -> Option<Self> {
        match element.kind {
            ElementKind::Capacitor => Some(History::Capacitor {
                voltage: system.voltage_across(x, element),
                current: 0.0,
            }),
            ElementKind::Inductor => Some(History::Inductor {
                current: system.branch_row(index).map(|r| x[r]).unwrap_or(0.0),
                voltage: 0.0,
            }),
            _ => None,
        }
    }

    fn companion(&self, element: &Element, rule: IntegrationRule, h: f64) -> Companion {
        match (*self, rule) {
            (History::Capacitor { voltage, .. }, IntegrationRule::BackwardEuler) => {
                let g = element.value / h;
                Companion {
                    coefficient: g,
                    source: g * voltage,
                }
            }
            (History::Capacitor { voltage, current }, IntegrationRule::Trapezoidal) => {
                let g = 2.0 * element.value / h;
                Companion {
                    coefficient: g,
                    source: g * voltage + current,
                }
            }
            (History::Inductor { current, .. }, IntegrationRule::BackwardEuler) => {
                let r = element.value / h;
                Companion {
                    coefficient: r,
                    source: r * current,
                }
            }
            (History::Inductor { current, voltage }, IntegrationRule::Trapezoidal) => {
                let r = 2.0 * element.value / h;
                Companion {
                    coefficient: r,
                    source: r * current + voltage,
                }
            }
        }
    }

    /// State after a step solved with `companion`.
    fn advance(
        &self,
        system: &MnaSystem<f64>,
        x: &DVector<f64>,
        index: usize,
        element: &Element,
        companion: Companion,
    ) -> Self {
        let voltage = system.voltage_across(x, element);
        match self {
            History::Capacitor { .. } => History::Capacitor {
                voltage,
                current: companion.coefficient * voltage - companion.source,
            },
            History::Inductor { current, .. } => History::Inductor {
                current: system.branch_row(index).map(|r| x[r]).unwrap_or(*current),
                voltage,
            },
        }
    }
}

/// Time grid `k·h` for `k = 0..=K`, the last sample being the last full step
/// not past `fin_time`.
pub fn time_points(time_step: f64, fin_time: f64) -> Result<Vec<f64>> {
    if !(time_step.is_finite() && time_step > 0.0) {
        return Err(SimError::InvalidTransient(format!(
            "time step must be positive and finite, got {}",
            time_step
        )));
    }
    if !(fin_time.is_finite() && fin_time > 0.0) {
        return Err(SimError::InvalidTransient(format!(
            "final time must be positive and finite, got {}",
            fin_time
        )));
    }
    let steps = (fin_time / time_step + 1e-9).floor();
    if steps >= MAX_STEPS as f64 {
        return Err(SimError::InvalidTransient(format!(
            "{} steps exceed the limit of {}",
            steps, MAX_STEPS
        )));
    }
    Ok((0..=steps as usize).map(|k| k as f64 * time_step).collect())
}

/// Fixed-step transient analysis.
///
/// The first step always uses the backward-Euler companion, since the
/// operating point carries no capacitor-current or inductor-voltage history;
/// a trapezoidal run switches over from the second step on.
pub fn transient(
    circuit: &Circuit,
    solver: &LinearSolver,
    time_step: f64,
    fin_time: f64,
    outputs: &[String],
) -> Result<AnalysisOutput> {
    let rule = solver.config().integration;
    info!(
        "Starting transient analysis: h = {}, fin_time = {}, rule = {}",
        time_step, fin_time, rule
    );
    let timer = Instant::now();

    let times = time_points(time_step, fin_time)?;
    let selection = OutputSelection::resolve(circuit, outputs)?;
    let representation = Representation::from_flag(solver.config().sparse);

    // t = 0: operating point with sources at their t = 0 value
    let mut system = MnaSystem::assemble(circuit, representation, &StampContext::at_time(0.0))?;
    let mut prepared = solver.prepare(&system.matrix)?;
    let warm_start = prepared.strategy().is_iterative();
    let op = prepared.solve(&system.rhs, None)?;

    let mut output = AnalysisOutput::new("tran", "time", selection.names.clone(), prepared.strategy());
    output.stats.factorizations = 1;
    output.stats.record(&op.stats);
    output.records.push(Record::real(0.0, selection.sample(&system, &op.x)));

    let mut history: Vec<Option<History>> = circuit
        .elements
        .iter()
        .enumerate()
        .map(|(i, e)| History::from_operating_point(&system, &op.x, i, e))
        .collect();
    let mut x = op.x;
    let mut factored: Option<Vec<f64>> = None;

    for (k, &t) in times.iter().enumerate().skip(1) {
        let step_rule = if k == 1 {
            IntegrationRule::BackwardEuler
        } else {
            rule
        };

        let companions: Vec<Option<Companion>> = circuit
            .elements
            .iter()
            .zip(&history)
            .map(|(e, h)| h.map(|h| h.companion(e, step_rule, time_step)))
            .collect();
        let coefficients: Vec<f64> = companions.iter().flatten().map(|c| c.coefficient).collect();
        let ctx = StampContext::transient(t, &companions);

        if factored.as_ref() != Some(&coefficients) {
            debug!("Step {}: companion coefficients changed, refactorising", k);
            system = MnaSystem::assemble(circuit, representation, &ctx)?;
            prepared = solver.prepare(&system.matrix)?;
            output.stats.factorizations += 1;
            factored = Some(coefficients);
        } else {
            system.restamp_rhs(circuit, &ctx)?;
        }

        let guess = if warm_start { Some(&x) } else { None };
        let solution = prepared.solve(&system.rhs, guess)?;
        debug!(
            "Step {}: t = {:.6e} ({} iterations, residual {:.2e})",
            k, t, solution.stats.iterations, solution.stats.residual
        );

        for (i, element) in circuit.elements.iter().enumerate() {
            if let (Some(state), Some(companion)) = (history[i], companions[i]) {
                history[i] = Some(state.advance(&system, &solution.x, i, element, companion));
            }
        }

        output.stats.record(&solution.stats);
        output
            .records
            .push(Record::real(t, selection.sample(&system, &solution.x)));
        x = solution.x;
    }

    info!(
        "Transient analysis completed with {} time points in {:.3} ms",
        times.len(),
        timer.elapsed().as_secs_f64() * 1e3
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::GROUND;
    use crate::config::SolverConfig;
    use approx::assert_relative_eq;

    #[test]
    fn test_time_points_boundary() {
        let times = time_points(0.1, 1.0).unwrap();
        assert_eq!(times.len(), 11);
        assert_relative_eq!(times[10], 1.0, epsilon = 1e-12);

        // Last sample is the last full step not past fin_time
        let times = time_points(0.3, 1.0).unwrap();
        assert_eq!(times.len(), 4);
        assert_relative_eq!(times[3], 0.9, epsilon = 1e-12);

        assert_eq!(time_points(2.0, 1.0).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_invalid_transient_parameters() {
        assert!(matches!(time_points(0.0, 1.0), Err(SimError::InvalidTransient(_))));
        assert!(matches!(time_points(1e-3, -1.0), Err(SimError::InvalidTransient(_))));
        assert!(matches!(time_points(f64::NAN, 1.0), Err(SimError::InvalidTransient(_))));
    }

    #[test]
    fn test_companion_formulas() {
        let cap = Element::capacitor("C1", 1, GROUND, 1e-6);
        let state = History::Capacitor {
            voltage: 2.0,
            current: 0.5,
        };
        let be = state.companion(&cap, IntegrationRule::BackwardEuler, 1e-3);
        assert_relative_eq!(be.coefficient, 1e-3, max_relative = 1e-12);
        assert_relative_eq!(be.source, 2e-3, max_relative = 1e-12);
        let tr = state.companion(&cap, IntegrationRule::Trapezoidal, 1e-3);
        assert_relative_eq!(tr.coefficient, 2e-3, max_relative = 1e-12);
        assert_relative_eq!(tr.source, 4e-3 + 0.5, max_relative = 1e-12);

        let ind = Element::inductor("L1", 1, GROUND, 1e-3);
        let state = History::Inductor {
            current: 0.1,
            voltage: 3.0,
        };
        let tr = state.companion(&ind, IntegrationRule::Trapezoidal, 1e-4);
        assert_relative_eq!(tr.coefficient, 20.0, max_relative = 1e-12);
        assert_relative_eq!(tr.source, 2.0 + 3.0, max_relative = 1e-12);
    }

    #[test]
    fn test_constant_source_rc_stays_at_operating_point() {
        let mut circuit = Circuit::new("rc-dc");
        let a = circuit.node("in");
        let b = circuit.node("out");
        circuit.add_element(Element::voltage_source("V1", a, GROUND, 2.0)).unwrap();
        circuit.add_element(Element::resistor("R1", a, b, 1e3)).unwrap();
        circuit.add_element(Element::capacitor("C1", b, GROUND, 1e-6)).unwrap();

        let solver = LinearSolver::new(SolverConfig::default());
        let output = transient(&circuit, &solver, 1e-4, 1e-3, &["out".to_string()]).unwrap();
        for v in output.trace("out").unwrap() {
            assert_relative_eq!(v, 2.0, epsilon = 1e-9);
        }
        // Operating point, BE start-up step, trapezoidal steps
        assert_eq!(output.stats.factorizations, 3);
        assert_eq!(output.records.len(), 11);
    }

    #[test]
    fn test_lc_tank_conserves_energy_with_trapezoidal() {
        // Inductor current initialised by a current source through the op point;
        // the source is switched off at t = 0+ by a PWL waveform.
        use crate::waveform::{SourceSpec, Waveform};

        let mut circuit = Circuit::new("lc");
        let a = circuit.node("a");
        let spec = SourceSpec::default().with_waveform(Waveform::Pwl(vec![(0.0, 1e-3), (1e-12, 0.0)]));
        circuit
            .add_element(Element::current_source("I1", GROUND, a, 1e-3).with_spec(spec))
            .unwrap();
        circuit.add_element(Element::inductor("L1", a, GROUND, 1e-3)).unwrap();
        circuit.add_element(Element::capacitor("C1", a, GROUND, 1e-6)).unwrap();

        let solver = LinearSolver::default();
        let output = transient(&circuit, &solver, 1e-6, 2e-4, &["a".to_string()]).unwrap();
        let v = output.trace("a").unwrap();

        // Peak voltage stays close to I0·sqrt(L/C) = 31.6 mV
        let peak = v.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        assert_relative_eq!(peak, 1e-3 * (1e-3f64 / 1e-6).sqrt(), max_relative = 0.02);
    }
}
