use log::{info, warn};
use num_complex::Complex64;
use rayon::prelude::*;
use std::f64::consts::PI;
use std::time::Instant;

use super::OutputSelection;
use crate::circuit::Circuit;
use crate::config::AcSweep;
use crate::error::Result;
use crate::mna::MnaSystem;
use crate::output::{AcValue, AnalysisOutput, Record};
use crate::solver::{LinearSolver, Representation, Solution, SolverStats};

/// Solver used for complex systems.
///
/// Reactive stamps make the admittance matrix complex-symmetric rather than
/// Hermitian, so the SPD hint is dropped.
fn complex_solver(solver: &LinearSolver) -> LinearSolver {
    let mut config = solver.config().clone();
    if config.assume_spd {
        warn!("Ignoring assume_spd for the complex AC system");
        config.assume_spd = false;
    }
    LinearSolver::new(config)
}

/// Assemble and solve the small-signal system at `frequency` Hz.
pub fn solve_frequency(
    circuit: &Circuit,
    solver: &LinearSolver,
    frequency: f64,
) -> Result<(MnaSystem<Complex64>, Solution<Complex64>)> {
    let representation = Representation::from_flag(solver.config().sparse);
    let system = MnaSystem::assemble_ac(circuit, representation, 2.0 * PI * frequency)?;
    let solution = solver.solve(&system.matrix, &system.rhs)?;
    Ok((system, solution))
}

/// AC sweep. Frequency points are independent and solved in parallel; the
/// records come back in sweep order.
pub fn ac_analysis(
    circuit: &Circuit,
    solver: &LinearSolver,
    sweep: &AcSweep,
    outputs: &[String],
) -> Result<AnalysisOutput> {
    let frequencies = sweep.frequencies()?;
    let selection = OutputSelection::resolve(circuit, outputs)?;
    let solver = complex_solver(solver);
    info!(
        "Starting AC analysis: {} frequencies from {} Hz to {} Hz",
        frequencies.len(),
        frequencies[0],
        frequencies[frequencies.len() - 1]
    );
    let timer = Instant::now();

    let points: Vec<(Vec<AcValue>, SolverStats)> = frequencies
        .par_iter()
        .map(|&f| {
            let (system, solution) = solve_frequency(circuit, &solver, f)?;
            let values = selection
                .sample(&system, &solution.x)
                .into_iter()
                .map(AcValue::from_phasor)
                .collect();
            Ok((values, solution.stats))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut output = AnalysisOutput::new("ac", "frequency", selection.names.clone(), solver.strategy());
    for (&f, (values, stats)) in frequencies.iter().zip(points) {
        output.stats.factorizations += 1;
        output.stats.record(&stats);
        output.records.push(Record::ac(f, values));
    }

    info!(
        "AC analysis completed with {} points in {:.3} ms",
        output.records.len(),
        timer.elapsed().as_secs_f64() * 1e3
    );
    Ok(output)
}
