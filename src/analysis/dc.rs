use log::{debug, info};
use nalgebra::DVector;
use std::time::Instant;

use super::OutputSelection;
use crate::circuit::Circuit;
use crate::error::{Result, SimError};
use crate::mna::{MnaSystem, StampContext};
use crate::output::{AnalysisOutput, Record};
use crate::solver::{LinearSolver, Representation, SolverStats};

/// Upper bound on generated sweep points
const MAX_SWEEP_POINTS: usize = 10_000_000;

/// Solved DC operating point, with the full unknown vector.
#[derive(Debug, Clone)]
pub struct OperatingPoint {
    pub system: MnaSystem<f64>,
    /// Node voltages followed by branch currents
    pub solution: DVector<f64>,
    pub stats: SolverStats,
}

impl OperatingPoint {
    pub fn node_voltage(&self, node: usize) -> f64 {
        self.system.node_voltage(&self.solution, node)
    }

    /// Branch current of a voltage source or inductor, by element index.
    pub fn branch_current(&self, element: usize) -> Option<f64> {
        self.system.branch_row(element).map(|row| self.solution[row])
    }
}

/// Operating point: capacitors open, inductors short, DC source values.
pub fn operating_point(circuit: &Circuit, solver: &LinearSolver) -> Result<OperatingPoint> {
    let representation = Representation::from_flag(solver.config().sparse);
    let system = MnaSystem::assemble(circuit, representation, &StampContext::dc())?;
    let solution = solver.solve(&system.matrix, &system.rhs)?;
    Ok(OperatingPoint {
        system,
        solution: solution.x,
        stats: solution.stats,
    })
}

/// Operating point reported as a single record at point 0.
pub fn run_operating_point(
    circuit: &Circuit,
    solver: &LinearSolver,
    outputs: &[String],
) -> Result<AnalysisOutput> {
    info!("Starting operating point analysis");
    let selection = OutputSelection::resolve(circuit, outputs)?;

    let op = operating_point(circuit, solver)?;
    let mut output = AnalysisOutput::new("op", "point", selection.names.clone(), solver.strategy());
    output.stats.factorizations = 1;
    output.stats.record(&op.stats);
    output
        .records
        .push(Record::real(0.0, selection.sample(&op.system, &op.solution)));

    info!("Operating point solved with {}", op.stats.strategy);
    Ok(output)
}

/// Sweep values `start + k·increment`, `k = 0..=K`, including `end` when it
/// lies on the grid within round-off.
pub fn sweep_points(start: f64, end: f64, increment: f64) -> Result<Vec<f64>> {
    if !start.is_finite() || !end.is_finite() {
        return Err(SimError::InvalidSweep(format!(
            "bounds must be finite, got [{}, {}]",
            start, end
        )));
    }
    if start == end {
        return Ok(vec![start]);
    }
    if !increment.is_finite() || increment == 0.0 {
        return Err(SimError::InvalidSweep(format!(
            "increment {} cannot step from {} to {}",
            increment, start, end
        )));
    }
    if (end - start).signum() != increment.signum() {
        return Err(SimError::InvalidSweep(format!(
            "increment {} points away from the end value {}",
            increment, end
        )));
    }

    let steps = ((end - start) / increment + 1e-9).floor();
    if steps >= MAX_SWEEP_POINTS as f64 {
        return Err(SimError::InvalidSweep(format!(
            "{} points exceed the limit of {}",
            steps, MAX_SWEEP_POINTS
        )));
    }
    let steps = steps as usize;
    Ok((0..=steps).map(|k| start + k as f64 * increment).collect())
}

/// DC sweep of an independent voltage or current source.
///
/// The matrix is factorised once; every point only restamps the RHS.
pub fn dc_sweep(
    circuit: &Circuit,
    solver: &LinearSolver,
    source: &str,
    start: f64,
    end: f64,
    increment: f64,
    outputs: &[String],
) -> Result<AnalysisOutput> {
    info!(
        "Starting DC sweep: {} from {} to {} step {}",
        source, start, end, increment
    );
    let timer = Instant::now();

    let points = sweep_points(start, end, increment)?;
    let index = circuit
        .find_element(source)
        .filter(|&i| circuit.elements[i].kind.is_source())
        .ok_or_else(|| SimError::UnknownSource(source.to_string()))?;
    let selection = OutputSelection::resolve(circuit, outputs)?;

    let representation = Representation::from_flag(solver.config().sparse);
    let mut system = MnaSystem::assemble(
        circuit,
        representation,
        &StampContext::with_sweep(index, points[0]),
    )?;
    let prepared = solver.prepare(&system.matrix)?;
    let warm_start = prepared.strategy().is_iterative();

    let mut output = AnalysisOutput::new(
        "dc",
        &circuit.elements[index].name,
        selection.names.clone(),
        prepared.strategy(),
    );
    output.stats.factorizations = 1;

    let mut previous: Option<DVector<f64>> = None;
    for (k, &value) in points.iter().enumerate() {
        if k > 0 {
            system.restamp_rhs(circuit, &StampContext::with_sweep(index, value))?;
        }
        let guess = if warm_start { previous.as_ref() } else { None };
        let solution = prepared.solve(&system.rhs, guess)?;
        debug!(
            "DC point {}: {} = {} ({} iterations)",
            k, source, value, solution.stats.iterations
        );

        output.stats.record(&solution.stats);
        output
            .records
            .push(Record::real(value, selection.sample(&system, &solution.x)));
        previous = Some(solution.x);
    }

    info!(
        "DC sweep completed with {} points in {:.3} ms",
        points.len(),
        timer.elapsed().as_secs_f64() * 1e3
    );
    Ok(output)
}
