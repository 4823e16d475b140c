use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::analysis;
use crate::circuit::Circuit;
use crate::config::{AnalysisConfig, AnalysisRequest, SolverConfig};
use crate::error::Result;
use crate::output::AnalysisOutput;
use crate::solver::LinearSolver;

/// A complete job: the circuit and what to run on it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    pub circuit: Circuit,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Main simulator engine
#[derive(Debug, Clone)]
pub struct Simulator {
    circuit: Circuit,
    solver: LinearSolver,
}

impl Simulator {
    /// Validate `circuit` and `options` and build a simulator around them.
    pub fn new(circuit: Circuit, options: SolverConfig) -> Result<Self> {
        circuit.validate()?;
        options.validate()?;
        info!(
            "Loaded circuit '{}': {} nodes, {} elements, {} unknowns",
            circuit.title,
            circuit.node_count(),
            circuit.elements.len(),
            circuit.system_size()
        );
        Ok(Simulator {
            circuit,
            solver: LinearSolver::new(options),
        })
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn solver(&self) -> &LinearSolver {
        &self.solver
    }

    /// Run one analysis request.
    pub fn run(&self, request: &AnalysisRequest) -> Result<AnalysisOutput> {
        let circuit = &self.circuit;
        let solver = &self.solver;
        match request {
            AnalysisRequest::OperatingPoint { outputs } => {
                analysis::run_operating_point(circuit, solver, outputs)
            }
            AnalysisRequest::DcSweep {
                source,
                start,
                end,
                increment,
                outputs,
            } => analysis::dc_sweep(circuit, solver, source, *start, *end, *increment, outputs),
            AnalysisRequest::Transient {
                time_step,
                fin_time,
                outputs,
            } => analysis::transient(circuit, solver, *time_step, *fin_time, outputs),
            AnalysisRequest::Ac { sweep, outputs } => {
                analysis::ac_analysis(circuit, solver, sweep, outputs)
            }
        }
    }

    /// Run every request in order. A failing request does not stop the
    /// others; each gets its own result.
    pub fn run_all(&self, requests: &[AnalysisRequest]) -> Vec<Result<AnalysisOutput>> {
        let start = Instant::now();
        let results: Vec<_> = requests
            .iter()
            .enumerate()
            .map(|(i, request)| {
                let result = self.run(request);
                if let Err(e) = &result {
                    warn!("Request {} ({}) failed: {}", i, request.label(), e);
                }
                result
            })
            .collect();

        info!(
            "Ran {} analyses ({} failed) in {:.3} ms",
            results.len(),
            results.iter().filter(|r| r.is_err()).count(),
            start.elapsed().as_secs_f64() * 1e3
        );
        results
    }
}

/// Validate and run a whole job.
pub fn run_job(job: Job) -> Result<Vec<Result<AnalysisOutput>>> {
    let Job { circuit, analysis } = job;
    let simulator = Simulator::new(circuit, analysis.options)?;
    Ok(simulator.run_all(&analysis.requests))
}
