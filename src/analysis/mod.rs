//! Analysis drivers: DC operating point and sweep, transient, AC.
//!
//! Each driver owns its assembled system and solver state for the duration
//! of one request and returns a complete [`AnalysisOutput`] or an error; no
//! partial results escape a failed run.

pub mod ac;
pub mod dc;
pub mod transient;

use nalgebra::DVector;

use crate::circuit::Circuit;
use crate::error::{Result, SimError};
use crate::mna::MnaSystem;
use crate::solver::MnaScalar;

pub use ac::{ac_analysis, solve_frequency};
pub use dc::{dc_sweep, operating_point, run_operating_point, sweep_points, OperatingPoint};
pub use transient::{time_points, transient};

/// Requested output nodes, resolved to indices before any solve.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSelection {
    pub names: Vec<String>,
    pub nodes: Vec<usize>,
}

impl OutputSelection {
    /// Resolve `requested` against the circuit's node table. An empty list
    /// selects every non-ground node in index order.
    pub fn resolve(circuit: &Circuit, requested: &[String]) -> Result<Self> {
        if requested.is_empty() {
            let nodes: Vec<usize> = (1..=circuit.node_count()).collect();
            let names = nodes
                .iter()
                .map(|&i| circuit.nodes.name_of(i).unwrap_or_default().to_string())
                .collect();
            return Ok(OutputSelection { names, nodes });
        }

        let nodes = requested
            .iter()
            .map(|name| {
                circuit
                    .node_index(name)
                    .ok_or_else(|| SimError::UnknownNode(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(OutputSelection {
            names: requested.to_vec(),
            nodes,
        })
    }

    /// Selected node voltages from solution `x`.
    pub fn sample<T: MnaScalar>(&self, system: &MnaSystem<T>, x: &DVector<T>) -> Vec<T> {
        self.nodes.iter().map(|&n| system.node_voltage(x, n)).collect()
    }
}
