pub mod analysis;
pub mod circuit;
pub mod cli;
pub mod config;
pub mod error;
pub mod mna;
pub mod output;
pub mod simulator;
pub mod solver;
pub mod waveform;

// Re-export commonly used types
pub use circuit::{Circuit, Element, ElementKind, NodeTable, GROUND};
pub use config::{AcSweep, AnalysisConfig, AnalysisRequest, IntegrationRule, SolverConfig};
pub use error::{ErrorKind, Result, SimError};
pub use mna::{MnaSystem, StampContext};
pub use output::{AcValue, AnalysisOutput, Record, Sample};
pub use simulator::{run_job, Job, Simulator};
pub use solver::{LinearSolver, Representation, Solution, SolverStats, Strategy, SystemMatrix};
pub use waveform::{AcPhasor, SourceSpec, Waveform};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
