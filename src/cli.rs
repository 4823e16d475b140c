use anyhow::{anyhow, Result};
use clap::ArgMatches;
use std::path::PathBuf;

use crate::config::{IntegrationRule, SolverConfig};

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub input_file: PathBuf,
    pub output_file: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub overrides: SolverOverrides,
    pub verbose_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
}

/// Solver options given on the command line; they win over the job file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolverOverrides {
    pub sparse: bool,
    pub iterative: bool,
    pub assume_spd: bool,
    pub integration: Option<IntegrationRule>,
    pub tolerance: Option<f64>,
    pub max_iterations: Option<usize>,
}

impl SolverOverrides {
    pub fn apply(&self, config: &mut SolverConfig) {
        config.sparse |= self.sparse;
        config.iterative |= self.iterative;
        config.assume_spd |= self.assume_spd;
        if let Some(rule) = self.integration {
            config.integration = rule;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(cap) = self.max_iterations {
            config.max_iterations = Some(cap);
        }
    }
}

impl CliArgs {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let input_file = matches
            .get_one::<String>("input")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("Input file is required"))?;

        let output_file = matches.get_one::<String>("output").map(PathBuf::from);

        let verbose_level = matches.get_count("verbose");

        let output_format = match matches.get_one::<String>("format").map(String::as_str) {
            Some("csv") | None => OutputFormat::Csv,
            Some("json") => OutputFormat::Json,
            Some(other) => return Err(anyhow!("Invalid output format '{}'", other)),
        };

        let integration = match matches.get_one::<String>("method").map(String::as_str) {
            None => None,
            Some(m) if m.eq_ignore_ascii_case("tr") => Some(IntegrationRule::Trapezoidal),
            Some(m) if m.eq_ignore_ascii_case("be") => Some(IntegrationRule::BackwardEuler),
            Some(other) => return Err(anyhow!("Unknown integration method '{}' (use be or tr)", other)),
        };

        let tolerance = match matches.get_one::<String>("itol") {
            Some(value) => {
                let tol = parse_value(value)?;
                if !(tol > 0.0 && tol.is_finite()) {
                    return Err(anyhow!("Iterative tolerance must be positive, got {}", value));
                }
                Some(tol)
            }
            None => None,
        };

        let max_iterations = match matches.get_one::<String>("max-iter") {
            Some(value) => Some(value.parse::<usize>()?),
            None => None,
        };

        Ok(CliArgs {
            input_file,
            output_file,
            output_format,
            overrides: SolverOverrides {
                sparse: matches.get_flag("sparse"),
                iterative: matches.get_flag("iter"),
                assume_spd: matches.get_flag("spd"),
                integration,
                tolerance,
                max_iterations,
            },
            verbose_level,
        })
    }

    /// Default log filter for the `-v` count; `RUST_LOG` still overrides it.
    pub fn log_level(&self) -> &'static str {
        match self.verbose_level {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Parse a number with an optional SI suffix (e.g. "1e-6", "1u", "10m")
pub fn parse_value(value: &str) -> Result<f64> {
    let value = value.trim().to_lowercase();

    let (number, scale) = if let Some(n) = value.strip_suffix("meg") {
        (n, 1e6)
    } else if let Some(n) = value.strip_suffix('f') {
        (n, 1e-15)
    } else if let Some(n) = value.strip_suffix('p') {
        (n, 1e-12)
    } else if let Some(n) = value.strip_suffix('n') {
        (n, 1e-9)
    } else if let Some(n) = value.strip_suffix('u') {
        (n, 1e-6)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 1e-3)
    } else if let Some(n) = value.strip_suffix('k') {
        (n, 1e3)
    } else if let Some(n) = value.strip_suffix('g') {
        (n, 1e9)
    } else {
        (value.as_str(), 1.0)
    };

    Ok(number.parse::<f64>()? * scale)
}
