//! Analysis results and their export.

use log::info;
use num_complex::Complex64;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::solver::{SolverStats, Strategy};

/// AC sample in polar form
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AcValue {
    pub magnitude: f64,
    /// Phase in degrees
    pub phase: f64,
}

impl AcValue {
    pub fn from_phasor(z: Complex64) -> Self {
        AcValue {
            magnitude: z.norm(),
            phase: z.arg().to_degrees(),
        }
    }

    /// Magnitude in decibels, `20·log10(|v|)`
    pub fn db(&self) -> f64 {
        20.0 * self.magnitude.log10()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Sample {
    Real(f64),
    Ac(AcValue),
}

impl Sample {
    pub fn real(&self) -> Option<f64> {
        match self {
            Sample::Real(v) => Some(*v),
            Sample::Ac(_) => None,
        }
    }

    pub fn ac(&self) -> Option<AcValue> {
        match self {
            Sample::Ac(v) => Some(*v),
            Sample::Real(_) => None,
        }
    }
}

/// One row: the independent variable and one sample per output node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub point: f64,
    pub values: Vec<Sample>,
}

impl Record {
    pub fn real(point: f64, values: Vec<f64>) -> Self {
        Record {
            point,
            values: values.into_iter().map(Sample::Real).collect(),
        }
    }

    pub fn ac(point: f64, values: Vec<AcValue>) -> Self {
        Record {
            point,
            values: values.into_iter().map(Sample::Ac).collect(),
        }
    }
}

/// Solver activity accumulated over one analysis
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub strategy: Strategy,
    pub factorizations: usize,
    pub solves: usize,
    pub iterations: usize,
    /// Worst relative residual over all solves
    pub max_residual: f64,
    /// Summed solve time in seconds
    pub solve_time: f64,
}

impl RunStats {
    pub fn new(strategy: Strategy) -> Self {
        RunStats {
            strategy,
            factorizations: 0,
            solves: 0,
            iterations: 0,
            max_residual: 0.0,
            solve_time: 0.0,
        }
    }

    pub fn record(&mut self, stats: &SolverStats) {
        self.solves += 1;
        self.iterations += stats.iterations;
        self.max_residual = self.max_residual.max(stats.residual);
        self.solve_time += stats.solve_time;
    }
}

/// Result of one analysis request
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutput {
    /// `op`, `dc`, `tran` or `ac`
    pub analysis: String,
    /// Name of the independent variable column
    pub variable: String,
    pub nodes: Vec<String>,
    pub records: Vec<Record>,
    pub stats: RunStats,
}

impl AnalysisOutput {
    pub fn new(analysis: &str, variable: &str, nodes: Vec<String>, strategy: Strategy) -> Self {
        AnalysisOutput {
            analysis: analysis.to_string(),
            variable: variable.to_string(),
            nodes,
            records: Vec::new(),
            stats: RunStats::new(strategy),
        }
    }

    pub fn points(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.point).collect()
    }

    fn node_position(&self, node: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == node)
    }

    /// Real trace of `node`; `None` for unknown nodes or AC output.
    pub fn trace(&self, node: &str) -> Option<Vec<f64>> {
        let col = self.node_position(node)?;
        self.records.iter().map(|r| r.values[col].real()).collect()
    }

    /// AC trace of `node`
    pub fn ac_trace(&self, node: &str) -> Option<Vec<AcValue>> {
        let col = self.node_position(node)?;
        self.records.iter().map(|r| r.values[col].ac()).collect()
    }

    fn header(&self) -> Vec<String> {
        let mut header = vec![self.variable.clone()];
        for node in &self.nodes {
            if self.analysis == "ac" {
                header.push(format!("mag(V({}))", node));
                header.push(format!("phase(V({}))", node));
            } else {
                header.push(format!("V({})", node));
            }
        }
        header
    }

    /// Write the records as CSV, one row per point.
    pub fn write_csv<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(self.header())?;

        for record in &self.records {
            let mut row = vec![record.point.to_string()];
            for sample in &record.values {
                match sample {
                    Sample::Real(v) => row.push(v.to_string()),
                    Sample::Ac(v) => {
                        row.push(v.magnitude.to_string());
                        row.push(v.phase.to_string());
                    }
                }
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn export_csv(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)?;
        self.write_csv(file)?;
        info!("Results exported to CSV: {}", path.display());
        Ok(())
    }

    /// Print a short human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== {} analysis ===", self.analysis);
        println!("Points: {}", self.records.len());
        println!(
            "Solver: {} ({} factorisations, {} solves, {} iterations, max residual {:.2e})",
            self.stats.strategy,
            self.stats.factorizations,
            self.stats.solves,
            self.stats.iterations,
            self.stats.max_residual
        );

        if let Some(last) = self.records.last() {
            println!("\nFinal values ({} = {:.6e}):", self.variable, last.point);
            for (node, sample) in self.nodes.iter().zip(&last.values) {
                match sample {
                    Sample::Real(v) => println!("  V({}): {:.6}", node, v),
                    Sample::Ac(v) => println!(
                        "  V({}): {:.6} ({:.2} dB) @ {:.2} deg",
                        node,
                        v.magnitude,
                        v.db(),
                        v.phase
                    ),
                }
            }
        }
    }
}

/// Export every output of a job as pretty-printed JSON.
pub fn export_json(outputs: &[AnalysisOutput], path: &Path) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, outputs)?;
    info!("Results exported to JSON: {}", path.display());
    Ok(())
}

/// Export every output of a job as CSV.
///
/// A single output goes to `path`; several outputs get an index suffix
/// (`out.csv` -> `out_0.csv`, `out_1.csv`, ...).
pub fn export_csv(outputs: &[AnalysisOutput], path: &Path) -> anyhow::Result<()> {
    if outputs.len() == 1 {
        return outputs[0].export_csv(path);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "csv".to_string());

    for (i, output) in outputs.iter().enumerate() {
        let file = path.with_file_name(format!("{}_{}.{}", stem, i, extension));
        output.export_csv(&file)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_output() -> AnalysisOutput {
        let mut output = AnalysisOutput::new("dc", "V1", vec!["1".into(), "2".into()], Strategy::DenseLu);
        output.records.push(Record::real(0.0, vec![0.0, 0.0]));
        output.records.push(Record::real(1.0, vec![1.0, 0.5]));
        output
    }

    #[test]
    fn test_ac_value_from_phasor() {
        let v = AcValue::from_phasor(Complex64::new(0.5, -0.5));
        assert_relative_eq!(v.magnitude, 0.5f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(v.phase, -45.0, epsilon = 1e-12);
        assert_relative_eq!(v.db(), -3.0103, epsilon = 1e-4);
    }

    #[test]
    fn test_traces() {
        let output = sample_output();
        assert_eq!(output.trace("2"), Some(vec![0.0, 0.5]));
        assert_eq!(output.trace("missing"), None);
        assert_eq!(output.ac_trace("1"), None);
        assert_eq!(output.points(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_csv_layout() {
        let mut buffer = Vec::new();
        sample_output().write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "V1,V(1),V(2)");
        assert_eq!(lines[2], "1,1,0.5");
    }

    #[test]
    fn test_ac_csv_has_two_columns_per_node() {
        let mut output = AnalysisOutput::new("ac", "frequency", vec!["out".into()], Strategy::SparseLu);
        output.records.push(Record::ac(10.0, vec![AcValue { magnitude: 1.0, phase: -90.0 }]));
        let mut buffer = Vec::new();
        output.write_csv(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("frequency,mag(V(out)),phase(V(out))"));
        assert!(text.contains("10,1,-90"));
    }

    #[test]
    fn test_json_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        export_json(&[sample_output()], &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["records"][1]["values"][1], 0.5);
        assert_eq!(value[0]["stats"]["strategy"], "DenseLu");
    }

    #[test]
    fn test_csv_export_suffixes_multiple_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        export_csv(&[sample_output(), sample_output()], &path).unwrap();
        assert!(dir.path().join("run_0.csv").exists());
        assert!(dir.path().join("run_1.csv").exists());
    }
}
