use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use colored::*;
use log::{error, info, warn};
use std::fs;

use mnasim::cli::{CliArgs, OutputFormat};
use mnasim::config::AnalysisRequest;
use mnasim::output::{export_csv, export_json};
use mnasim::{run_job, Job};

fn main() {
    let matches = create_cli().get_matches();

    // The logger is not up yet, so argument errors go straight to stderr
    let args = match CliArgs::from_matches(&matches) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", format!("Error: {:#}", e).red());
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level())).init();

    if let Err(e) = run_application(&args) {
        error!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn create_cli() -> Command {
    Command::new("mnasim")
        .version(mnasim::VERSION)
        .about("Linear circuit simulator: DC, transient and AC analysis on an MNA system")
        .arg(
            Arg::new("input")
                .help("Job file (JSON) holding the circuit and analysis requests")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Output file for simulation results"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .default_value("csv")
                .value_parser(["csv", "json"])
                .help("Output format"),
        )
        .arg(
            Arg::new("sparse")
                .long("sparse")
                .action(ArgAction::SetTrue)
                .help("Use the sparse matrix representation"),
        )
        .arg(
            Arg::new("iter")
                .long("iter")
                .action(ArgAction::SetTrue)
                .help("Use an iterative solver (CG or Bi-CG)"),
        )
        .arg(
            Arg::new("spd")
                .long("spd")
                .action(ArgAction::SetTrue)
                .help("Treat the real system as symmetric positive definite"),
        )
        .arg(
            Arg::new("method")
                .long("method")
                .value_name("RULE")
                .help("Transient integration rule: be or tr"),
        )
        .arg(
            Arg::new("itol")
                .long("itol")
                .value_name("TOL")
                .help("Relative residual tolerance for iterative solvers"),
        )
        .arg(
            Arg::new("max-iter")
                .long("max-iter")
                .value_name("N")
                .help("Iteration cap for iterative solvers"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase verbosity level"),
        )
}

fn run_application(args: &CliArgs) -> anyhow::Result<()> {
    info!("{}", format!("Starting mnasim {}", mnasim::VERSION).green().bold());
    info!("Input file: {}", args.input_file.display().to_string().bright_blue());

    let text = fs::read_to_string(&args.input_file)
        .with_context(|| format!("Cannot read job file '{}'", args.input_file.display()))?;
    let mut job: Job = serde_json::from_str(&text)
        .with_context(|| format!("Malformed job file '{}'", args.input_file.display()))?;

    args.overrides.apply(&mut job.analysis.options);
    if job.analysis.requests.is_empty() {
        warn!("Job has no analysis requests, running an operating point");
        job.analysis
            .requests
            .push(AnalysisRequest::OperatingPoint { outputs: Vec::new() });
    }
    let labels: Vec<&'static str> = job.analysis.requests.iter().map(|r| r.label()).collect();

    let results = run_job(job)?;
    let total = results.len();

    let mut outputs = Vec::with_capacity(total);
    for (label, result) in labels.iter().zip(results) {
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => eprintln!("{}", format!("{} failed ({:?}): {}", label, e.kind(), e).red()),
        }
    }

    if let Some(path) = &args.output_file {
        match args.output_format {
            OutputFormat::Csv => export_csv(&outputs, path)?,
            OutputFormat::Json => export_json(&outputs, path)?,
        }
        info!("Results exported to: {}", path.display().to_string().bright_green());
    } else {
        for output in &outputs {
            output.print_summary();
        }
    }

    let failed = total - outputs.len();
    if failed > 0 {
        return Err(anyhow::anyhow!("{} of {} analyses failed", failed, total));
    }

    info!("{}", "Simulation completed successfully!".green().bold());
    Ok(())
}
