use approx::assert_relative_eq;
use mnasim::analysis::{ac_analysis, dc_sweep, operating_point, run_operating_point, transient};
use mnasim::*;

fn divider(v: f64, r1: f64, r2: f64) -> Circuit {
    let mut circuit = Circuit::new("divider");
    let a = circuit.node("in");
    let b = circuit.node("out");
    circuit.add_element(Element::voltage_source("V1", a, GROUND, v)).unwrap();
    circuit.add_element(Element::resistor("R1", a, b, r1)).unwrap();
    circuit.add_element(Element::resistor("R2", b, GROUND, r2)).unwrap();
    circuit
}

/// RC low-pass driven by an ideal 0 -> 1 V step at t = 0+.
fn rc_step(r: f64, c: f64) -> Circuit {
    let mut circuit = Circuit::new("rc step");
    let a = circuit.node("in");
    let b = circuit.node("out");
    let step = SourceSpec::default()
        .with_ac(1.0, 0.0)
        .with_waveform(Waveform::Pwl(vec![(0.0, 0.0), (0.0, 1.0)]));
    circuit
        .add_element(Element::voltage_source("V1", a, GROUND, 0.0).with_spec(step))
        .unwrap();
    circuit.add_element(Element::resistor("R1", a, b, r)).unwrap();
    circuit.add_element(Element::capacitor("C1", b, GROUND, c)).unwrap();
    circuit
}

fn solver_with(rule: IntegrationRule) -> LinearSolver {
    LinearSolver::new(SolverConfig {
        integration: rule,
        ..SolverConfig::default()
    })
}

/// Largest deviation of the simulated capacitor voltage from `1 - exp(-t/τ)`
fn charging_error(rule: IntegrationRule, h: f64) -> f64 {
    let tau = 1e-3;
    let output = transient(&rc_step(1e3, 1e-6), &solver_with(rule), h, 5e-3, &["out".to_string()]).unwrap();
    output
        .points()
        .iter()
        .zip(output.trace("out").unwrap())
        .map(|(t, v)| (v - (1.0 - (-t / tau).exp())).abs())
        .fold(0.0, f64::max)
}

#[test]
fn test_voltage_divider_operating_point() {
    let circuit = divider(5.0, 2e3, 3e3);
    for sparse in [false, true] {
        let solver = LinearSolver::new(SolverConfig {
            sparse,
            ..SolverConfig::default()
        });
        let op = operating_point(&circuit, &solver).unwrap();
        assert_relative_eq!(op.node_voltage(2), 3.0, epsilon = 1e-12);
        assert_relative_eq!(op.node_voltage(1), 5.0, epsilon = 1e-12);
        // Source current flows from + to - through the source
        assert_relative_eq!(op.branch_current(0).unwrap(), -1e-3, epsilon = 1e-15);
        assert_eq!(op.branch_current(1), None);
    }
}

#[test]
fn test_operating_point_output_selection() {
    let circuit = divider(5.0, 2e3, 3e3);
    let output = run_operating_point(&circuit, &LinearSolver::default(), &[]).unwrap();
    assert_eq!(output.nodes, vec!["in", "out"]);
    assert_eq!(output.records.len(), 1);

    let err = run_operating_point(&circuit, &LinearSolver::default(), &["nowhere".to_string()]).unwrap_err();
    assert_eq!(err, SimError::UnknownNode("nowhere".to_string()));
}

#[test]
fn test_dc_sweep_is_affine_in_the_source() {
    let circuit = divider(0.0, 1e3, 1e3);
    let output = dc_sweep(
        &circuit,
        &LinearSolver::default(),
        "v1",
        -2.0,
        2.0,
        0.5,
        &["out".to_string()],
    )
    .unwrap();

    assert_eq!(output.variable, "V1");
    assert_eq!(output.records.len(), 9);
    for (v, out) in output.points().iter().zip(output.trace("out").unwrap()) {
        assert_relative_eq!(out, 0.5 * v, epsilon = 1e-12);
    }
    assert_eq!(output.stats.factorizations, 1);
}

#[test]
fn test_current_source_sweep() {
    let mut circuit = Circuit::new("norton");
    let a = circuit.node("a");
    circuit.add_element(Element::current_source("I1", GROUND, a, 0.0)).unwrap();
    circuit.add_element(Element::resistor("R1", a, GROUND, 1e3)).unwrap();

    let output = dc_sweep(&circuit, &LinearSolver::default(), "I1", 0.0, 1e-3, 2.5e-4, &[]).unwrap();
    assert_eq!(output.records.len(), 5);
    for (i, v) in output.points().iter().zip(output.trace("a").unwrap()) {
        assert_relative_eq!(v, i * 1e3, epsilon = 1e-12);
    }
}

#[test]
fn test_rc_charging_converges_with_step_size() {
    for rule in [IntegrationRule::BackwardEuler, IntegrationRule::Trapezoidal] {
        let coarse = charging_error(rule, 1e-4);
        let fine = charging_error(rule, 5e-5);
        assert!(fine < coarse, "{}: {} !< {}", rule, fine, coarse);
    }
}

#[test]
fn test_trapezoidal_beats_backward_euler() {
    let h = 1e-4;
    let be = charging_error(IntegrationRule::BackwardEuler, h);
    let tr = charging_error(IntegrationRule::Trapezoidal, h);
    assert!(tr < be, "TR error {} should be below BE error {}", tr, be);
    assert!(be < 0.05);
}

#[test]
fn test_transient_starts_from_operating_point() {
    let output = transient(
        &rc_step(1e3, 1e-6),
        &LinearSolver::default(),
        1e-4,
        1e-3,
        &["in".to_string(), "out".to_string()],
    )
    .unwrap();

    let first = &output.records[0];
    assert_eq!(first.point, 0.0);
    assert_eq!(first.values[0].real(), Some(0.0));
    assert_eq!(first.values[1].real(), Some(0.0));
    // Source has stepped by the first time point
    assert_relative_eq!(output.trace("in").unwrap()[1], 1.0, epsilon = 1e-12);
}

#[test]
fn test_rc_lowpass_magnitude_decreases() {
    let (r, c) = (1e3, 1e-6);
    let fc = 1.0 / (2.0 * std::f64::consts::PI * r * c);
    let sweep = AcSweep::Decade {
        points: 10,
        start: fc / 100.0,
        stop: fc * 100.0,
    };
    let output = ac_analysis(&rc_step(r, c), &LinearSolver::default(), &sweep, &["out".to_string()]).unwrap();
    let out = output.ac_trace("out").unwrap();

    assert_eq!(out.len(), 41);
    assert!(out.windows(2).all(|w| w[1].magnitude < w[0].magnitude));
    assert!(out.windows(2).all(|w| w[1].phase < w[0].phase));
    assert_relative_eq!(out[0].magnitude, 1.0, epsilon = 1e-3);
    // Two decades above the corner: -40 dB, phase near -90 degrees
    assert_relative_eq!(out[40].db(), -40.0, epsilon = 0.01);
    assert!(out[40].phase < -89.0);
}

#[test]
fn test_ac_points_come_back_in_sweep_order() {
    let sweep = AcSweep::List(vec![1e4, 10.0, 1e3]);
    let output = ac_analysis(&rc_step(1e3, 1e-6), &LinearSolver::default(), &sweep, &[]).unwrap();
    assert_eq!(output.points(), vec![1e4, 10.0, 1e3]);
}

#[test]
fn test_runs_are_deterministic() {
    let circuit = rc_step(1e3, 1e-6);
    let solver = LinearSolver::new(SolverConfig {
        sparse: true,
        ..SolverConfig::default()
    });

    let a = transient(&circuit, &solver, 1e-4, 2e-3, &[]).unwrap();
    let b = transient(&circuit, &solver, 1e-4, 2e-3, &[]).unwrap();
    assert_eq!(a.records, b.records);

    let sweep = AcSweep::Linear {
        points: 16,
        start: 10.0,
        stop: 1e4,
    };
    let a = ac_analysis(&circuit, &solver, &sweep, &[]).unwrap();
    let b = ac_analysis(&circuit, &solver, &sweep, &[]).unwrap();
    assert_eq!(a.records, b.records);
}

#[test]
fn test_floating_node_is_structural() {
    // Node "b" only reaches ground through a capacitor, which is open at DC
    let mut circuit = divider(1.0, 1e3, 1e3);
    let b = circuit.node("b");
    circuit.add_element(Element::capacitor("C1", b, GROUND, 1e-9)).unwrap();

    for sparse in [false, true] {
        let solver = LinearSolver::new(SolverConfig {
            sparse,
            ..SolverConfig::default()
        });
        let err = operating_point(&circuit, &solver).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }
}

#[test]
fn test_simulator_runs_job() {
    let job = Job {
        circuit: rc_step(1e3, 1e-6),
        analysis: AnalysisConfig {
            options: SolverConfig::default(),
            requests: vec![
                AnalysisRequest::OperatingPoint { outputs: vec![] },
                AnalysisRequest::Transient {
                    time_step: 1e-4,
                    fin_time: 1e-3,
                    outputs: vec!["out".to_string()],
                },
                AnalysisRequest::DcSweep {
                    source: "R1".to_string(),
                    start: 0.0,
                    end: 1.0,
                    increment: 0.1,
                    outputs: vec![],
                },
            ],
        },
    };

    let results = run_job(job).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().analysis, "op");
    assert_eq!(results[1].as_ref().unwrap().records.len(), 11);
    assert_eq!(
        results[2].as_ref().unwrap_err(),
        &SimError::UnknownSource("R1".to_string())
    );
}

fn iterative_solver(sparse: bool, max_iterations: Option<usize>) -> LinearSolver {
    LinearSolver::new(SolverConfig {
        sparse,
        iterative: true,
        tolerance: 1e-10,
        max_iterations,
        ..SolverConfig::default()
    })
}

#[test]
fn test_iterative_operating_point_with_voltage_source() {
    let circuit = divider(5.0, 2e3, 3e3);
    let reference = operating_point(&circuit, &LinearSolver::default()).unwrap();

    for sparse in [false, true] {
        let op = operating_point(&circuit, &iterative_solver(sparse, None)).unwrap();
        assert_eq!(op.stats.strategy, Strategy::BiConjugateGradient);
        assert!(op.stats.iterations > 0);
        assert_relative_eq!(op.node_voltage(1), reference.node_voltage(1), epsilon = 1e-9);
        assert_relative_eq!(op.node_voltage(2), reference.node_voltage(2), epsilon = 1e-9);
        assert_relative_eq!(
            op.branch_current(0).unwrap(),
            reference.branch_current(0).unwrap(),
            epsilon = 1e-12
        );
    }
}

#[test]
fn test_iterative_transient_tracks_direct_solution() {
    let circuit = rc_step(1e3, 1e-6);
    let outputs = ["in".to_string(), "out".to_string()];
    let direct = transient(&circuit, &LinearSolver::default(), 1e-4, 5e-3, &outputs).unwrap();

    for sparse in [false, true] {
        let krylov = transient(&circuit, &iterative_solver(sparse, None), 1e-4, 5e-3, &outputs).unwrap();
        assert_eq!(krylov.stats.strategy, Strategy::BiConjugateGradient);
        assert_eq!(krylov.stats.factorizations, 3);
        assert_eq!(krylov.records.len(), direct.records.len());
        // Bi-CG on three unknowns settles within three iterations per solve
        assert!(krylov.stats.iterations > 0);
        assert!(krylov.stats.iterations <= 3 * krylov.stats.solves);

        for node in ["in", "out"] {
            let expected = direct.trace(node).unwrap();
            for (got, want) in krylov.trace(node).unwrap().iter().zip(&expected) {
                assert_relative_eq!(*got, *want, epsilon = 1e-9);
            }
        }
    }
}

#[test]
fn test_iterative_ac_matches_direct_solution() {
    let circuit = rc_step(1e3, 1e-6);
    let sweep = AcSweep::Decade {
        points: 10,
        start: 10.0,
        stop: 1e6,
    };
    let outputs = ["out".to_string()];
    let direct = ac_analysis(&circuit, &LinearSolver::default(), &sweep, &outputs).unwrap();
    let krylov = ac_analysis(&circuit, &iterative_solver(true, None), &sweep, &outputs).unwrap();

    assert_eq!(krylov.stats.strategy, Strategy::BiConjugateGradient);
    assert_eq!(krylov.points(), direct.points());
    for (got, want) in krylov.ac_trace("out").unwrap().iter().zip(direct.ac_trace("out").unwrap()) {
        assert_relative_eq!(got.magnitude, want.magnitude, max_relative = 1e-6);
        assert_relative_eq!(got.phase, want.phase, epsilon = 1e-4);
    }
}

#[test]
fn test_transient_failing_midway_returns_no_records() {
    // The source is 0 V at t = 0, so the operating point needs no iteration;
    // the first step does, and one is not enough
    let circuit = rc_step(1e3, 1e-6);
    let solver = iterative_solver(true, Some(1));
    assert!(operating_point(&circuit, &solver).is_ok());

    let err = transient(&circuit, &solver, 1e-4, 5e-3, &[]).unwrap_err();
    assert!(matches!(
        err,
        SimError::NoConvergence {
            strategy: Strategy::BiConjugateGradient,
            iterations: 1,
            ..
        }
    ));

    let job = Job {
        circuit,
        analysis: AnalysisConfig {
            options: solver.config().clone(),
            requests: vec![
                AnalysisRequest::Transient {
                    time_step: 1e-4,
                    fin_time: 5e-3,
                    outputs: vec![],
                },
                AnalysisRequest::OperatingPoint { outputs: vec![] },
            ],
        },
    };
    let results = run_job(job).unwrap();
    assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::Convergence);
    assert_eq!(results[1].as_ref().unwrap().records.len(), 1);
}
