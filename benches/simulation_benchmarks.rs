use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mnasim::analysis::{ac_analysis, operating_point, transient};
use mnasim::*;

/// Resistor ladder driven by a 1 V source with a capacitor on every rung.
fn rc_ladder(stages: usize) -> Circuit {
    let mut circuit = Circuit::new("rc ladder");
    let input = circuit.node("in");
    circuit
        .add_element(
            Element::voltage_source("V1", input, GROUND, 1.0)
                .with_spec(SourceSpec::default().with_ac(1.0, 0.0)),
        )
        .unwrap();

    let mut previous = input;
    for i in 0..stages {
        let node = circuit.node(&format!("n{}", i));
        circuit
            .add_element(Element::resistor(&format!("R{}", i), previous, node, 1e3))
            .unwrap();
        circuit
            .add_element(Element::capacitor(&format!("C{}", i), node, GROUND, 1e-9))
            .unwrap();
        previous = node;
    }
    circuit
}

fn solver(sparse: bool) -> LinearSolver {
    LinearSolver::new(SolverConfig {
        sparse,
        ..SolverConfig::default()
    })
}

fn bench_operating_point(c: &mut Criterion) {
    let mut group = c.benchmark_group("operating_point");

    for stages in [10, 50, 200].iter() {
        let circuit = rc_ladder(*stages);
        group.bench_with_input(BenchmarkId::new("dense_lu", stages), &circuit, |b, circuit| {
            let solver = solver(false);
            b.iter(|| operating_point(circuit, &solver).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("sparse_lu", stages), &circuit, |b, circuit| {
            let solver = solver(true);
            b.iter(|| operating_point(circuit, &solver).unwrap());
        });
    }

    group.finish();
}

fn bench_transient_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("transient_analysis");
    let circuit = rc_ladder(20);
    let solver = solver(true);

    group.bench_function("ladder_100_steps", |b| {
        b.iter(|| transient(&circuit, &solver, 1e-8, 1e-6, &[]).unwrap());
    });

    group.finish();
}

fn bench_ac_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("ac_analysis");
    let circuit = rc_ladder(20);
    let solver = solver(false);
    let sweep = AcSweep::Decade {
        points: 20,
        start: 1e3,
        stop: 1e9,
    };

    group.bench_function("ladder_decade_sweep", |b| {
        b.iter(|| ac_analysis(&circuit, &solver, &sweep, &[]).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_operating_point,
    bench_transient_analysis,
    bench_ac_analysis
);
criterion_main!(benches);
