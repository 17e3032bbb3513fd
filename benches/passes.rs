use std::path::Path;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use moonc::ast::Node;
use moonc::backend::{self, Backend};
use moonc::{compiler, semantic, vm};
use test_support::load_cases;

fn workloads() -> Vec<(String, Node)> {
    let cases = load_cases(Path::new("tests/programs")).expect("load cases");
    cases
        .into_iter()
        .filter(|case| case.spec.bench.enabled)
        .map(|case| {
            let source = case.read_tree().expect("read tree");
            let tree = compiler::parse_tree(&source)
                .unwrap_or_else(|err| panic!("parse {}: {err:#}", case.name));
            (case.name, tree)
        })
        .collect()
}

fn bench_passes(c: &mut Criterion) {
    for (name, tree) in workloads() {
        c.bench_function(&format!("analyze_{name}"), |b| {
            b.iter(|| {
                let mut program = tree.clone();
                let analysis = semantic::analyze(black_box(&mut program)).expect("analyze");
                black_box(analysis);
            })
        });

        let mut program = tree.clone();
        let analysis = semantic::analyze(&mut program).expect("analyze");
        let backends: Vec<Box<dyn Backend>> = backend::backends();
        for backend in &backends {
            c.bench_function(&format!("generate_{}_{name}", backend.name()), |b| {
                b.iter(|| {
                    let code = backend
                        .generate(black_box(&program), &analysis.table)
                        .expect("generate");
                    black_box(code);
                })
            });

            let code = backend
                .generate(&program, &analysis.table)
                .expect("generate");
            c.bench_function(&format!("simulate_{}_{name}", backend.name()), |b| {
                b.iter(|| {
                    let output = vm::run(black_box(&code)).expect("run");
                    black_box(output);
                })
            });
        }
    }
}

criterion_group!(benches, bench_passes);
criterion_main!(benches);
