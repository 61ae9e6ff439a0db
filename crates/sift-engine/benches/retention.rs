use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sift_engine::{analyze, Program, RetentionConfig, TypeTable};

/// A program with `width` service classes, each implementing a shared
/// interface, constructing a generic wrapper and looked up by name
fn synthetic_manifest(width: usize) -> String {
    let mut body = String::new();
    let mut types = String::new();
    for i in 0..width {
        body.push_str(&format!("    {{ op = \"new\", type = \"Service{i}\" }},\n"));
        if i % 4 == 0 {
            body.push_str(&format!(
                "    {{ op = \"get_method\", type = \"Service{i}\", name = \"Handle\", intent = \"invoke\" }},\n"
            ));
        }
        types.push_str(&format!(
            r#"
[[types]]
name = "Service{i}"
interfaces = ["IHandler"]
[[types.fields]]
name = "State"
type = "Wrapper<Service{i}>"
[[types.methods]]
name = "Handle"
kind = "virtual"
body = [{{ op = "new", type = "Wrapper<Service{i}>" }}, {{ op = "call", method = "Wrapper<Service{i}>::Unwrap" }}]
"#
        ));
    }
    format!(
        r#"
entry_points = ["App::Main"]

[[types]]
name = "App"
[[types.methods]]
name = "Main"
kind = "static"
body = [
{body}    {{ op = "call_virtual", method = "IHandler::Handle" }},
]

[[types]]
name = "IHandler"
kind = "interface"
[[types.methods]]
name = "Handle"
kind = "abstract"

[[types]]
name = "Wrapper"
generic_params = ["T"]
[[types.methods]]
name = "Unwrap"
returns = "T"
body = [{{ op = "typeof", type = "T" }}]
{types}"#
    )
}

fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze");

    for width in [16, 128, 512] {
        let source = synthetic_manifest(width);
        group.throughput(Throughput::Elements(width as u64));
        for workers in [1, 4] {
            let config = RetentionConfig {
                workers,
                ..RetentionConfig::default()
            };
            group.bench_with_input(
                BenchmarkId::new(format!("workers_{}", workers), width),
                &source,
                |b, source| {
                    b.iter(|| {
                        let table = TypeTable::new();
                        let program = Program::from_toml_str(black_box(source), &table).unwrap();
                        analyze(&program, &table, &config).unwrap()
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_digest(c: &mut Criterion) {
    let source = synthetic_manifest(128);
    let table = TypeTable::new();
    let program = Program::from_toml_str(&source, &table).unwrap();
    let plan = analyze(&program, &table, &RetentionConfig::default()).unwrap();

    c.bench_function("digest_128", |b| {
        b.iter(|| plan.digest(black_box(&program), &table));
    });
}

criterion_group!(benches, bench_analyze, bench_digest);
criterion_main!(benches);
