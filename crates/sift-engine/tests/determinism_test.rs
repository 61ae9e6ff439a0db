//! Integration tests for determinism, monotonicity and fatal analysis errors

use sift_engine::policy::PlanReport;
use sift_engine::{analyze, AnalysisError, Program, RetentionConfig, TypeTable};

/// A program exercising every kind of edge: generics, virtual dispatch,
/// interfaces, statics and reflection
const MIXED: &str = r#"
    entry_points = ["App::Main"]

    [[types]]
    name = "App"
    [[types.methods]]
    name = "Main"
    kind = "static"
    body = [
        { op = "new", type = "Repository<Order>" },
        { op = "new", type = "Repository<Customer>" },
        { op = "call_virtual", method = "IStore<Order>::Save" },
        { op = "call_virtual", method = "IStore<Customer>::Save" },
        { op = "load_field", field = "Registry::Count" },
        { op = "get_method", type = "Order", name = "Validate", intent = "invoke" },
        { op = "get_attributes", type = "Customer" },
        { op = "make_generic_type", type = "Repository<>" },
        { op = "call", method = "Pipeline::Run<int>" },
        { op = "box", type = "Money" },
    ]

    [[types]]
    name = "IStore"
    kind = "interface"
    generic_params = ["T"]
    [[types.methods]]
    name = "Save"
    kind = "abstract"
    params = ["T"]

    [[types]]
    name = "Repository"
    generic_params = ["T"]
    interfaces = ["IStore<T>"]
    [[types.fields]]
    name = "Items"
    type = "T[]"
    [[types.methods]]
    name = "Save"
    kind = "virtual"
    params = ["T"]
    body = [{ op = "load_field", field = "Repository<T>::Items" }, { op = "typeof", type = "T" }]

    [[types]]
    name = "Order"
    [[types.methods]]
    name = "Validate"
    returns = "bool"

    [[types]]
    name = "AuditAttribute"

    [[types]]
    name = "Customer"
    attributes = ["AuditAttribute"]

    [[types]]
    name = "Registry"
    [[types.fields]]
    name = "Count"
    type = "int"
    static = true
    [[types.methods]]
    name = ".cctor"
    kind = "static_constructor"
    body = [{ op = "new", type = "List<string>" }]

    [[types]]
    name = "List"
    generic_params = ["T"]

    [[types]]
    name = "Pipeline"
    [[types.methods]]
    name = "Run"
    kind = "static"
    generic_params = ["U"]
    body = [{ op = "call", method = "Pipeline::Run<List<U>>" }]

    [[types]]
    name = "Money"
    kind = "struct"
"#;

fn report(source: &str, config: &RetentionConfig) -> (PlanReport, String) {
    // A fresh table per run, so interning order differs between runs
    let table = TypeTable::new();
    let program = Program::from_toml_str(source, &table).unwrap();
    let plan = analyze(&program, &table, config).unwrap();
    (plan.report(&program, &table), plan.digest(&program, &table))
}

fn with_workers(workers: usize) -> RetentionConfig {
    RetentionConfig {
        workers,
        max_generic_depth: 4,
        ..RetentionConfig::default()
    }
}

#[test]
fn test_worker_count_does_not_change_the_plan() {
    let (baseline, digest) = report(MIXED, &with_workers(1));
    for workers in [2, 4, 8] {
        for _ in 0..3 {
            let (other, other_digest) = report(MIXED, &with_workers(workers));
            assert_eq!(other, baseline, "plan differs with {} workers", workers);
            assert_eq!(other_digest, digest);
        }
    }
}

#[test]
fn test_recursive_generic_instantiation_terminates() {
    let (plan, _) = report(MIXED, &with_workers(1));
    // Run<int>, Run<List<int>>, ... until the depth guard collapses to the
    // shared form
    assert!(plan.bodies.iter().any(|b| b == "Pipeline::Run<int>()"));
    assert!(plan.bodies.iter().any(|b| b == "Pipeline::Run<__Canon>()"));
    assert!(plan.bodies.len() < 40);
}

#[test]
fn test_adding_reflection_never_removes_metadata() {
    let extended = MIXED.replace(
        r#"{ op = "box", type = "Money" },"#,
        r#"{ op = "box", type = "Money" },
        { op = "get_field", type = "Repository<Order>", name = "Items", intent = "invoke" },
        { op = "activate", type = "Order" },"#,
    );
    assert_ne!(extended, MIXED);

    let (base, _) = report(MIXED, &with_workers(1));
    let (more, _) = report(&extended, &with_workers(1));
    for ty in &base.types {
        let grown = more
            .find_type(&ty.name)
            .unwrap_or_else(|| panic!("{} lost its metadata", ty.name));
        assert!(grown.tier >= ty.tier, "{} was demoted", ty.name);
        assert!(grown.browsable || !ty.browsable);
        assert!(grown.handle || !ty.handle);
    }
    for member in &base.members {
        let grown = more.find_member(&member.name).unwrap();
        assert!(grown.invoke_thunk || !member.invoke_thunk);
    }
    for body in &base.bodies {
        assert!(more.bodies.contains(body));
    }
}

#[test]
fn test_work_limit_reports_divergence() {
    let table = TypeTable::new();
    let program = Program::from_toml_str(MIXED, &table).unwrap();
    let config = RetentionConfig {
        max_work_items: 3,
        ..RetentionConfig::default()
    };
    let err = analyze(&program, &table, &config).unwrap_err();
    assert!(matches!(err, AnalysisError::FixpointDiverged { .. }));
}

#[test]
fn test_open_root_is_rejected() {
    let table = TypeTable::new();
    let program = Program::from_toml_str(
        r#"
        roots = ["Holder<>::Get"]

        [[types]]
        name = "Holder"
        generic_params = ["T"]
        [[types.methods]]
        name = "Get"
        returns = "T"
        "#,
        &table,
    )
    .unwrap();
    let err = analyze(&program, &table, &RetentionConfig::default()).unwrap_err();
    match err {
        AnalysisError::OpenRoot { name } => assert_eq!(name, "Holder<>::Get()"),
        other => panic!("expected OpenRoot, got {:?}", other),
    }
}
