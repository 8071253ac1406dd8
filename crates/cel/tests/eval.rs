use std::sync::Arc;

use ocm_cel::library::{json::Json, regex::Regex, strings::Strings};
use ocm_cel::{Activation, Env, EvalError, Evaluation, ProgramOptions, Type, Value};
use tokio_util::sync::CancellationToken;

fn env() -> Arc<Env> {
    Env::builder()
        .variable("managedCluster", Type::Map)
        .variable("labels", Type::Map)
        .library(Strings)
        .library(Regex)
        .library(Json)
        .build()
        .expect("env")
}

fn labels(pairs: &[(&str, &str)]) -> Value { Value::map(pairs.iter().map(|(k, v)| (*k, Value::from(*v)))) }

fn cluster(pairs: &[(&str, &str)]) -> Value {
    Value::map([("metadata", Value::map([("name", Value::from("c1")), ("labels", labels(pairs))]))])
}

fn run_with(expr: &str, opts: ProgramOptions, pairs: &[(&str, &str)]) -> Evaluation {
    let env = env();
    let ast = env.compile(expr).expect("compile");
    let prg = env.program(&ast, opts).expect("program");
    prg.eval(&Activation::new().bind("labels", labels(pairs)).bind("managedCluster", cluster(pairs)))
}

fn run(expr: &str, pairs: &[(&str, &str)]) -> Evaluation { run_with(expr, ProgramOptions::default(), pairs) }

fn truthy(expr: &str) -> bool {
    match run(expr, &[]).result {
        Ok(Value::Bool(b)) => b,
        other => panic!("{} => {:?}", expr, other),
    }
}

#[test]
fn label_equality_costs_five() {
    let expr = r#"managedCluster.metadata.labels["env"] == "prod""#;
    let hit = run(expr, &[("env", "prod")]);
    assert_eq!(hit.result, Ok(Value::Bool(true)));
    assert_eq!(hit.details.actual_cost(), Some(5));
    let miss = run(expr, &[("env", "dev")]);
    assert_eq!(miss.result, Ok(Value::Bool(false)));
    assert_eq!(miss.details.actual_cost(), Some(5));
}

#[test]
fn regex_matches_with_escaped_pattern() {
    let expr = r#"labels["version"].matches('^1\\.(14|15)\\.\\d+$')"#;
    let hit = run(expr, &[("version", "1.14.3")]);
    assert_eq!(hit.result, Ok(Value::Bool(true)));
    assert_eq!(hit.details.actual_cost(), Some(7));
    assert_eq!(run(expr, &[("version", "1.16.0")]).result, Ok(Value::Bool(false)));
}

#[test]
fn missing_key_is_a_runtime_error() {
    let out = run(r#"labels["cloud"] == "aws""#, &[]);
    let err = out.result.unwrap_err();
    assert_eq!(err.to_string(), "no such key: cloud");
    assert_eq!(run(r#"labels["cloud"] == "aws" || true"#, &[]).result, Ok(Value::Bool(true)));
    assert_eq!(run(r#"false && labels["cloud"] == "aws""#, &[]).result, Ok(Value::Bool(false)));
    assert!(run(r#"labels["cloud"] == "aws" && true"#, &[]).result.is_err());
}

#[test]
fn macros_evaluate() {
    assert!(truthy("[1, 2, 3].exists(x, x > 2)"));
    assert!(truthy("[1, 2, 3].all(x, x > 0)"));
    assert!(!truthy("[1, 2, 3].exists_one(x, x > 1)"));
    assert!(truthy("[1, 2, 3].map(x, x * 2) == [2, 4, 6]"));
    assert!(truthy("[1, 2, 3].map(x, x > 1, x) == [2, 3]"));
    assert!(truthy("[1, 2, 3].filter(x, x % 2 == 1) == [1, 3]"));
    assert!(truthy("{'a': 1, 'b': 2}.all(k, k in ['a', 'b'])"));
    assert!(truthy("['a', 1].exists(x, x > 0)"));
    assert!(truthy("has({'a': 1}.a) && !has({'a': 1}.b)"));
}

#[test]
fn string_and_json_libraries() {
    assert!(truthy(r#""Hello".lowerAscii() == "hello" && "a".upperAscii() == "A""#));
    assert!(truthy(r#""a,b,c".split(",").size() == 3"#));
    assert!(truthy(r#"["a", "b"].join("-") == "a-b""#));
    assert!(truthy(r#"" x ".trim() == "x" && "abc".substring(1) == "bc""#));
    assert!(truthy(r#""abcabc".lastIndexOf("b") == 4 && "abc".indexOf("c") == 2"#));
    assert!(truthy(r#""a1b22".findAll('[0-9]+') == ["1", "22"] && "abc123".find('[0-9]+') == "123""#));
    assert!(truthy(r#""prod-east".startsWith("prod") && "prod-east".endsWith("east") && "prod-east".contains("-")"#));
    let out = run(r#"parseJSON(labels["cfg"]).replicas == 3 && labels["cfg"].parseJSON().tier == "gold""#, &[("cfg", r#"{"replicas": 3, "tier": "gold"}"#)]);
    assert_eq!(out.result, Ok(Value::Bool(true)));
    assert!(run(r#"parseJSON("{")"#, &[]).result.unwrap_err().to_string().starts_with("failed to parse JSON"));
}

#[test]
fn type_values_and_dyn() {
    assert!(truthy("type(1) == int"));
    assert!(truthy("type('a') == string && type(1u) != int"));
    assert!(truthy("type(managedCluster.metadata.labels) == map"));
    assert!(truthy("type([1, 2]) == list && type(null) == null_type"));
    assert!(truthy("type(type(1)) == type"));
    assert!(truthy("dyn(1) + 2 == 3"));
    assert!(truthy("dyn('x') == 'x'"));
    assert_eq!(run("type(2.5)", &[]).result, Ok(Value::Type(Type::Double)));
    assert_eq!(run("type(true)", &[]).result.map(|v| v.to_string()), Ok("bool".to_string()));
}

#[test]
fn arithmetic_errors() {
    assert_eq!(run("1 / 0", &[]).result, Err(EvalError::DivisionByZero));
    assert_eq!(run("9223372036854775807 + 1", &[]).result, Err(EvalError::Overflow));
    assert_eq!(run("int('12') + 3", &[]).result, Ok(Value::Int(15)));
    assert_eq!(run("7u % 4u", &[]).result, Ok(Value::Uint(3)));
}

#[test]
fn per_call_cost_limit_aborts() {
    let opts = ProgramOptions { cost_limit: Some(5), ..Default::default() };
    let out = run_with("[1, 2, 3, 4, 5, 6, 7, 8, 9, 10].all(x, x > 0)", opts, &[]);
    let err = out.result.unwrap_err();
    assert_eq!(err, EvalError::CostLimitExceeded);
    assert_eq!(err.to_string(), "operation cancelled: actual cost limit exceeded");
}

#[test]
fn cancelled_evaluation_is_interrupted() {
    let env = env();
    let ast = env.compile("[1, 2, 3].all(x, true)").expect("compile");
    let prg = env.program(&ast, ProgramOptions { interrupt_check_frequency: 1, ..Default::default() }).expect("program");
    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(prg.eval_with_cancel(&Activation::new(), &token).result, Err(EvalError::Interrupted));
    assert_eq!(prg.eval(&Activation::new()).result, Ok(Value::Bool(true)));
}

#[test]
fn untracked_programs_report_no_cost() {
    let out = run_with("true", ProgramOptions { track_cost: false, cost_limit: None, interrupt_check_frequency: 0 }, &[]);
    assert_eq!(out.details.actual_cost(), None);
}

#[test]
fn syntax_errors_point_at_the_offending_column() {
    let err = env().compile("labels[").unwrap_err();
    assert!(err.to_string().starts_with("ERROR: <input>:1:8: Syntax error"), "{}", err);
    assert_eq!(err.issues.len(), 1);
}

#[test]
fn programs_share_one_environment_across_threads() {
    let env = env();
    let ast = env.compile(r#"labels["env"] == "prod""#).expect("compile");
    let prg = Arc::new(env.program(&ast, ProgramOptions::default()).expect("program"));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let prg = Arc::clone(&prg);
            std::thread::spawn(move || {
                let v = if i % 2 == 0 { "prod" } else { "dev" };
                prg.eval(&Activation::new().bind("labels", labels(&[("env", v)]))).result
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().expect("join")).collect();
    assert_eq!(results[0], Ok(Value::Bool(true)));
    assert_eq!(results[1], Ok(Value::Bool(false)));
}
