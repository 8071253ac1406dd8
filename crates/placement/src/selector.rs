//! Label, claim and CEL predicates over one candidate cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use ocm_cel::{Activation, CompileError, Env, EvalError, Program, ProgramError, Value};
use ocm_core::placement::ClusterSelector as ClusterSelectorSpec;
use ocm_store::{Selector, StoreError};

use crate::cel::{CelOptions, CLAIMS, LABELS};
use crate::projection::string_map;

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("invalid label selector: {0}")]
    Label(#[source] StoreError),
    #[error("invalid claim selector: {0}")]
    Claim(#[source] StoreError),
    #[error("compilation failed: {expression}: {source}")]
    Compile { expression: String, source: CompileError },
    #[error("instantiation failed: {expression}: {source}")]
    Instantiate { expression: String, source: ProgramError },
    #[error("evaluating {expression}: {source}")]
    Eval { expression: String, source: EvalError },
}

/// Compiled cluster selector. Sub-predicates are ANDed and evaluated label, claim, CEL;
/// an empty selector matches every cluster.
pub struct ClusterSelector {
    labels: Selector,
    claims: Selector,
    programs: Vec<Program>,
}

impl ClusterSelector {
    /// Validate every part eagerly, compiling CEL expressions against `env`
    /// (see [`crate::cel::selector_env`]).
    pub fn new(spec: &ClusterSelectorSpec, env: &Arc<Env>, options: CelOptions) -> Result<Self, SelectorError> {
        let mut sel = Self::label_claim(spec)?;
        for expression in &spec.cel_selector.cel_expressions {
            let ast = env.compile(expression).map_err(|source| SelectorError::Compile { expression: expression.clone(), source })?;
            let program = env
                .program(&ast, options.program_options())
                .map_err(|source| SelectorError::Instantiate { expression: expression.clone(), source })?;
            sel.programs.push(program);
        }
        Ok(sel)
    }

    /// Label and claim parts only; CEL expressions in `spec` are ignored.
    pub fn label_claim(spec: &ClusterSelectorSpec) -> Result<Self, SelectorError> {
        let labels = match &spec.label_selector {
            Some(ls) => Selector::from_label_selector(ls).map_err(SelectorError::Label)?,
            None => Selector::everything(),
        };
        let claims = Selector::from_requirements(&spec.claim_selector.match_expressions).map_err(SelectorError::Claim)?;
        Ok(Self { labels, claims, programs: Vec::new() })
    }

    pub fn has_cel(&self) -> bool { !self.programs.is_empty() }

    /// Label and claim sub-predicates.
    pub fn matches(&self, labels: &BTreeMap<String, String>, claims: &BTreeMap<String, String>) -> bool {
        self.labels.matches(labels) && self.claims.matches(claims)
    }

    /// All sub-predicates. A runtime error in an expression is returned as the error and the
    /// cluster does not match; a non-boolean or `false` result is a plain non-match.
    pub fn cel_matches(&self, labels: &BTreeMap<String, String>, claims: &BTreeMap<String, String>) -> Result<bool, SelectorError> {
        if !self.matches(labels, claims) {
            return Ok(false);
        }
        if self.programs.is_empty() {
            return Ok(true);
        }
        let activation = Activation::new().bind(LABELS, string_map(Some(labels))).bind(CLAIMS, string_map(Some(claims)));
        for p in &self.programs {
            match p.eval(&activation).result {
                Ok(Value::Bool(true)) => {}
                Ok(_) => return Ok(false),
                Err(source) => return Err(SelectorError::Eval { expression: p.source().to_string(), source }),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cel::selector_env;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
    use ocm_core::placement::{ClusterCelSelector, ClusterClaimSelector};

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> { pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }

    fn cel(exprs: &[&str]) -> ClusterSelectorSpec {
        ClusterSelectorSpec { cel_selector: ClusterCelSelector { cel_expressions: exprs.iter().map(|s| s.to_string()).collect() }, ..Default::default() }
    }

    fn build(spec: &ClusterSelectorSpec) -> Result<ClusterSelector, SelectorError> {
        ClusterSelector::new(spec, &selector_env().expect("env"), CelOptions::default())
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = build(&ClusterSelectorSpec::default()).expect("ok");
        assert!(sel.matches(&map(&[("a", "b")]), &map(&[])));
        assert!(sel.cel_matches(&map(&[]), &map(&[("x", "y")])).expect("ok"));
    }

    #[test]
    fn label_and_claim_parts() {
        let spec = ClusterSelectorSpec {
            label_selector: Some(LabelSelector { match_labels: Some(map(&[("cloud", "Amazon")])), match_expressions: None }),
            claim_selector: ClusterClaimSelector {
                match_expressions: vec![LabelSelectorRequirement { key: "region".into(), operator: "In".into(), values: Some(vec!["us-east-1".into()]) }],
            },
            ..Default::default()
        };
        let sel = build(&spec).expect("ok");
        assert!(sel.matches(&map(&[("cloud", "Amazon")]), &map(&[("region", "us-east-1")])));
        assert!(!sel.matches(&map(&[("region", "us-east-1")]), &map(&[("cloud", "Amazon")])));
    }

    #[test]
    fn cel_over_labels_and_claims() {
        let sel = build(&cel(&[r#"labels["version"].matches('^1\\.(14|15)\\.\\d+$')"#, r#"claims["region"] == "us-east-1""#])).expect("ok");
        assert!(sel.cel_matches(&map(&[("version", "1.14.3")]), &map(&[("region", "us-east-1")])).expect("ok"));
        assert!(!sel.cel_matches(&map(&[("version", "1.16.3")]), &map(&[("region", "us-east-1")])).expect("ok"));
    }

    #[test]
    fn missing_key_surfaces_as_error() {
        let sel = build(&cel(&[r#"labels["cloud"] == "Amazon""#, r#"claims["region"] == "us-east-1""#])).expect("ok");
        let err = sel.cel_matches(&map(&[("region", "us-east-1")]), &map(&[("cloud", "Amazon")])).unwrap_err();
        assert!(err.to_string().contains("no such key: cloud"), "{}", err);
    }

    #[test]
    fn undeclared_function_fails_construction() {
        let err = build(&cel(&[r#"labels["version"].matchess('^1\\.(14|15)\\.\\d+$')"#])).err().expect("compile error");
        assert!(err.to_string().contains("undeclared reference to 'matchess'"), "{}", err);
    }

    #[test]
    fn label_mismatch_skips_cel() {
        let spec = ClusterSelectorSpec {
            label_selector: Some(LabelSelector { match_labels: Some(map(&[("env", "prod")])), match_expressions: None }),
            ..cel(&[r#"labels["missing"] == "x""#])
        };
        let sel = build(&spec).expect("ok");
        assert!(!sel.cel_matches(&map(&[("env", "dev")]), &map(&[])).expect("no eval"));
    }
}
