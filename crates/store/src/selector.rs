//! Kubernetes label-selector semantics over plain string maps (labels or cluster claims).

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: BTreeSet<String>,
}

impl Requirement {
    pub fn new(key: &str, operator: &str, values: &[String]) -> Result<Self, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidSelector("requirement key must not be empty".into()));
        }
        let operator = match operator {
            "In" => Operator::In,
            "NotIn" => Operator::NotIn,
            "Exists" => Operator::Exists,
            "DoesNotExist" => Operator::DoesNotExist,
            other => return Err(StoreError::InvalidSelector(format!("{:?} is not a valid label selector operator", other))),
        };
        match operator {
            Operator::In | Operator::NotIn if values.is_empty() => {
                return Err(StoreError::InvalidSelector(format!("values for key {:?} must be non-empty for operator {:?}", key, operator)));
            }
            Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                return Err(StoreError::InvalidSelector(format!("values for key {:?} must be empty for operator {:?}", key, operator)));
            }
            _ => {}
        }
        Ok(Self { key: key.to_string(), operator, values: values.iter().cloned().collect() })
    }

    pub fn matches(&self, set: &BTreeMap<String, String>) -> bool {
        let v = set.get(&self.key);
        match self.operator {
            Operator::In => v.map(|v| self.values.contains(v)).unwrap_or(false),
            Operator::NotIn => v.map(|v| !self.values.contains(v)).unwrap_or(true),
            Operator::Exists => v.is_some(),
            Operator::DoesNotExist => v.is_none(),
        }
    }
}

/// A validated selector: ANDed requirements. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }

    pub fn requirements(&self) -> &[Requirement] { &self.requirements }

    /// `matchLabels` become `In` requirements with a single value, ahead of `matchExpressions`.
    pub fn from_label_selector(sel: &LabelSelector) -> Result<Self, StoreError> {
        let mut requirements = Vec::new();
        for (k, v) in sel.match_labels.iter().flatten() {
            requirements.push(Requirement::new(k, "In", std::slice::from_ref(v))?);
        }
        for r in sel.match_expressions.iter().flatten() {
            requirements.push(requirement(r)?);
        }
        Ok(Self { requirements })
    }

    pub fn from_requirements(reqs: &[LabelSelectorRequirement]) -> Result<Self, StoreError> {
        Ok(Self { requirements: reqs.iter().map(requirement).collect::<Result<_, _>>()? })
    }

    /// Equality selector over every pair in `labels`.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        let requirements = labels
            .iter()
            .map(|(k, v)| Requirement { key: k.clone(), operator: Operator::In, values: BTreeSet::from([v.clone()]) })
            .collect();
        Self { requirements }
    }

    pub fn matches(&self, set: &BTreeMap<String, String>) -> bool { self.requirements.iter().all(|r| r.matches(set)) }
}

fn requirement(r: &LabelSelectorRequirement) -> Result<Requirement, StoreError> {
    Requirement::new(&r.key, &r.operator, r.values.as_deref().unwrap_or(&[]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> BTreeMap<String, String> { pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }

    fn req(key: &str, op: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.into(),
            operator: op.into(),
            values: if values.is_empty() { None } else { Some(values.iter().map(|v| v.to_string()).collect()) },
        }
    }

    #[test]
    fn match_labels_is_and_of_equality() {
        let sel = Selector::from_label_selector(&LabelSelector {
            match_labels: Some(set(&[("cloud", "Amazon"), ("env", "prod")])),
            match_expressions: None,
        })
        .expect("ok");
        assert!(sel.matches(&set(&[("cloud", "Amazon"), ("env", "prod"), ("x", "y")])));
        assert!(!sel.matches(&set(&[("cloud", "Amazon")])));
        assert!(!sel.matches(&set(&[("cloud", "Google"), ("env", "prod")])));
    }

    #[test]
    fn operators_follow_kubernetes_semantics() {
        let sel = Selector::from_requirements(&[req("region", "In", &["us-east-1", "us-west-2"])]).expect("ok");
        assert!(sel.matches(&set(&[("region", "us-west-2")])));
        assert!(!sel.matches(&set(&[("region", "eu-west-1")])));
        assert!(!sel.matches(&set(&[])));

        let not_in = Selector::from_requirements(&[req("region", "NotIn", &["eu-west-1"])]).expect("ok");
        assert!(not_in.matches(&set(&[])));
        assert!(!not_in.matches(&set(&[("region", "eu-west-1")])));

        let exists = Selector::from_requirements(&[req("gpu", "Exists", &[]), req("spot", "DoesNotExist", &[])]).expect("ok");
        assert!(exists.matches(&set(&[("gpu", "")])));
        assert!(!exists.matches(&set(&[("gpu", "a"), ("spot", "true")])));
    }

    #[test]
    fn invalid_requirements_are_rejected() {
        assert!(Selector::from_requirements(&[req("a", "In", &[])]).is_err());
        assert!(Selector::from_requirements(&[req("a", "Exists", &["x"])]).is_err());
        assert!(Selector::from_requirements(&[req("a", "Gt", &["1"])]).is_err());
        assert!(Selector::from_requirements(&[req("", "Exists", &[])]).is_err());
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(Selector::everything().matches(&set(&[("a", "b")])));
        let sel = Selector::from_label_selector(&LabelSelector::default()).expect("ok");
        assert!(sel.is_empty());
        assert!(sel.matches(&set(&[])));
    }
}
