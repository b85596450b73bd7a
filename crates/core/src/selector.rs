//! Label selectors: the wire shape (`matchLabels` / `matchExpressions`), the
//! equality-based string form used for node selection, and a compiled matcher.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("static regex"));
static DNS_SUBDOMAIN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("static regex"));

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid label key {0:?}")]
    InvalidKey(String),
    #[error("invalid label value {value:?} for key {key:?}")]
    InvalidValue { key: String, value: String },
    #[error("unknown operator {op:?} for key {key:?}")]
    UnknownOperator { key: String, op: String },
    #[error("operator {op} for key {key:?} requires at least one value")]
    MissingValues { key: String, op: &'static str },
    #[error("operator {op} for key {key:?} takes no values")]
    UnexpectedValues { key: String, op: &'static str },
    #[error("malformed selector term {0:?}")]
    MalformedTerm(String),
}

/// Wire form of a label selector, as found on pod specs and in policy files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    pub fn match_labels<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { match_labels: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(), match_expressions: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelSelectorRequirement {
    pub key: String,
    /// Kept as a string so unknown operators surface as a compile error rather than a decode error.
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Op {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One compiled term of a [`Selector`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Requirement {
    key: String,
    op: Op,
    values: BTreeSet<String>,
}

impl Requirement {
    fn matches(&self, labels: &[(String, String)]) -> bool {
        let found = crate::label_value(labels, &self.key);
        match self.op {
            Op::In => found.map(|v| self.values.contains(v)).unwrap_or(false),
            Op::NotIn => found.map(|v| !self.values.contains(v)).unwrap_or(true),
            Op::Exists => found.is_some(),
            Op::DoesNotExist => found.is_none(),
        }
    }
}

/// Compiled selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Matches no label set; what an absent wire selector compiles to.
    Nothing,
    /// Conjunction of requirements; empty matches everything.
    All(Vec<Requirement>),
}

impl Selector {
    /// Compile a wire selector. `None` selects nothing, an empty selector selects everything.
    pub fn from_label_selector(sel: Option<&LabelSelector>) -> Result<Self, SelectorError> {
        let Some(sel) = sel else { return Ok(Selector::Nothing) };
        let mut reqs = Vec::with_capacity(sel.match_labels.len() + sel.match_expressions.len());
        for (k, v) in &sel.match_labels {
            reqs.push(requirement(k, Op::In, std::slice::from_ref(v))?);
        }
        for expr in &sel.match_expressions {
            let op = match expr.operator.as_str() {
                "In" => Op::In,
                "NotIn" => Op::NotIn,
                "Exists" => Op::Exists,
                "DoesNotExist" => Op::DoesNotExist,
                other => return Err(SelectorError::UnknownOperator { key: expr.key.clone(), op: other.to_string() }),
            };
            reqs.push(requirement(&expr.key, op, &expr.values)?);
        }
        reqs.sort();
        Ok(Selector::All(reqs))
    }

    /// Parse the equality-based string form: `k=v`, `k==v`, `k!=v`, `k`, `!k`, comma-separated.
    pub fn parse(s: &str) -> Result<Self, SelectorError> {
        let mut reqs = Vec::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let req = if let Some(key) = term.strip_prefix('!') {
                requirement(key.trim(), Op::DoesNotExist, &[])?
            } else if let Some((k, v)) = term.split_once("!=") {
                requirement(k.trim(), Op::NotIn, &[v.trim().to_string()])?
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                requirement(k.trim(), Op::In, &[v.trim().to_string()])?
            } else if term.contains(|c: char| c.is_whitespace() || c == '(' || c == ')') {
                return Err(SelectorError::MalformedTerm(term.to_string()));
            } else {
                requirement(term, Op::Exists, &[])?
            };
            reqs.push(req);
        }
        reqs.sort();
        Ok(Selector::All(reqs))
    }

    pub fn matches(&self, labels: &[(String, String)]) -> bool {
        match self {
            Selector::Nothing => false,
            Selector::All(reqs) => reqs.iter().all(|r| r.matches(labels)),
        }
    }

    pub fn is_everything(&self) -> bool { matches!(self, Selector::All(r) if r.is_empty()) }
}

impl std::fmt::Display for Selector {
    /// Canonical rendering; equal selectors render identically.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reqs = match self {
            Selector::Nothing => return f.write_str("<none>"),
            Selector::All(reqs) => reqs,
        };
        for (i, r) in reqs.iter().enumerate() {
            if i > 0 { f.write_str(",")?; }
            let values = r.values.iter().cloned().collect::<Vec<_>>().join(",");
            match r.op {
                Op::In if r.values.len() == 1 => write!(f, "{}={}", r.key, values)?,
                Op::In => write!(f, "{} in ({})", r.key, values)?,
                Op::NotIn if r.values.len() == 1 => write!(f, "{}!={}", r.key, values)?,
                Op::NotIn => write!(f, "{} notin ({})", r.key, values)?,
                Op::Exists => write!(f, "{}", r.key)?,
                Op::DoesNotExist => write!(f, "!{}", r.key)?,
            }
        }
        Ok(())
    }
}

fn requirement(key: &str, op: Op, values: &[String]) -> Result<Requirement, SelectorError> {
    validate_key(key)?;
    match op {
        Op::In | Op::NotIn if values.is_empty() => {
            return Err(SelectorError::MissingValues { key: key.to_string(), op: if op == Op::In { "In" } else { "NotIn" } });
        }
        Op::Exists | Op::DoesNotExist if !values.is_empty() => {
            return Err(SelectorError::UnexpectedValues {
                key: key.to_string(),
                op: if op == Op::Exists { "Exists" } else { "DoesNotExist" },
            });
        }
        _ => {}
    }
    for v in values {
        if !(v.is_empty() || (v.len() <= 63 && NAME_RE.is_match(v))) {
            return Err(SelectorError::InvalidValue { key: key.to_string(), value: v.clone() });
        }
    }
    Ok(Requirement { key: key.to_string(), op, values: values.iter().cloned().collect() })
}

/// Qualified name: optional DNS-subdomain prefix and `/`, then a name of at most 63 chars.
fn validate_key(key: &str) -> Result<(), SelectorError> {
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    let prefix_ok = prefix.map(|p| !p.is_empty() && p.len() <= 253 && DNS_SUBDOMAIN_RE.is_match(p)).unwrap_or(true);
    if !prefix_ok || name.is_empty() || name.len() > 63 || !NAME_RE.is_match(name) {
        return Err(SelectorError::InvalidKey(key.to_string()));
    }
    Ok(())
}
