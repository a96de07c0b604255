use serde_json::{Map, Value};

use super::expression::{normalize_key, Expression};
use crate::pipeline::context::RunContext;

/// Why an expression could not be resolved to a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Unparsable,
    UnknownIdentifier(String),
    MissingKey(String),
    NotAMapping(String),
    Null,
}

impl std::fmt::Display for Unresolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unparsable => f.write_str("unparsable expression"),
            Self::UnknownIdentifier(name) => write!(f, "unknown identifier '{name}'"),
            Self::MissingKey(key) => write!(f, "missing key '{key}'"),
            Self::NotAMapping(key) => write!(f, "cannot index a non-mapping value with '{key}'"),
            Self::Null => f.write_str("value is null"),
        }
    }
}

/// Expression text → structured value.
pub trait Resolve {
    fn resolve(&self, expression: &str) -> Result<Value, Unresolved>;
}

/// Resolves against a frozen [`RunContext::snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotResolver {
    root: Value,
}

impl SnapshotResolver {
    pub fn new(snapshot: Value) -> Self {
        Self { root: snapshot }
    }

    pub fn from_context(ctx: &RunContext) -> Self {
        Self::new(ctx.snapshot())
    }
}

/// Exact key first, then normalized comparison.
fn find_key<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).or_else(|| {
        let wanted = normalize_key(key);
        object
            .iter()
            .find(|(candidate, _)| normalize_key(candidate) == wanted)
            .map(|(_, value)| value)
    })
}

impl Resolve for SnapshotResolver {
    fn resolve(&self, expression: &str) -> Result<Value, Unresolved> {
        let expr = Expression::parse(expression).ok_or(Unresolved::Unparsable)?;

        let mut current = self
            .root
            .as_object()
            .and_then(|root| find_key(root, &expr.identifier))
            .ok_or_else(|| Unresolved::UnknownIdentifier(expr.identifier.clone()))?;

        for key in &expr.path {
            let object = current
                .as_object()
                .ok_or_else(|| Unresolved::NotAMapping(key.clone()))?;
            current = find_key(object, key).ok_or_else(|| Unresolved::MissingKey(key.clone()))?;
        }

        if current.is_null() {
            Err(Unresolved::Null)
        } else {
            Ok(current.clone())
        }
    }
}
