//! Parse strings with embedded `$variable` references and `${function()}`
//! calls into lazy values, then evaluate them against concrete data. This
//! engine is focused on template resolution and is generally agnostic of its
//! usage in the rest of the app. As such, there is no logic in here relating
//! to HTTP or other httpcase concepts.
//!
//! The lifecycle of a templated string is:
//! 1. [prepare] walks an arbitrary value tree and reifies every templated
//!    string into a [LazyString], validating each variable reference against
//!    a known-variables set as it goes. Preparation is the validation phase:
//!    an unknown reference fails here, not at render time.
//! 2. [resolve_variables] computes a fixed point of a variable mapping whose
//!    values may reference each other.
//! 3. [evaluate] renders a prepared tree against a concrete mapping,
//!    producing output with no lazy nodes left.

mod cereal;
mod display;
mod error;
mod functions;
mod parse;
mod prepare;
mod render;
mod resolve;
#[cfg(test)]
mod test_util;

pub use error::TemplateError;
pub use functions::{
    Arguments, FunctionRegistry, FunctionResult, TemplateFunction,
    TryFromValue,
};
pub use parse::{contains_template, variable_names};
pub use prepare::prepare;
pub use render::{FunctionCache, evaluate, evaluate_now};
pub use resolve::{extract_variable_names, resolve_variables};

use crate::functions::Function;
use derive_more::From;
use indexmap::IndexMap;

/// A runtime template value: either plain data, or a lazy node produced by
/// [prepare] that still carries unresolved references.
///
/// This is very similar to a JSON value, with two extra groups of variants:
/// - [LazyString]/[LazyFunction], which hold parsed-but-unevaluated template
///   content
/// - [TemplatedMap](Value::TemplatedMap), the pair form of a map whose keys
///   themselves contain templates
#[derive(Clone, Debug, From, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    #[from(skip)] // We use a generic impl instead
    Array(Vec<Self>),
    Object(IndexMap<String, Self>),
    LazyString(LazyString),
    LazyFunction(LazyFunction),
    /// A map with at least one templated key. Stored as ordered pairs
    /// because keys can't be deduplicated until after they're evaluated;
    /// evaluation collapses this back into [Value::Object], with the last
    /// occurrence of a duplicate key winning
    #[from(skip)]
    TemplatedMap(Vec<(Self, Self)>),
}

impl Value {
    /// Convert this value to a boolean, according to its truthiness.
    /// Truthiness/falsiness is defined for each type as:
    /// - `null` - `false`
    /// - `bool` - Own value
    /// - `int`/`float` - `false` if zero
    /// - `string` - `false` if empty
    /// - `array`/`object` - `false` if empty
    /// - lazy values - `true`
    pub fn to_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Array(array) => !array.is_empty(),
            Self::Object(object) => !object.is_empty(),
            Self::LazyString(_)
            | Self::LazyFunction(_)
            | Self::TemplatedMap(_) => true,
        }
    }

    /// Is this node itself a lazy value? Does *not* recur into children; use
    /// [Self::contains_lazy] for that.
    pub fn is_lazy(&self) -> bool {
        matches!(
            self,
            Self::LazyString(_) | Self::LazyFunction(_) | Self::TemplatedMap(_)
        )
    }

    /// Does this value tree contain any lazy node? Evaluated output never
    /// does.
    pub fn contains_lazy(&self) -> bool {
        match self {
            Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::String(_) => false,
            Self::Array(array) => array.iter().any(Self::contains_lazy),
            Self::Object(object) => object.values().any(Self::contains_lazy),
            Self::LazyString(_)
            | Self::LazyFunction(_)
            | Self::TemplatedMap(_) => true,
        }
    }

    /// Convert a JSON value to a template value. This is infallible because
    /// [Value] is a superset of JSON.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(number) => {
                if let Some(i) = number.as_i64() {
                    Self::Int(i)
                } else {
                    // Either a float, or an integer too big for i64; both
                    // are best represented as f64
                    Self::Float(number.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(array) => {
                Self::Array(array.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(object) => Self::Object(
                object
                    .into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl<T> From<Vec<T>> for Value
where
    Value: From<T>,
{
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Self::from).collect())
    }
}

impl<K, V> From<Vec<(K, V)>> for Value
where
    String: From<K>,
    Value: From<V>,
{
    fn from(value: Vec<(K, V)>) -> Self {
        Self::Object(
            value
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::from_json(value)
    }
}

/// A parsed templated string: the source text with every variable reference
/// and function call lifted out into an argument slot. The string is parsed
/// during creation, hence the immutability.
///
/// Invariants:
/// - The compiled template contains one placeholder marker per argument
///   slot, and marker positions correspond 1:1 to slots in left-to-right
///   source order
/// - The compiled template contains no remaining `$var` or `${func()}`
///   occurrences
#[derive(Clone, Debug, PartialEq)]
pub struct LazyString {
    /// Original (trimmed) source text. Kept for reference extraction and
    /// re-serialization
    raw: String,
    /// Source text with each variable/function occurrence replaced by
    /// [parse::PLACEHOLDER]
    template: String,
    /// One entry per placeholder, in template order
    args: Vec<TemplateArg>,
    /// Should function calls inside this string consult the shared
    /// function-result cache? Set for config-level values whose generator
    /// calls must produce one value reused across all teststeps
    cached: bool,
}

impl LazyString {
    /// The original source text this template was parsed from
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn cached(&self) -> bool {
        self.cached
    }
}

/// One slot in a [LazyString]: either a deferred variable lookup or a
/// deferred function call
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TemplateArg {
    Variable(String),
    Function(LazyFunction),
}

/// A deferred function call. The callable is resolved at preparation time so
/// unknown function names fail early; the arguments are prepared values that
/// may themselves contain nested lazy strings.
#[derive(Clone, derive_more::Debug)]
pub struct LazyFunction {
    name: String,
    #[debug(skip)]
    function: Function,
    position: Vec<Value>,
    keyword: IndexMap<String, Value>,
}

impl LazyFunction {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The resolved callable is intentionally excluded: two calls are the same
/// if they invoke the same name with the same arguments
impl PartialEq for LazyFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.position == other.position
            && self.keyword == other.keyword
    }
}
