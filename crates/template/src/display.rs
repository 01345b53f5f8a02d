//! Value and lazy-node stringification
//!
//! [Display] here defines how values look when they're interpolated into the
//! literal text of a template: scalars render plainly (no quotes), while
//! containers render JSON-style with single-quoted strings. Lazy nodes
//! render as their original source text.

use crate::{LazyFunction, LazyString, Value};
use itertools::Itertools;
use std::fmt::{self, Display};

pub(crate) const NULL: &str = "null";
pub(crate) const TRUE: &str = "true";
pub(crate) const FALSE: &str = "false";

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "{NULL}"),
            Self::Bool(false) => write!(f, "{FALSE}"),
            Self::Bool(true) => write!(f, "{TRUE}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(float) => write!(f, "{float}"),
            // Top-level strings are bare; strings inside containers get
            // quoted by the Quoted wrapper below
            Self::String(s) => write!(f, "{s}"),
            Self::Array(array) => {
                write!(f, "[{}]", array.iter().map(Quoted).format(", "))
            }
            Self::Object(object) => write!(
                f,
                "{{{}}}",
                object
                    .iter()
                    .format_with(", ", |(key, value), f| f(&format_args!(
                        "'{key}': {}",
                        Quoted(value)
                    )))
            ),
            Self::LazyString(lazy) => write!(f, "{lazy}"),
            Self::LazyFunction(function) => write!(f, "{function}"),
            Self::TemplatedMap(pairs) => write!(
                f,
                "{{{}}}",
                pairs.iter().format_with(", ", |(key, value), f| f(
                    &format_args!("'{key}': {}", Quoted(value))
                ))
            ),
        }
    }
}

/// Wrapper that quotes string values, for rendering values nested inside a
/// container
struct Quoted<'a>(&'a Value);

impl Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Value::String(s) => write!(f, "'{s}'"),
            other => write!(f, "{other}"),
        }
    }
}

/// A lazy string stringifies back to its source text
impl Display for LazyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// A lazy function stringifies back to template call syntax
impl Display for LazyFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${{{name}({arguments})}}",
            name = self.name,
            arguments = self
                .position
                .iter()
                .map(|value| Quoted(value).to_string())
                .chain(
                    self.keyword.iter().map(|(key, value)| format!(
                        "{key}={}",
                        Quoted(value)
                    ))
                )
                .format(", ")
        )
    }
}
