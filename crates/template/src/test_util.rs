//! Helpers shared by tests across the crate

use crate::{FunctionRegistry, Value};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Build a known-variables set from a list of names
pub(crate) fn known(names: &[&str]) -> HashSet<String> {
    names.iter().map(ToString::to_string).collect()
}

/// Registry used by most tests: just the stock builtins and reserved helpers
pub(crate) fn test_registry() -> FunctionRegistry {
    FunctionRegistry::new()
}

/// Register a `unique` function on the registry that returns a distinct
/// integer per invocation, and hand back the invocation counter. Used to
/// observe how often a function is actually called through the cache.
pub(crate) fn counting_registry(
    registry: FunctionRegistry,
) -> (FunctionRegistry, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&counter);
    let registry = registry.with_function(
        "unique",
        move |arguments: crate::Arguments| {
            arguments.ensure_consumed()?;
            let count = handle.fetch_add(1, Ordering::Relaxed);
            Ok(Value::Int(count as i64))
        },
    );
    (registry, counter)
}
