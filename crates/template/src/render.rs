//! Evaluation of prepared value trees against concrete variable mappings

use crate::{
    Arguments, LazyFunction, LazyString, TemplateArg, TemplateError, Value,
    parse::PLACEHOLDER,
};
use indexmap::IndexMap;
use std::{cell::RefCell, collections::HashMap, fmt::Write};
use tracing::trace;

/// Memoized function-call results, keyed by function name plus the canonical
/// representation of its evaluated arguments. One cache spans a single
/// top-level parse invocation.
///
/// Only lazy strings marked `cached` *read* from the cache; every function
/// call writes its result through. This is how a config-level generator call
/// produces one value that every teststep observes.
///
/// Interior mutability via [RefCell] keeps the evaluation call tree simple
/// and makes the cache single-threaded by construction; concurrent parse
/// invocations must each use their own cache.
#[derive(Debug, Default)]
pub struct FunctionCache(RefCell<HashMap<CacheKey, Value>>);

type CacheKey = (String, String, String);

impl FunctionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    fn insert(&self, key: CacheKey, value: Value) {
        self.0.borrow_mut().insert(key, value);
    }
}

/// Canonical cache key for a call with already-evaluated arguments
fn cache_key(
    name: &str,
    position: &[Value],
    keyword: &IndexMap<String, Value>,
) -> CacheKey {
    (
        name.to_owned(),
        format!("{position:?}"),
        format!("{keyword:?}"),
    )
}

/// Walk a prepared value tree and replace every lazy node with its concrete
/// value, looked up from `variables` or computed by calling functions. The
/// output contains no lazy nodes.
///
/// The mapping must already be concrete; resolving a mapping whose values
/// reference each other is [resolve_variables](crate::resolve_variables)'s
/// job.
pub fn evaluate(
    content: &Value,
    variables: &IndexMap<String, Value>,
    cache: &FunctionCache,
) -> Result<Value, TemplateError> {
    match content {
        Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::String(_) => Ok(content.clone()),
        Value::Array(array) => array
            .iter()
            .map(|item| evaluate(item, variables, cache))
            .collect::<Result<_, _>>()
            .map(Value::Array),
        Value::Object(object) => object
            .iter()
            .map(|(key, value)| {
                Ok((key.clone(), evaluate(value, variables, cache)?))
            })
            .collect::<Result<IndexMap<_, _>, _>>()
            .map(Value::Object),
        // Evaluated keys collapse the pair form back into a plain map. A
        // duplicate key keeps the last value, matching how later entries
        // shadow earlier ones in an input document
        Value::TemplatedMap(pairs) => pairs
            .iter()
            .map(|(key, value)| {
                let key = match evaluate(key, variables, cache)? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Ok((key, evaluate(value, variables, cache)?))
            })
            .collect::<Result<IndexMap<_, _>, _>>()
            .map(Value::Object),
        Value::LazyString(lazy) => lazy.render(variables, cache),
        Value::LazyFunction(function) => function.render(variables, cache),
    }
}

/// Prepare and evaluate a value in one step, against an already-concrete
/// mapping. The known-variables set is the mapping's key set. Useful when a
/// value is consumed immediately instead of being stored for later
/// evaluation, e.g. a parameter source template.
pub fn evaluate_now(
    content: Value,
    variables: &IndexMap<String, Value>,
    registry: &crate::FunctionRegistry,
    cache: &FunctionCache,
) -> Result<Value, TemplateError> {
    let known = variables.keys().cloned().collect();
    let prepared = crate::prepare(content, registry, &known, false)?;
    evaluate(&prepared, variables, cache)
}

impl LazyString {
    /// Materialize each argument slot, then substitute into the template.
    /// A template that is exactly one placeholder returns its argument with
    /// the native type preserved (an int stays an int); any surrounding
    /// literal text forces string interpolation.
    pub fn render(
        &self,
        variables: &IndexMap<String, Value>,
        cache: &FunctionCache,
    ) -> Result<Value, TemplateError> {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let value = match arg {
                TemplateArg::Variable(name) => variables
                    .get(name)
                    .cloned()
                    .ok_or_else(|| TemplateError::VariableNotFound {
                        name: name.clone(),
                    })?,
                TemplateArg::Function(function) => {
                    let (position, keyword) =
                        function.evaluate_arguments(variables, cache)?;
                    let key =
                        cache_key(&function.name, &position, &keyword);
                    match self.cached.then(|| cache.get(&key)).flatten() {
                        Some(value) => {
                            trace!(
                                function = %function.name,
                                "Reusing cached function result"
                            );
                            value
                        }
                        None => {
                            let value = function.invoke(position, keyword)?;
                            cache.insert(key, value.clone());
                            value
                        }
                    }
                }
            };
            args.push(value);
        }

        if self.template == "\u{0}" {
            // Single placeholder, no literal text: preserve the native type
            let value = args.pop().unwrap_or(Value::Null);
            return Ok(value);
        }

        // Interpolate: stitch literal segments and stringified arguments
        let mut segments = self.template.split(PLACEHOLDER);
        let mut output = String::with_capacity(self.raw.len());
        output.push_str(segments.next().unwrap_or_default());
        for (arg, segment) in args.iter().zip(segments) {
            write!(output, "{arg}").expect("string write is infallible");
            output.push_str(segment);
        }
        Ok(Value::String(output))
    }
}

impl LazyFunction {
    /// Evaluate this call's prepared arguments against the variable mapping.
    /// Nested `$var` references inside arguments resolve here.
    fn evaluate_arguments(
        &self,
        variables: &IndexMap<String, Value>,
        cache: &FunctionCache,
    ) -> Result<(Vec<Value>, IndexMap<String, Value>), TemplateError> {
        let position = self
            .position
            .iter()
            .map(|value| evaluate(value, variables, cache))
            .collect::<Result<Vec<_>, _>>()?;
        let keyword = self
            .keyword
            .iter()
            .map(|(key, value)| {
                Ok((key.clone(), evaluate(value, variables, cache)?))
            })
            .collect::<Result<IndexMap<_, _>, _>>()?;
        Ok((position, keyword))
    }

    /// Invoke the resolved callable with evaluated arguments. Any error from
    /// the callable is wrapped with the function name for context.
    fn invoke(
        &self,
        position: Vec<Value>,
        keyword: IndexMap<String, Value>,
    ) -> Result<Value, TemplateError> {
        trace!(function = %self.name, "Calling template function");
        self.function
            .call(Arguments::new(position, keyword))
            .map_err(|error| TemplateError::function(self.name.clone(), error))
    }

    /// Evaluate arguments and invoke the call, bypassing the result cache
    pub fn render(
        &self,
        variables: &IndexMap<String, Value>,
        cache: &FunctionCache,
    ) -> Result<Value, TemplateError> {
        let (position, keyword) = self.evaluate_arguments(variables, cache)?;
        self.invoke(position, keyword)
    }
}
