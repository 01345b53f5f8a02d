//! Conversion of raw value trees into lazy templates.
//!
//! Preparation is the validation phase: every variable reference is checked
//! against the declared known-variables set here, so an undefined reference
//! fails before any evaluation starts.

use crate::{
    LazyFunction, LazyString, TemplateArg, TemplateError, Value,
    functions::{FunctionKind, FunctionRegistry},
    parse::{self, PLACEHOLDER},
};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::trace;

/// Walk an arbitrary value tree and reify every string containing template
/// syntax into a lazy value. Everything else passes through untouched.
///
/// - `known_variables` is the set of variable names in scope; referencing
///   anything else is a [TemplateError::VariableNotFound]
/// - `cached` marks the produced lazy strings so their function calls consult
///   the shared function-result cache at evaluation time
///
/// Map keys are prepared as well as map values; a map with at least one
/// templated key switches to the ordered-pair representation
/// ([Value::TemplatedMap]) so the keys can be deduplicated after evaluation.
pub fn prepare(
    content: Value,
    registry: &FunctionRegistry,
    known_variables: &HashSet<String>,
    cached: bool,
) -> Result<Value, TemplateError> {
    match content {
        Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        // Already-lazy values pass through so preparation is idempotent
        | Value::LazyString(_)
        | Value::LazyFunction(_)
        | Value::TemplatedMap(_) => Ok(content),
        Value::Array(array) => array
            .into_iter()
            .map(|item| prepare(item, registry, known_variables, cached))
            .collect::<Result<_, _>>()
            .map(Value::Array),
        Value::Object(object) => {
            let mut pairs = Vec::with_capacity(object.len());
            let mut any_templated_key = false;
            for (key, value) in object {
                let key =
                    prepare(key.into(), registry, known_variables, cached)?;
                any_templated_key |= key.is_lazy();
                let value =
                    prepare(value, registry, known_variables, cached)?;
                pairs.push((key, value));
            }
            if any_templated_key {
                Ok(Value::TemplatedMap(pairs))
            } else {
                Ok(Value::Object(
                    pairs
                        .into_iter()
                        .map(|(key, value)| match key {
                            Value::String(key) => (key, value),
                            // A prepared string is either unchanged or lazy,
                            // and lazy keys took the branch above
                            _ => unreachable!("key must be a string"),
                        })
                        .collect(),
                ))
            }
        }
        Value::String(s) => {
            if !parse::contains_template(&s) {
                // No template syntax; skip the lazy wrapper entirely
                return Ok(Value::String(s));
            }
            trace!(raw = %s, "Parsing templated string");
            LazyString::parse(s.trim(), registry, known_variables, cached)
                .map(Value::LazyString)
        }
    }
}

impl LazyString {
    /// Parse a string known to contain template syntax. Function calls are
    /// scanned first so that `$var` references inside their argument lists
    /// stay attached to the call rather than becoming slots of the outer
    /// template.
    pub(crate) fn parse(
        raw: &str,
        registry: &FunctionRegistry,
        known_variables: &HashSet<String>,
        cached: bool,
    ) -> Result<Self, TemplateError> {
        let functions = parse::find_functions(raw);
        // A variable reference inside a function's span belongs to that
        // call's argument list, which is prepared separately below
        let variables: Vec<_> = parse::find_variables(raw)
            .into_iter()
            .filter(|variable| {
                !functions.iter().any(|function| {
                    function.start <= variable.start
                        && variable.end <= function.end
                })
            })
            .collect();

        for variable in &variables {
            if !known_variables.contains(variable.name) {
                return Err(TemplateError::VariableNotFound {
                    name: variable.name.to_owned(),
                });
            }
        }

        // Collect every occurrence with its span, then lay them out in
        // left-to-right order
        let mut spans: Vec<(usize, usize, TemplateArg)> = Vec::new();
        for function in &functions {
            let lazy = LazyFunction::parse(
                function.name,
                function.arguments,
                registry,
                known_variables,
            )?;
            spans.push((function.start, function.end, TemplateArg::Function(lazy)));
        }
        for variable in variables {
            spans.push((
                variable.start,
                variable.end,
                TemplateArg::Variable(variable.name.to_owned()),
            ));
        }
        spans.sort_by_key(|(start, ..)| *start);

        // Rebuild the string with each occurrence collapsed to a placeholder
        let mut template = String::with_capacity(raw.len());
        let mut args = Vec::with_capacity(spans.len());
        let mut cursor = 0;
        for (start, end, arg) in spans {
            template.push_str(&raw[cursor..start]);
            template.push(PLACEHOLDER);
            args.push(arg);
            cursor = end;
        }
        template.push_str(&raw[cursor..]);

        Ok(Self {
            raw: raw.to_owned(),
            template,
            args,
            cached,
        })
    }
}

impl LazyFunction {
    /// Parse a function occurrence: resolve the name against the registry,
    /// split and prepare the arguments. The reserved helpers' arity rule is
    /// enforced here, at preparation time.
    pub(crate) fn parse(
        name: &str,
        raw_arguments: &str,
        registry: &FunctionRegistry,
        known_variables: &HashSet<String>,
    ) -> Result<Self, TemplateError> {
        let function = registry.get(name)?;
        let (position, keyword) = parse::parse_arguments(raw_arguments);
        // Argument values may contain their own `$var` references, which get
        // reified here with the same known set. Nested argument templates
        // never cache.
        let position = position
            .into_iter()
            .map(|value| prepare(value, registry, known_variables, false))
            .collect::<Result<Vec<_>, _>>()?;
        let keyword = keyword
            .into_iter()
            .map(|(key, value)| {
                Ok((key, prepare(value, registry, known_variables, false)?))
            })
            .collect::<Result<IndexMap<_, _>, _>>()?;

        if matches!(
            function.kind(),
            FunctionKind::Parameterize | FunctionKind::Environ
        ) && (position.len() != 1 || !keyword.is_empty())
        {
            return Err(TemplateError::params(format!(
                "`{name}` takes exactly one positional argument"
            )));
        }

        Ok(Self {
            name: name.to_owned(),
            function,
            position,
            keyword,
        })
    }
}
