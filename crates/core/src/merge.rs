//! Override/extend rules for composing API definitions, test steps, and
//! nested test cases

use crate::{
    collection::{ApiDefinition, TestCase, TestStep, value_is_empty},
    error::ParseError,
};
use httpcase_template::Value;
use indexmap::IndexMap;

/// Knobs for merge behavior
#[derive(Copy, Clone, Debug, Default)]
pub struct MergeOptions {
    /// When a step references an API definition, deep-merge the API's
    /// request block with the step's (step keys win per key, recursively)
    /// instead of the historical behavior of replacing the step's request
    /// wholesale
    pub deep_merge_request: bool,
}

/// A normalized response assertion
#[derive(Clone, Debug, PartialEq)]
pub struct Validator {
    /// What to check, e.g. `status_code` or a `$variable` reference
    pub check: Value,
    pub comparator: String,
    pub expect: Value,
}

impl Validator {
    const DEFAULT_COMPARATOR: &str = "eq";

    /// Normalize a raw validator. Two shapes are accepted:
    ///
    /// ```yaml
    /// # explicit (comparator defaults to eq; `expected` is a legacy alias)
    /// - {check: status_code, comparator: eq, expect: 201}
    /// # compact: the sole key is the comparator
    /// - {eq: [status_code, 201]}
    /// ```
    ///
    /// Anything else is a [ParseError::Params]. Normalization is idempotent:
    /// parsing an already-normalized validator yields it unchanged.
    pub fn parse(value: &Value) -> Result<Self, ParseError> {
        let invalid =
            || ParseError::params(format!("invalid validator: {value}"));
        let Value::Object(mapping) = value else {
            return Err(invalid());
        };

        if mapping.contains_key("check") && mapping.len() > 1 {
            let check = mapping["check"].clone();
            let expect = mapping
                .get("expect")
                .or_else(|| mapping.get("expected"))
                .cloned()
                .ok_or_else(invalid)?;
            let comparator = match mapping.get("comparator") {
                None => Self::DEFAULT_COMPARATOR.to_owned(),
                Some(Value::String(comparator)) => comparator.clone(),
                Some(other) => other.to_string(),
            };
            Ok(Self {
                check,
                comparator,
                expect,
            })
        } else if mapping.len() == 1 {
            let (comparator, operands) =
                mapping.first().expect("mapping has one entry");
            let Value::Array(operands) = operands else {
                return Err(invalid());
            };
            let [check, expect] = operands.as_slice() else {
                return Err(invalid());
            };
            Ok(Self {
                check: check.clone(),
                comparator: comparator.clone(),
                expect: expect.clone(),
            })
        } else {
            Err(invalid())
        }
    }
}

impl From<Validator> for Value {
    fn from(validator: Validator) -> Self {
        Value::from(vec![
            ("check", validator.check),
            ("comparator", Value::String(validator.comparator)),
            ("expect", validator.expect),
        ])
    }
}

/// Extend a test step with the API definition it references. The step wins
/// on everything it declares itself, except where noted.
pub fn extend_with_api(
    step: &mut TestStep,
    api: ApiDefinition,
    options: MergeOptions,
) -> Result<(), ParseError> {
    // name: step wins; if empty, the API's
    if value_is_empty(&step.name) {
        step.name = api.name;
    }

    // variables & extract: API provides defaults, step overrides per key
    step.variables =
        extend_variables(api.variables, std::mem::take(&mut step.variables));
    step.extract =
        extend_variables(api.extract, std::mem::take(&mut step.extract));

    // validators: normalize both sides, then the step overrides API
    // validators that target the same check
    let api_validators = parse_validators(&api.validate)?;
    let step_validators = parse_validators(&step.validate)?;
    step.validate = extend_validators(api_validators, step_validators)
        .into_iter()
        .map(Value::from)
        .collect();

    // request: the API's request replaces the step's wholesale, unless the
    // deep-merge knob is on
    let api_request = match api.request {
        Value::Null => Value::Object(IndexMap::new()),
        other => other,
    };
    step.request = Some(match (options.deep_merge_request, step.request.take())
    {
        (true, Some(step_request)) => deep_merge(api_request, step_request),
        _ => api_request,
    });

    // base_url & verify: the API wins when it declares them
    if !value_is_empty(&api.base_url) {
        step.base_url = api.base_url;
    }
    if let Some(verify) = api.verify
        && let Some(Value::Object(request)) = &mut step.request
    {
        request.insert("verify".to_owned(), Value::Bool(verify));
    }

    // hooks: API hooks run before step hooks; duplicates keep their first
    // occurrence
    step.setup_hooks = merge_hooks(
        api.setup_hooks,
        std::mem::take(&mut step.setup_hooks),
    );
    step.teardown_hooks = merge_hooks(
        api.teardown_hooks,
        std::mem::take(&mut step.teardown_hooks),
    );

    // any other API fields fill in gaps in the step
    for (key, value) in api.extra {
        step.extra.entry(key).or_insert(value);
    }
    Ok(())
}

/// Extend a test step with the nested test case it references. The step
/// becomes a wrapper around the case: its own fields fold into the case's
/// config.
pub fn extend_with_testcase(step: TestStep, mut nested: TestCase) -> TestCase {
    let TestStep {
        name,
        variables,
        extract,
        validate,
        setup_hooks,
        teardown_hooks,
        base_url,
        request,
        extra,
        ..
    } = step;
    let config = &mut nested.config;

    // step values override the nested case's config defaults
    config.variables =
        extend_variables(std::mem::take(&mut config.variables), variables);

    // the nested case's own base URL wins; else inherit the step's
    if value_is_empty(&config.base_url) {
        config.base_url = base_url;
    }

    // name: step's, else the nested config's, else a placeholder
    let nested_name = std::mem::take(&mut config.name);
    config.name = [name, nested_name]
        .into_iter()
        .find(|name| !value_is_empty(name))
        .unwrap_or_else(|| Value::from("Undefined name"));

    // remaining step fields land on the config so nothing is dropped
    for (key, value) in extra {
        config.extra.insert(key, value);
    }
    if !extract.is_empty() {
        config
            .extra
            .insert("extract".to_owned(), Value::Object(extract));
    }
    if !validate.is_empty() {
        config
            .extra
            .insert("validate".to_owned(), Value::Array(validate));
    }
    if !setup_hooks.is_empty() {
        config
            .extra
            .insert("setup_hooks".to_owned(), Value::Array(setup_hooks));
    }
    if !teardown_hooks.is_empty() {
        config
            .extra
            .insert("teardown_hooks".to_owned(), Value::Array(teardown_hooks));
    }
    if let Some(request) = request {
        config.extra.insert("request".to_owned(), request);
    }

    nested
}

/// Merge two variable mappings: every key of `overrides` wins over the same
/// key in `base`; `base` keys keep their original order
pub(crate) fn extend_variables(
    mut base: IndexMap<String, Value>,
    overrides: IndexMap<String, Value>,
) -> IndexMap<String, Value> {
    base.extend(overrides);
    base
}

/// Normalize a raw validator list
pub(crate) fn parse_validators(
    validators: &[Value],
) -> Result<Vec<Validator>, ParseError> {
    validators.iter().map(Validator::parse).collect()
}

/// Concatenate validator lists, dropping `base` validators whose check is
/// also targeted by an `overrides` validator (the override wins). Base
/// validators keep their position.
fn extend_validators(
    base: Vec<Validator>,
    overrides: Vec<Validator>,
) -> Vec<Validator> {
    let mut merged: IndexMap<String, Validator> = base
        .into_iter()
        .map(|validator| (format!("{:?}", validator.check), validator))
        .collect();
    for validator in overrides {
        merged.insert(format!("{:?}", validator.check), validator);
    }
    merged.into_values().collect()
}

/// Combine hook lists, keeping declaration order (`first` before `second`)
/// and dropping duplicates
fn merge_hooks(first: Vec<Value>, second: Vec<Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(first.len() + second.len());
    for hook in first.into_iter().chain(second) {
        if !merged.contains(&hook) {
            merged.push(hook);
        }
    }
    merged
}

/// Recursively merge two values: maps merge key-by-key with `overrides`
/// winning, anything else is replaced by `overrides`
fn deep_merge(base: Value, overrides: Value) -> Value {
    match (base, overrides) {
        (Value::Object(mut base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                let merged = match base.get(&key) {
                    Some(existing) => deep_merge(existing.clone(), value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overrides) => overrides,
    }
}
