//! Function registry and the calling convention for template functions

use crate::{TemplateError, Value};
use indexmap::IndexMap;
use itertools::Itertools;
use std::{collections::VecDeque, env, sync::Arc};

/// Outcome of a template function call
pub type FunctionResult = Result<Value, TemplateError>;

/// A callable that can be invoked from a template. Implemented for any
/// matching closure, so plain `fn` items work directly.
///
/// Implementors should pull their arguments out of the [Arguments] container
/// with [pop_position](Arguments::pop_position) /
/// [pop_keyword](Arguments::pop_keyword), then call
/// [ensure_consumed](Arguments::ensure_consumed) so extra arguments passed by
/// the user are rejected rather than silently dropped.
pub trait TemplateFunction: Send + Sync {
    fn call(&self, arguments: Arguments) -> FunctionResult;
}

impl<F> TemplateFunction for F
where
    F: Fn(Arguments) -> FunctionResult + Send + Sync,
{
    fn call(&self, arguments: Arguments) -> FunctionResult {
        self(arguments)
    }
}

/// A function resolved from the registry: the callable plus which lookup
/// tier it came from. The tier matters because the reserved helpers have
/// extra argument rules enforced at preparation time.
#[derive(Clone, derive_more::Debug)]
pub struct Function {
    kind: FunctionKind,
    #[debug(skip)]
    implementation: Arc<dyn TemplateFunction>,
}

impl Function {
    pub(crate) fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub(crate) fn call(&self, arguments: Arguments) -> FunctionResult {
        self.implementation.call(arguments)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum FunctionKind {
    /// Project-defined function, takes precedence over everything else
    User,
    /// Reserved `parameterize`/`P` helper: loads a list of row mappings from
    /// a named data file
    Parameterize,
    /// Reserved `environ`/`ENV` helper: reads an environment variable
    Environ,
    /// Stock helper shipped with the engine
    Builtin,
}

/// Name-to-callable mapping used to resolve `${function()}` calls.
///
/// Lookup order, first hit wins:
/// 1. User-registered functions
/// 2. The reserved names `parameterize`/`P` and `environ`/`ENV`
/// 3. The stock builtin helpers
///
/// Anything else is a [TemplateError::FunctionNotFound]. The registry is
/// read-only during a parse; build it up front.
#[derive(Clone)]
pub struct FunctionRegistry {
    user: IndexMap<String, Arc<dyn TemplateFunction>>,
    builtin: IndexMap<String, Arc<dyn TemplateFunction>>,
    parameterize: Arc<dyn TemplateFunction>,
    environ: Arc<dyn TemplateFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            user: IndexMap::new(),
            builtin: builtins(),
            // There is no sensible default source for data files; the host
            // has to inject one
            parameterize: Arc::new(|_: Arguments| -> FunctionResult {
                Err(TemplateError::params(
                    "no data file provider is configured",
                ))
            }),
            environ: Arc::new(
                default_environ as fn(Arguments) -> FunctionResult,
            ),
        }
    }

    /// Register a user function. User functions shadow builtins and the
    /// reserved helpers.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        function: impl TemplateFunction + 'static,
    ) {
        self.user.insert(name.into(), Arc::new(function));
    }

    /// Builder-style [Self::register]
    pub fn with_function(
        mut self,
        name: impl Into<String>,
        function: impl TemplateFunction + 'static,
    ) -> Self {
        self.register(name, function);
        self
    }

    /// Install the provider backing `parameterize`/`P`. The provider
    /// receives the data file name and must return a list of row mappings.
    pub fn with_data_provider(
        mut self,
        provider: impl Fn(&str) -> FunctionResult + Send + Sync + 'static,
    ) -> Self {
        self.parameterize = Arc::new(move |mut arguments: Arguments| {
            let path: String = arguments.pop_position()?;
            arguments.ensure_consumed()?;
            provider(&path)
        });
        self
    }

    /// Install the getter backing `environ`/`ENV`. The default reads the
    /// process environment.
    pub fn with_environ(
        mut self,
        getter: impl Fn(&str) -> Result<String, TemplateError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.environ = Arc::new(move |mut arguments: Arguments| {
            let name: String = arguments.pop_position()?;
            arguments.ensure_consumed()?;
            getter(&name).map(Value::String)
        });
        self
    }

    /// Resolve a function name to its callable
    pub(crate) fn get(&self, name: &str) -> Result<Function, TemplateError> {
        let (kind, implementation) = if let Some(function) = self.user.get(name)
        {
            (FunctionKind::User, function)
        } else if matches!(name, "parameterize" | "P") {
            (FunctionKind::Parameterize, &self.parameterize)
        } else if matches!(name, "environ" | "ENV") {
            (FunctionKind::Environ, &self.environ)
        } else if let Some(function) = self.builtin.get(name) {
            (FunctionKind::Builtin, function)
        } else {
            return Err(TemplateError::FunctionNotFound {
                name: name.to_owned(),
            });
        };
        Ok(Function {
            kind,
            implementation: Arc::clone(implementation),
        })
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments passed to a function call
///
/// This container holds the evaluated positional and keyword arguments of a
/// call. All given arguments are expected to be used, and
/// [ensure_consumed](Self::ensure_consumed) should be called after extracting
/// arguments to ensure no additional ones were passed.
#[derive(Debug)]
pub struct Arguments {
    /// Positional arguments. This queue is drained from the front as
    /// arguments are converted
    position: VecDeque<Value>,
    /// Number of positional arguments popped off so far. Used to provide
    /// better error messages
    num_popped: usize,
    /// Keyword arguments. All keyword arguments are optional. Ordering has
    /// no impact on semantics, but an `IndexMap` keeps error messages in the
    /// order the user passed
    keyword: IndexMap<String, Value>,
}

impl Arguments {
    pub fn new(
        position: impl IntoIterator<Item = Value>,
        keyword: IndexMap<String, Value>,
    ) -> Self {
        Self {
            position: position.into_iter().collect(),
            num_popped: 0,
            keyword,
        }
    }

    /// Pop the next positional argument off the front of the queue and
    /// convert it to type `T` using its [TryFromValue] implementation.
    /// Return an error if there are no positional arguments left or the
    /// conversion fails.
    pub fn pop_position<T: TryFromValue>(
        &mut self,
    ) -> Result<T, TemplateError> {
        let value = self.position.pop_front().ok_or_else(|| {
            TemplateError::params("not enough arguments")
        })?;
        let index = self.num_popped;
        self.num_popped += 1;
        T::try_from_value(value).map_err(|error| {
            TemplateError::params(format!("argument {index}: {error}"))
        })
    }

    /// Pop the next positional argument without conversion, or `None` if the
    /// queue is empty. Useful for variadic functions.
    pub fn next_position(&mut self) -> Option<Value> {
        let value = self.position.pop_front();
        if value.is_some() {
            self.num_popped += 1;
        }
        value
    }

    /// Remove a keyword argument from the argument set, converting it to
    /// type `T`. A missing keyword argument falls back to `T::default()`.
    pub fn pop_keyword<T: Default + TryFromValue>(
        &mut self,
        name: &str,
    ) -> Result<T, TemplateError> {
        match self.keyword.shift_remove(name) {
            Some(value) => T::try_from_value(value).map_err(|error| {
                TemplateError::params(format!("argument `{name}`: {error}"))
            }),
            None => Ok(T::default()),
        }
    }

    /// Ensure that all positional and keyword arguments have been consumed.
    /// Return an error if any arguments were passed by the user but not
    /// consumed by the function implementation.
    pub fn ensure_consumed(self) -> Result<(), TemplateError> {
        if self.position.is_empty() && self.keyword.is_empty() {
            Ok(())
        } else {
            Err(TemplateError::params(format!(
                "unexpected arguments: {}",
                self.position
                    .iter()
                    .map(ToString::to_string)
                    .chain(
                        self.keyword
                            .iter()
                            .map(|(key, value)| format!("{key}={value}"))
                    )
                    .join(", ")
            )))
        }
    }
}

/// Convert [Value] to a type fallibly
///
/// This is used for converting function arguments to the static types
/// expected by the function implementations.
pub trait TryFromValue: Sized {
    fn try_from_value(value: Value) -> Result<Self, TemplateError>;
}

impl TryFromValue for Value {
    fn try_from_value(value: Value) -> Result<Self, TemplateError> {
        Ok(value)
    }
}

impl TryFromValue for bool {
    fn try_from_value(value: Value) -> Result<Self, TemplateError> {
        Ok(value.to_bool())
    }
}

impl TryFromValue for i64 {
    fn try_from_value(value: Value) -> Result<Self, TemplateError> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(TemplateError::params(format!(
                "expected integer, got `{other}`"
            ))),
        }
    }
}

impl TryFromValue for f64 {
    fn try_from_value(value: Value) -> Result<Self, TemplateError> {
        match value {
            Value::Int(i) => Ok(i as f64),
            Value::Float(f) => Ok(f),
            other => Err(TemplateError::params(format!(
                "expected number, got `{other}`"
            ))),
        }
    }
}

/// Stringification never fails; anything can be rendered with its [Display]
/// form
impl TryFromValue for String {
    fn try_from_value(value: Value) -> Result<Self, TemplateError> {
        match value {
            Value::String(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }
}

impl<T: TryFromValue> TryFromValue for Option<T> {
    fn try_from_value(value: Value) -> Result<Self, TemplateError> {
        if let Value::Null = value {
            Ok(None)
        } else {
            T::try_from_value(value).map(Some)
        }
    }
}

impl<T: TryFromValue> TryFromValue for Vec<T> {
    fn try_from_value(value: Value) -> Result<Self, TemplateError> {
        if let Value::Array(array) = value {
            array.into_iter().map(T::try_from_value).collect()
        } else {
            Err(TemplateError::params(format!(
                "expected list, got `{value}`"
            )))
        }
    }
}

/// Stock helpers available in every registry
fn builtins() -> IndexMap<String, Arc<dyn TemplateFunction>> {
    fn entry(
        name: &str,
        function: fn(Arguments) -> FunctionResult,
    ) -> (String, Arc<dyn TemplateFunction>) {
        (name.to_owned(), Arc::new(function))
    }

    IndexMap::from_iter([
        entry("string", string),
        entry("integer", integer),
        entry("float", float),
        entry("boolean", boolean),
        entry("concat", concat),
        entry("trim", trim),
        entry("length", length),
        entry("add", add),
    ])
}

/// `environ`/`ENV` default implementation: read the process environment
fn default_environ(mut arguments: Arguments) -> FunctionResult {
    let name: String = arguments.pop_position()?;
    arguments.ensure_consumed()?;
    env::var(&name)
        .map(Value::String)
        .map_err(|error| TemplateError::function(format!("environ({name})"), error))
}

/// Render any value to its string form
fn string(mut arguments: Arguments) -> FunctionResult {
    let value: String = arguments.pop_position()?;
    arguments.ensure_consumed()?;
    Ok(Value::String(value))
}

/// Convert to an integer: ints pass through, floats truncate, strings parse
fn integer(mut arguments: Arguments) -> FunctionResult {
    let value: Value = arguments.pop_position()?;
    arguments.ensure_consumed()?;
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Float(f) => Ok(Value::Int(f as i64)),
        Value::String(s) => s.trim().parse::<i64>().map(Value::Int).map_err(
            |_| {
                TemplateError::params(format!("cannot convert `{s}` to integer"))
            },
        ),
        other => Err(TemplateError::params(format!(
            "cannot convert `{other}` to integer"
        ))),
    }
}

/// Convert to a float: numbers widen, strings parse
fn float(mut arguments: Arguments) -> FunctionResult {
    let value: Value = arguments.pop_position()?;
    arguments.ensure_consumed()?;
    match value {
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Float(f) => Ok(Value::Float(f)),
        Value::String(s) => s.trim().parse::<f64>().map(Value::Float).map_err(
            |_| TemplateError::params(format!("cannot convert `{s}` to float")),
        ),
        other => Err(TemplateError::params(format!(
            "cannot convert `{other}` to float"
        ))),
    }
}

/// Truthiness of any value
fn boolean(mut arguments: Arguments) -> FunctionResult {
    let value: bool = arguments.pop_position()?;
    arguments.ensure_consumed()?;
    Ok(Value::Bool(value))
}

/// Concatenate all arguments into one string
fn concat(mut arguments: Arguments) -> FunctionResult {
    let mut output = String::new();
    while let Some(value) = arguments.next_position() {
        output.push_str(&String::try_from_value(value)?);
    }
    arguments.ensure_consumed()?;
    Ok(Value::String(output))
}

/// Trim surrounding whitespace from a string
fn trim(mut arguments: Arguments) -> FunctionResult {
    let value: String = arguments.pop_position()?;
    arguments.ensure_consumed()?;
    Ok(Value::String(value.trim().to_owned()))
}

/// Element count of a list/map, or character count of a string
fn length(mut arguments: Arguments) -> FunctionResult {
    let value: Value = arguments.pop_position()?;
    arguments.ensure_consumed()?;
    let length = match &value {
        Value::String(s) => s.chars().count(),
        Value::Array(array) => array.len(),
        Value::Object(object) => object.len(),
        other => {
            return Err(TemplateError::params(format!(
                "`{other}` has no length"
            )));
        }
    };
    Ok(Value::Int(length as i64))
}

/// Add two numbers. Integer if both inputs are integers, float otherwise.
fn add(mut arguments: Arguments) -> FunctionResult {
    let a: Value = arguments.pop_position()?;
    let b: Value = arguments.pop_position()?;
    arguments.ensure_consumed()?;
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (a, b) => {
            let a = f64::try_from_value(a)?;
            let b = f64::try_from_value(b)?;
            Ok(Value::Float(a + b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpcase_util::assert_err;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn call(
        registry: &FunctionRegistry,
        name: &str,
        position: Vec<Value>,
    ) -> FunctionResult {
        registry
            .get(name)?
            .call(Arguments::new(position, IndexMap::new()))
    }

    /// User functions shadow builtins of the same name
    #[test]
    fn test_lookup_order() {
        let registry = FunctionRegistry::new()
            .with_function("trim", |mut arguments: Arguments| {
                let _: Value = arguments.pop_position()?;
                arguments.ensure_consumed()?;
                Ok(Value::String("shadowed".into()))
            });
        assert_eq!(
            call(&registry, "trim", vec![" x ".into()]).unwrap(),
            Value::String("shadowed".into())
        );
        // The stock builtin is still reachable in a fresh registry
        assert_eq!(
            call(&FunctionRegistry::new(), "trim", vec![" x ".into()])
                .unwrap(),
            Value::String("x".into())
        );
    }

    #[test]
    fn test_unknown_function() {
        assert_err!(
            FunctionRegistry::new().get("nope"),
            "function `nope` is not found"
        );
    }

    /// The reserved names resolve with and without their aliases
    #[rstest]
    #[case::parameterize("parameterize")]
    #[case::parameterize_alias("P")]
    #[case::environ("environ")]
    #[case::environ_alias("ENV")]
    fn test_reserved_names(#[case] name: &str) {
        assert!(FunctionRegistry::new().get(name).is_ok());
    }

    /// The data provider closure receives the file name argument
    #[test]
    fn test_data_provider() {
        let registry =
            FunctionRegistry::new().with_data_provider(|path| {
                assert_eq!(path, "accounts.csv");
                Ok(vec![Value::from(vec![("user", Value::from("u1"))])].into())
            });
        let rows =
            call(&registry, "parameterize", vec!["accounts.csv".into()])
                .unwrap();
        assert_eq!(
            rows,
            Value::Array(vec![Value::from(vec![("user", Value::from("u1"))])])
        );
    }

    /// Without an injected provider, `parameterize` fails loudly
    #[test]
    fn test_data_provider_missing() {
        assert_err!(
            call(
                &FunctionRegistry::new(),
                "parameterize",
                vec!["accounts.csv".into()]
            ),
            "no data file provider is configured"
        );
    }

    #[rstest]
    #[case::string("string", vec![Value::Int(42)], Value::from("42"))]
    #[case::integer("integer", vec![Value::from("12")], Value::Int(12))]
    #[case::integer_truncates("integer", vec![Value::Float(3.9)], Value::Int(3))]
    #[case::float("float", vec![Value::Int(2)], Value::Float(2.0))]
    #[case::boolean_empty("boolean", vec![Value::from("")], Value::Bool(false))]
    #[case::boolean_nonzero("boolean", vec![Value::Int(7)], Value::Bool(true))]
    #[case::concat(
        "concat",
        vec!["ab".into(), "cd".into(), Value::Int(1)],
        Value::from("abcd1")
    )]
    #[case::trim("trim", vec!["  hi  ".into()], Value::from("hi"))]
    #[case::length_string("length", vec!["hello".into()], Value::Int(5))]
    #[case::length_array(
        "length",
        vec![Value::Array(vec![Value::Int(1), Value::Int(2)])],
        Value::Int(2)
    )]
    #[case::add_int("add", vec![Value::Int(2), Value::Int(3)], Value::Int(5))]
    #[case::add_float(
        "add",
        vec![Value::Int(2), Value::Float(0.5)],
        Value::Float(2.5)
    )]
    fn test_builtins(
        #[case] name: &str,
        #[case] position: Vec<Value>,
        #[case] expected: Value,
    ) {
        let registry = FunctionRegistry::new();
        assert_eq!(call(&registry, name, position).unwrap(), expected);
    }

    /// Unconsumed arguments are an error, not silently dropped
    #[test]
    fn test_extra_arguments() {
        assert_err!(
            call(
                &FunctionRegistry::new(),
                "trim",
                vec!["a".into(), "b".into()]
            ),
            "unexpected arguments: b"
        );
    }

    #[test]
    fn test_missing_argument() {
        assert_err!(
            call(&FunctionRegistry::new(), "add", vec![Value::Int(1)]),
            "not enough arguments"
        );
    }

    #[test]
    fn test_argument_type_error() {
        assert_err!(
            call(
                &FunctionRegistry::new(),
                "add",
                vec![Value::from("x"), Value::Int(1)]
            ),
            "expected number"
        );
    }
}
