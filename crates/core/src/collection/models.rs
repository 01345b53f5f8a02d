//! The plain data types that make up a test document
//!
//! The same model types describe the document through its whole life: fields
//! start out as concrete values straight from deserialization, preparation
//! swaps templated strings for lazy values in place, and the driver finally
//! evaluates config-level fields to concrete output. Unknown fields are
//! never dropped; they ride along in the flattened `extra` maps.

use crate::collection::cereal;
use httpcase_template::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The full input document: project info plus every test bucket. This is the
/// primary unit the driver consumes. All nested values are plain data at
/// this point; no templates have been parsed yet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestDocument {
    pub project_mapping: ProjectMapping,
    pub testsuites: Vec<TestSuite>,
    pub testcases: Vec<TestCase>,
    pub apis: Vec<ApiDefinition>,
}

/// Project-level data shared by every test in the document. `variables`
/// override same-named config variables everywhere; everything else is
/// carried through to the output untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMapping {
    #[serde(deserialize_with = "cereal::flexible_mapping")]
    pub variables: IndexMap<String, Value>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// A config plus a map of named test cases, possibly with parameter
/// matrices
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSuite {
    pub config: Config,
    pub testcases: IndexMap<String, SuiteEntry>,
}

/// One test case referenced from a suite, with suite-level overrides
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteEntry {
    /// Source path of the referenced test case file. Carried into the
    /// resolved config so reports can point back at the file.
    pub testcase: Option<String>,
    pub weight: Option<u64>,
    #[serde(deserialize_with = "cereal::flexible_mapping")]
    pub variables: IndexMap<String, Value>,
    /// Ordered parameter sources; expansion produces one case per row of
    /// their cartesian product
    #[serde(deserialize_with = "cereal::flexible_mapping")]
    pub parameters: IndexMap<String, Value>,
    /// The full definition of the referenced case, inlined by the loader
    pub testcase_def: TestCase,
}

/// A config plus an ordered list of teststeps, executed in order sharing a
/// session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCase {
    pub config: Config,
    pub teststeps: Vec<TestStep>,
}

/// Test case level settings: naming, connection defaults, and the shared
/// variable scope
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub name: Value,
    pub base_url: Value,
    /// TLS certificate verification for every request in the case.
    /// `None` means inherit (ultimately defaulting to `true`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    #[serde(deserialize_with = "cereal::flexible_mapping")]
    pub variables: IndexMap<String, Value>,
    /// Relative execution weight, for load-style runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u64>,
    /// Source path of the case definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// One HTTP call plus its pre/post logic. In the input document a step may
/// reference an API definition (`api_def`) or a whole nested test case
/// (`testcase_def`); the driver merges those in and the references never
/// appear in output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestStep {
    pub name: Value,
    #[serde(deserialize_with = "cereal::flexible_mapping")]
    pub variables: IndexMap<String, Value>,
    /// Values extracted from this step's response, available as variables to
    /// this and all later steps
    #[serde(deserialize_with = "cereal::flexible_mapping")]
    pub extract: IndexMap<String, Value>,
    /// Response assertions. Raw in input (two accepted shapes); the driver
    /// normalizes every entry to `{check, comparator, expect}`
    pub validate: Vec<Value>,
    pub setup_hooks: Vec<Value>,
    pub teardown_hooks: Vec<Value>,
    pub base_url: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_def: Option<ApiDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub testcase_def: Option<Box<TestCase>>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Reusable specification of an HTTP request plus default validators and
/// hooks, referenced by test steps
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiDefinition {
    pub name: Value,
    #[serde(deserialize_with = "cereal::flexible_mapping")]
    pub variables: IndexMap<String, Value>,
    pub request: Value,
    pub validate: Vec<Value>,
    #[serde(deserialize_with = "cereal::flexible_mapping")]
    pub extract: IndexMap<String, Value>,
    pub setup_hooks: Vec<Value>,
    pub teardown_hooks: Vec<Value>,
    pub base_url: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// The driver's output: the untouched project info plus a flat list of
/// resolved test cases
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ParsedTests {
    pub project_mapping: ProjectMapping,
    pub testcases: Vec<ParsedTestCase>,
}

/// A test case after resolution. The config is fully concrete (name,
/// base_url, verify, variables). Steps are still partially lazy: step-level
/// variables and requests remain as lazy values to be materialized at
/// execution time by the HTTP runner, which supplies the `request` and
/// `response` variables.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ParsedTestCase {
    pub config: Config,
    pub teststeps: Vec<Step>,
}

/// A resolved teststep: either a plain HTTP step, or a whole nested test
/// case expanded from a reference
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Step {
    Request(TestStep),
    TestCase(ParsedTestCase),
}

/// Is this value "unset" for override purposes? Absent fields deserialize
/// to `Null`, and an empty name/URL counts as unset too.
pub(crate) fn value_is_empty(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}
