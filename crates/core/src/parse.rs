//! The top-level driver: walk a test document and produce resolved test
//! cases.
//!
//! Data flows raw document → merge → prepare → resolve → evaluate. Within a
//! test case, steps are processed in document order so each step's known
//! variables reflect every earlier step's extractions. Everything is
//! strictly sequential; the only shared state is the per-invocation
//! function-result cache.

use crate::{
    collection::{
        Config, ParsedTestCase, ParsedTests, Step, SuiteEntry, TestCase,
        TestDocument, TestStep, TestSuite, value_is_empty,
    },
    error::ParseError,
    merge::{self, MergeOptions},
    parameters::expand_parameters,
};
use httpcase_template::{
    FunctionCache, FunctionRegistry, Value, evaluate, prepare,
    resolve_variables,
};
use httpcase_util::LogError;
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{info, trace};

/// Resolve every test in the document: suites are flattened (expanding
/// parameter matrices), test cases are resolved in place, and lone API
/// definitions are wrapped as single-step test cases. The output is a flat
/// list of resolved cases plus the untouched project info.
pub fn parse_tests(
    document: TestDocument,
    registry: &FunctionRegistry,
) -> Result<ParsedTests, ParseError> {
    parse_tests_with_options(document, registry, MergeOptions::default())
}

/// [parse_tests] with explicit merge behavior
pub fn parse_tests_with_options(
    document: TestDocument,
    registry: &FunctionRegistry,
    options: MergeOptions,
) -> Result<ParsedTests, ParseError> {
    let parser = TestParser {
        registry,
        options,
        project_variables: document.project_mapping.variables.clone(),
        cache: FunctionCache::new(),
    };

    let mut testcases = Vec::new();
    for testsuite in document.testsuites {
        testcases.extend(parser.parse_testsuite(testsuite).log_error()?);
    }
    for testcase in document.testcases {
        testcases.push(parser.parse_testcase(testcase).log_error()?);
    }
    // A lone API definition runs as a synthetic one-step test case
    for api in document.apis {
        let testcase = TestCase {
            config: Config::default(),
            teststeps: vec![TestStep {
                api_def: Some(api),
                ..TestStep::default()
            }],
        };
        testcases.push(parser.parse_testcase(testcase).log_error()?);
    }

    Ok(ParsedTests {
        project_mapping: document.project_mapping,
        testcases,
    })
}

/// State shared across one document walk
struct TestParser<'a> {
    registry: &'a FunctionRegistry,
    options: MergeOptions,
    /// Project-level variable overrides, highest priority everywhere
    project_variables: IndexMap<String, Value>,
    /// Function-result cache spanning this invocation
    cache: FunctionCache,
}

impl TestParser<'_> {
    /// Resolve a single test case: prepare and resolve its config, then
    /// prepare each step in document order
    fn parse_testcase(
        &self,
        testcase: TestCase,
    ) -> Result<ParsedTestCase, ParseError> {
        let mut config = testcase.config;

        // Project variables override config variables per key. Config-level
        // templates get the cached flag so an expensive generator call in
        // here produces one value shared by every step.
        config.variables = merge::extend_variables(
            config.variables,
            self.project_variables.clone(),
        );
        let known: HashSet<String> =
            config.variables.keys().cloned().collect();
        config.variables = self.prepare_mapping(config.variables, &known)?;
        config.name = prepare(config.name, self.registry, &known, true)?;
        config.base_url =
            prepare(config.base_url, self.registry, &known, true)?;
        config.extra = self.prepare_mapping(config.extra, &known)?;

        // Settle the variable scope. Self-references are unresolvable here:
        // there is nowhere else for them to get a value from
        let variables =
            resolve_variables(&config.variables, &self.cache, false)?;
        let config_verify = config.verify.unwrap_or(true);

        let mut teststeps = Vec::new();
        let mut extracted: HashSet<String> = HashSet::new();
        for mut step in testcase.teststeps {
            // Config variables win over step variables per key
            step.variables =
                merge::extend_variables(step.variables, variables.clone());
            // A step without its own base URL inherits the config's
            if value_is_empty(&step.base_url)
                && !value_is_empty(&config.base_url)
            {
                step.base_url = config.base_url.clone();
            }

            if let Some(nested) = step.testcase_def.take() {
                // The step wraps a whole nested case; recurse into it
                let mut merged = merge::extend_with_testcase(step, *nested);
                if merged.config.verify.is_none() {
                    merged.config.verify = Some(config_verify);
                }
                teststeps.push(Step::TestCase(self.parse_testcase(merged)?));
                continue;
            }

            if let Some(api) = step.api_def.take() {
                merge::extend_with_api(&mut step, api, self.options)?;
            } else {
                // The merge normalizes validators on the API path; plain
                // steps get the same treatment here
                step.validate = merge::parse_validators(&step.validate)?
                    .into_iter()
                    .map(Value::from)
                    .collect();
            }

            // Steps that didn't pick a verify behavior inherit the config's
            if let Some(Value::Object(request)) = &mut step.request {
                request
                    .entry("verify".to_owned())
                    .or_insert(Value::Bool(config_verify));
            }

            // This step's extractions are in scope for itself and everything
            // after it
            extracted.extend(step.extract.keys().cloned());

            let mut known: HashSet<String> =
                step.variables.keys().cloned().collect();
            known.extend(extracted.iter().cloned());
            // The runner supplies these two at execution time
            known.insert("request".to_owned());
            known.insert("response".to_owned());

            trace!(name = %step.name, "Preparing teststep");
            teststeps.push(Step::Request(self.prepare_step(step, &known)?));
        }

        // Materialize the config for output
        let extra = config
            .extra
            .into_iter()
            .map(|(key, value)| {
                Ok((key, evaluate(&value, &variables, &self.cache)?))
            })
            .collect::<Result<_, ParseError>>()?;
        let config = Config {
            name: evaluate(&config.name, &variables, &self.cache)?,
            base_url: evaluate(&config.base_url, &variables, &self.cache)?,
            verify: Some(config_verify),
            variables,
            weight: config.weight,
            path: config.path,
            extra,
        };
        info!(name = %config.name, "Parsed test case");
        Ok(ParsedTestCase { config, teststeps })
    }

    /// Flatten a suite into its resolved test cases, expanding parameter
    /// matrices into one case per product row
    fn parse_testsuite(
        &self,
        testsuite: TestSuite,
    ) -> Result<Vec<ParsedTestCase>, ParseError> {
        let suite_config = testsuite.config;
        let suite_variables = merge::extend_variables(
            suite_config.variables,
            self.project_variables.clone(),
        );

        let mut parsed = Vec::new();
        for (name, entry) in testsuite.testcases {
            let SuiteEntry {
                testcase: path,
                weight,
                variables: entry_variables,
                parameters,
                testcase_def: mut testcase,
            } = entry;

            testcase.config.name = Value::String(name);
            testcase.config.path = path;
            if weight.is_some() {
                testcase.config.weight = weight;
            }
            // base_url: the case's own config wins over the suite's
            if value_is_empty(&testcase.config.base_url) {
                testcase.config.base_url = suite_config.base_url.clone();
            }
            if testcase.config.verify.is_none() {
                testcase.config.verify = suite_config.verify;
            }

            // Variable chain, most specific last: suite config < case
            // definition config < suite entry
            let merged = merge::extend_variables(
                merge::extend_variables(
                    suite_variables.clone(),
                    std::mem::take(&mut testcase.config.variables),
                ),
                entry_variables,
            );

            if parameters.is_empty() {
                testcase.config.variables = merged;
                parsed.push(self.parse_testcase(testcase)?);
                continue;
            }

            // Pre-resolve the merged variables so parameter sources can
            // reference them. Some names (e.g. runner-supplied ones) aren't
            // known yet, so self-references are carried through instead of
            // failing here.
            let known: HashSet<String> = merged.keys().cloned().collect();
            let prepared = self.prepare_mapping(merged, &known)?;
            let resolved =
                resolve_variables(&prepared, &self.cache, true)?;
            let rows = expand_parameters(
                &parameters,
                &resolved,
                self.registry,
                &self.cache,
            )?;
            trace!(
                name = %testcase.config.name,
                rows = rows.len(),
                "Expanding test case parameters"
            );
            for row in rows {
                let mut expanded = testcase.clone();
                // The parameter row outranks everything
                expanded.config.variables =
                    merge::extend_variables(resolved.clone(), row);
                parsed.push(self.parse_testcase(expanded)?);
            }
        }
        Ok(parsed)
    }

    /// Prepare every templated field of a step against its known-variables
    /// set. This is where an undefined `$reference` in a step fails.
    fn prepare_step(
        &self,
        mut step: TestStep,
        known: &HashSet<String>,
    ) -> Result<TestStep, ParseError> {
        step.name = prepare(step.name, self.registry, known, false)?;
        step.variables = self.prepare_mapping_uncached(step.variables, known)?;
        step.extract = self.prepare_mapping_uncached(step.extract, known)?;
        step.validate = step
            .validate
            .into_iter()
            .map(|validator| prepare(validator, self.registry, known, false))
            .collect::<Result<_, _>>()?;
        step.setup_hooks = step
            .setup_hooks
            .into_iter()
            .map(|hook| prepare(hook, self.registry, known, false))
            .collect::<Result<_, _>>()?;
        step.teardown_hooks = step
            .teardown_hooks
            .into_iter()
            .map(|hook| prepare(hook, self.registry, known, false))
            .collect::<Result<_, _>>()?;
        step.base_url = prepare(step.base_url, self.registry, known, false)?;
        step.request = step
            .request
            .map(|request| prepare(request, self.registry, known, false))
            .transpose()?;
        step.extra = self.prepare_mapping_uncached(step.extra, known)?;
        Ok(step)
    }

    /// Prepare each value of a mapping with the cached flag set (config
    /// scope)
    fn prepare_mapping(
        &self,
        mapping: IndexMap<String, Value>,
        known: &HashSet<String>,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        mapping
            .into_iter()
            .map(|(key, value)| {
                Ok((key, prepare(value, self.registry, known, true)?))
            })
            .collect()
    }

    /// Prepare each value of a mapping without caching (step scope)
    fn prepare_mapping_uncached(
        &self,
        mapping: IndexMap<String, Value>,
        known: &HashSet<String>,
    ) -> Result<IndexMap<String, Value>, ParseError> {
        mapping
            .into_iter()
            .map(|(key, value)| {
                Ok((key, prepare(value, self.registry, known, false)?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpcase_template::Arguments;
    use httpcase_util::{assert_err, assert_matches};
    use indexmap::indexmap;
    use pretty_assertions::assert_eq;

    fn document(yaml: &str) -> TestDocument {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn registry() -> FunctionRegistry {
        FunctionRegistry::new().with_function(
            "gen_random_string",
            |mut arguments: Arguments| {
                let length: i64 = arguments.pop_position()?;
                arguments.ensure_consumed()?;
                Ok(Value::String("x".repeat(length as usize)))
            },
        )
    }

    /// A plain test case resolves its config and prepares its steps; the
    /// extract of an early step is a legal reference for later steps
    #[test]
    fn test_testcase_pipeline() {
        let document = document(
            "
testcases:
  - config:
      name: create and check
      base_url: https://$host
      variables:
        host: api.example.test
        uid: 1000
    teststeps:
      - name: log in
        request:
          url: /login
          method: POST
        extract:
          token: content.token
      - name: fetch user $uid
        request:
          url: /users/$uid
          headers:
            Authorization: Bearer $token
",
        );
        let parsed = parse_tests(document, &registry()).unwrap();
        assert_eq!(parsed.testcases.len(), 1);
        let testcase = &parsed.testcases[0];

        // Config is fully concrete
        assert_eq!(testcase.config.name, Value::from("create and check"));
        assert_eq!(
            testcase.config.base_url,
            Value::from("https://api.example.test")
        );
        assert_eq!(testcase.config.verify, Some(true));
        assert_eq!(
            testcase.config.variables,
            indexmap! {
                "host".to_owned() => Value::from("api.example.test"),
                "uid".to_owned() => Value::Int(1000),
            }
        );

        // Steps keep their lazy parts for the runner
        let step = assert_matches!(&testcase.teststeps[1], Step::Request(step) => step);
        assert_matches!(&step.name, Value::LazyString(_));
        let request = assert_matches!(&step.request, Some(Value::Object(request)) => request);
        assert_matches!(&request["url"], Value::LazyString(_));
        // verify was defaulted onto the request
        assert_eq!(request["verify"], Value::Bool(true));
    }

    /// Referencing a variable no step or config declares fails at parse
    /// time, naming the variable
    #[test]
    fn test_unknown_step_variable() {
        let document = document(
            "
testcases:
  - config:
      name: bad case
    teststeps:
      - name: step
        request:
          url: /users/$nope
",
        );
        assert_err!(
            parse_tests(document, &registry()),
            "variable `nope` is not found"
        );
    }

    /// Project-level variables override config variables everywhere
    #[test]
    fn test_project_variable_override() {
        let document = document(
            "
project_mapping:
  variables:
    env_name: staging
testcases:
  - config:
      name: runs against $env_name
      variables:
        env_name: production
    teststeps: []
",
        );
        let parsed = parse_tests(document, &registry()).unwrap();
        assert_eq!(
            parsed.testcases[0].config.name,
            Value::from("runs against staging")
        );
    }

    /// A step referencing an API definition gets the API's request with the
    /// step's overrides applied
    #[test]
    fn test_api_reference() {
        let document = document(
            "
testcases:
  - config:
      name: token flow
      verify: false
    teststeps:
      - name: ''
        api_def:
          name: get token
          request:
            url: /token
            method: POST
          validate:
            - eq: [status_code, 200]
",
        );
        let parsed = parse_tests(document, &registry()).unwrap();
        let step = assert_matches!(
            &parsed.testcases[0].teststeps[0],
            Step::Request(step) => step
        );
        assert_eq!(step.name, Value::from("get token"));
        let request = assert_matches!(&step.request, Some(Value::Object(request)) => request);
        assert_eq!(request["url"], Value::from("/token"));
        // config verify propagated into the request
        assert_eq!(request["verify"], Value::Bool(false));
        // the validator was normalized
        assert_eq!(
            step.validate[0],
            Value::from(vec![
                ("check", Value::from("status_code")),
                ("comparator", Value::from("eq")),
                ("expect", Value::Int(200)),
            ])
        );
    }

    /// A step referencing a nested test case becomes a nested resolved case
    /// with merged config
    #[test]
    fn test_nested_testcase() {
        let document = document(
            "
testcases:
  - config:
      name: outer
      base_url: https://outer.example.test
    teststeps:
      - name: run inner
        variables:
          uid: 7
        testcase_def:
          config:
            name: inner
            variables:
              uid: 1
          teststeps:
            - name: fetch
              request:
                url: /users/$uid
",
        );
        let parsed = parse_tests(document, &registry()).unwrap();
        let nested = assert_matches!(
            &parsed.testcases[0].teststeps[0],
            Step::TestCase(nested) => nested
        );
        assert_eq!(nested.config.name, Value::from("run inner"));
        // step variables beat the nested config's defaults
        assert_eq!(nested.config.variables["uid"], Value::Int(7));
        // base_url inherited through the wrapping step
        assert_eq!(
            nested.config.base_url,
            Value::from("https://outer.example.test")
        );
        assert_eq!(nested.teststeps.len(), 1);
    }

    /// A lone API definition is wrapped as a single-step test case
    #[test]
    fn test_apis_bucket() {
        let document = document(
            "
apis:
  - name: health check
    request:
      url: /health
    validate:
      - eq: [status_code, 200]
",
        );
        let parsed = parse_tests(document, &registry()).unwrap();
        assert_eq!(parsed.testcases.len(), 1);
        let step = assert_matches!(
            &parsed.testcases[0].teststeps[0],
            Step::Request(step) => step
        );
        assert_eq!(step.name, Value::from("health check"));
    }

    /// A suite expands a parameterized case into one case per product row,
    /// with row variables visible to the case name
    #[test]
    fn test_testsuite_parameters() {
        let document = document(
            "
testsuites:
  - config:
      name: smoke
      base_url: https://suite.example.test
      variables:
        env_name: staging
    testcases:
      $title$uid on $env_name:
        testcase: testcases/user.yml
        weight: 2
        parameters:
          uid: [100, 101]
          locale: [en, fr]
        testcase_def:
          config:
            name: placeholder
            variables:
              title: 'user '
          teststeps:
            - name: fetch
              request:
                url: /users/$uid?locale=$locale
",
        );
        let parsed = parse_tests(document, &registry()).unwrap();
        assert_eq!(parsed.testcases.len(), 4);
        let names: Vec<_> = parsed
            .testcases
            .iter()
            .map(|testcase| testcase.config.name.clone())
            .collect();
        // uid varies slowest: it's the first parameter in the product
        assert_eq!(
            names,
            vec![
                Value::from("user 100 on staging"),
                Value::from("user 100 on staging"),
                Value::from("user 101 on staging"),
                Value::from("user 101 on staging"),
            ]
        );
        // Path, weight, and suite base_url landed on each expanded case
        let testcase = &parsed.testcases[0];
        assert_eq!(testcase.config.path.as_deref(), Some("testcases/user.yml"));
        assert_eq!(testcase.config.weight, Some(2));
        assert_eq!(
            testcase.config.base_url,
            Value::from("https://suite.example.test")
        );
        // Row variables are concrete in the resolved config
        assert_eq!(testcase.config.variables["uid"], Value::Int(100));
        assert_eq!(testcase.config.variables["locale"], Value::from("en"));
    }

    /// Suite entry variables beat suite config variables; both beat the
    /// case definition's own config
    #[test]
    fn test_testsuite_variable_precedence() {
        let document = document(
            "
testsuites:
  - config:
      variables:
        a: suite
        b: suite
        c: suite
    testcases:
      precedence:
        variables:
          a: entry
        testcase_def:
          config:
            variables:
              a: case
              b: case
          teststeps: []
",
        );
        let parsed = parse_tests(document, &registry()).unwrap();
        let variables = &parsed.testcases[0].config.variables;
        assert_eq!(variables["a"], Value::from("entry"));
        assert_eq!(variables["b"], Value::from("case"));
        assert_eq!(variables["c"], Value::from("suite"));
    }

    /// A config-level generator call runs once; both the config variable and
    /// every step observe the same value
    #[test]
    fn test_config_function_cached() {
        use std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        };
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&counter);
        let registry = FunctionRegistry::new().with_function(
            "gen_token",
            move |arguments: Arguments| {
                arguments.ensure_consumed()?;
                let count = handle.fetch_add(1, Ordering::Relaxed);
                Ok(Value::String(format!("token-{count}")))
            },
        );
        let document = document(
            "
testcases:
  - config:
      name: cached config call
      variables:
        token: ${gen_token()}
    teststeps:
      - name: first $token
        request:
          url: /a
      - name: second $token
        request:
          url: /b
",
        );
        let parsed = parse_tests(document, &registry).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(
            parsed.testcases[0].config.variables["token"],
            Value::from("token-0")
        );
    }

    /// A self-referential config variable has nowhere to get a value from
    #[test]
    fn test_config_self_reference() {
        let document = document(
            "
testcases:
  - config:
      name: bad
      variables:
        token: $token
    teststeps: []
",
        );
        assert_err!(
            parse_tests(document, &registry()),
            "variable `token` is not found"
        );
    }

    /// The project mapping rides through to the output untouched
    #[test]
    fn test_project_mapping_passthrough() {
        let document = document(
            "
project_mapping:
  PWD: /projects/demo
  variables:
    a: 1
",
        );
        let parsed = parse_tests(document.clone(), &registry()).unwrap();
        assert_eq!(parsed.project_mapping, document.project_mapping);
        assert_eq!(parsed.testcases, vec![]);
    }
}
