//! Fixed-point resolution of variable mappings whose values may reference
//! each other

use crate::{FunctionCache, TemplateError, Value, evaluate, parse};
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::trace;

/// Collect the names of every variable referenced anywhere in this value
/// tree, including references buried inside function argument lists.
pub fn extract_variable_names(content: &Value) -> HashSet<String> {
    fn collect(content: &Value, names: &mut HashSet<String>) {
        match content {
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            // A plain string is by definition template-free
            | Value::String(_) => {}
            Value::Array(array) => {
                array.iter().for_each(|item| collect(item, names));
            }
            Value::Object(object) => {
                object.values().for_each(|value| collect(value, names));
            }
            Value::TemplatedMap(pairs) => {
                for (key, value) in pairs {
                    collect(key, names);
                    collect(value, names);
                }
            }
            // The raw source text still contains every reference, including
            // the ones inside function calls
            Value::LazyString(lazy) => names
                .extend(parse::variable_names(lazy.raw()).map(str::to_owned)),
            Value::LazyFunction(function) => {
                function.position.iter().for_each(|value| {
                    collect(value, names);
                });
                function.keyword.values().for_each(|value| {
                    collect(value, names);
                });
            }
        }
    }

    let mut names = HashSet::new();
    collect(content, &mut names);
    names
}

/// Evaluate a prepared variable mapping to a fixed point, in dependency
/// order. The input order doesn't matter; each variable is evaluated once
/// all the names it references are concrete.
///
/// - A variable that references itself is a [TemplateError::VariableNotFound]
///   unless `ignore_self` is set, in which case its value is carried over
///   unevaluated. That mode is for pre-resolving mappings where some names
///   are not known yet.
/// - A group of variables that reference each other in a loop is a
///   [TemplateError::CircularReference] naming the members.
/// - A reference to a name absent from the mapping leaves its dependents
///   unresolved; the returned mapping is partial and the dangling reference
///   surfaces as an error when the dependent value is eventually evaluated.
pub fn resolve_variables(
    variables: &IndexMap<String, Value>,
    cache: &FunctionCache,
    ignore_self: bool,
) -> Result<IndexMap<String, Value>, TemplateError> {
    let mut resolved: IndexMap<String, Value> = IndexMap::new();
    while resolved.len() < variables.len() {
        let mut progress = false;
        for (name, value) in variables {
            if resolved.contains_key(name) {
                continue;
            }
            let references = extract_variable_names(value);

            if references.contains(name) {
                if ignore_self {
                    // Carry the lazy value through untouched
                    resolved.insert(name.clone(), value.clone());
                    progress = true;
                    continue;
                }
                return Err(TemplateError::VariableNotFound {
                    name: name.clone(),
                });
            }

            if references
                .iter()
                .all(|reference| resolved.contains_key(reference))
            {
                trace!(name, "Resolving variable");
                let concrete = evaluate(value, &resolved, cache)?;
                resolved.insert(name.clone(), concrete);
                progress = true;
            }
        }

        if !progress {
            // Stalled. If the leftover names form a loop among themselves
            // that's unresolvable and worth a specific error; a reference to
            // a name outside the mapping just leaves the mapping partial
            if let Some(names) = find_cycle(variables, &resolved) {
                return Err(TemplateError::CircularReference { names });
            }
            break;
        }
    }
    Ok(resolved)
}

/// Search the unresolved remainder of the mapping for a reference cycle.
/// Returns the names along the first cycle found, in reference order.
fn find_cycle(
    variables: &IndexMap<String, Value>,
    resolved: &IndexMap<String, Value>,
) -> Option<Vec<String>> {
    // Restrict the reference graph to unresolved names; everything else is
    // already settled and can't be part of a loop
    let graph: IndexMap<&str, Vec<String>> = variables
        .iter()
        .filter(|(name, _)| !resolved.contains_key(*name))
        .map(|(name, value)| {
            let references = extract_variable_names(value)
                .into_iter()
                .filter(|reference| {
                    variables.contains_key(reference)
                        && !resolved.contains_key(reference)
                })
                .collect();
            (name.as_str(), references)
        })
        .collect();

    fn visit(
        name: &str,
        graph: &IndexMap<&str, Vec<String>>,
        path: &mut Vec<String>,
        finished: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        if finished.contains(name) {
            return None;
        }
        if let Some(position) = path.iter().position(|entry| entry == name) {
            // Back edge: everything from the first occurrence onward is the
            // loop
            return Some(path[position..].to_vec());
        }
        path.push(name.to_owned());
        for reference in graph.get(name).into_iter().flatten() {
            if let Some(cycle) = visit(reference, graph, path, finished) {
                return Some(cycle);
            }
        }
        path.pop();
        finished.insert(name.to_owned());
        None
    }

    let mut finished = HashSet::new();
    for name in graph.keys() {
        if let Some(cycle) =
            visit(name, &graph, &mut Vec::new(), &mut finished)
        {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        prepare,
        test_util::{known, test_registry},
    };
    use httpcase_util::{assert_err, assert_matches};
    use indexmap::indexmap;
    use pretty_assertions::assert_eq;

    /// Prepare each value of a raw mapping against the mapping's own key set
    fn prepare_mapping(
        variables: IndexMap<String, Value>,
    ) -> IndexMap<String, Value> {
        let registry = test_registry();
        let known: HashSet<String> = variables.keys().cloned().collect();
        variables
            .into_iter()
            .map(|(name, value)| {
                (name, prepare(value, &registry, &known, false).unwrap())
            })
            .collect()
    }

    /// References are collected recursively, including through function
    /// argument lists
    #[test]
    fn test_extract_variable_names() {
        let registry = test_registry();
        let content = prepare(
            Value::from(vec![
                Value::from("123$varB"),
                Value::from("${add($a, $b)}"),
                Value::from("plain"),
            ]),
            &registry,
            &known(&["varB", "a", "b"]),
            false,
        )
        .unwrap();
        assert_eq!(
            extract_variable_names(&content),
            known(&["varB", "a", "b"])
        );
        assert_eq!(extract_variable_names(&Value::from("$a")), known(&[]));
    }

    /// Variables resolve in dependency order regardless of declaration order
    #[test]
    fn test_dependency_order() {
        let variables = prepare_mapping(indexmap! {
            "A".to_owned() => Value::from("$B-x"),
            "B".to_owned() => Value::from("$C-y"),
            "C".to_owned() => Value::from("z"),
        });
        let resolved =
            resolve_variables(&variables, &FunctionCache::new(), false)
                .unwrap();
        assert_eq!(
            resolved,
            indexmap! {
                "C".to_owned() => Value::from("z"),
                "B".to_owned() => Value::from("z-y"),
                "A".to_owned() => Value::from("z-y-x"),
            }
        );
    }

    /// Function calls participate in dependency resolution through their
    /// arguments
    #[test]
    fn test_function_dependency() {
        let variables = prepare_mapping(indexmap! {
            "total".to_owned() => Value::from("${add($a, $b)}"),
            "a".to_owned() => Value::Int(1),
            "b".to_owned() => Value::Int(2),
        });
        let resolved =
            resolve_variables(&variables, &FunctionCache::new(), false)
                .unwrap();
        assert_eq!(resolved["total"], Value::Int(3));
    }

    /// A self-reference is an error, unless explicitly ignored, in which
    /// case the value is carried over unevaluated
    #[test]
    fn test_self_reference() {
        let variables = prepare_mapping(indexmap! {
            "token".to_owned() => Value::from("$token"),
        });
        assert_err!(
            resolve_variables(&variables, &FunctionCache::new(), false),
            "variable `token` is not found"
        );

        let resolved =
            resolve_variables(&variables, &FunctionCache::new(), true)
                .unwrap();
        assert_matches!(&resolved["token"], Value::LazyString(_));
    }

    /// A reference to a name outside the mapping leaves its dependents out
    /// of the result instead of failing
    #[test]
    fn test_undefined_reference_partial() {
        let registry = test_registry();
        let variables: IndexMap<String, Value> = indexmap! {
            "a".to_owned() => prepare(
                "$ghost".into(),
                &registry,
                &known(&["ghost"]),
                false,
            )
            .unwrap(),
            "b".to_owned() => Value::Int(1),
        };
        let resolved =
            resolve_variables(&variables, &FunctionCache::new(), false)
                .unwrap();
        assert_eq!(resolved, indexmap! {"b".to_owned() => Value::Int(1)});
    }

    /// An indirect loop fails with the cycle members named
    #[test]
    fn test_cycle_detected() {
        let variables = prepare_mapping(indexmap! {
            "a".to_owned() => Value::from("$b"),
            "b".to_owned() => Value::from("$c"),
            "c".to_owned() => Value::from("$a"),
            "standalone".to_owned() => Value::from("ok"),
        });
        let error =
            resolve_variables(&variables, &FunctionCache::new(), false)
                .unwrap_err();
        let names = assert_matches!(
            error,
            TemplateError::CircularReference { names } => names
        );
        let mut sorted = names;
        sorted.sort();
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }
}
