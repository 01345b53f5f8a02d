//! Cartesian-product expansion of test case parameter matrices

use crate::error::ParseError;
use httpcase_template::{
    FunctionCache, FunctionRegistry, Value, evaluate_now,
};
use indexmap::IndexMap;
use itertools::Itertools;

/// One expanded parameter row: variable names mapped to the values for a
/// single test case instance
pub type ParameterRow = IndexMap<String, Value>;

/// Expand an ordered parameter specification into the cartesian product of
/// its per-parameter rows. Each key may be a single variable name or a
/// hyphen-joined composite (`user-password`) that yields several variables
/// per row. Each source is either an inline list, or a template string (a
/// `${parameterize(...)}` or custom generator call) that is resolved against
/// `variables` and must produce a list.
///
/// The expansion length is the product of the per-parameter row counts.
pub fn expand_parameters(
    parameters: &IndexMap<String, Value>,
    variables: &IndexMap<String, Value>,
    registry: &FunctionRegistry,
    cache: &FunctionCache,
) -> Result<Vec<ParameterRow>, ParseError> {
    let mut row_lists: Vec<Vec<ParameterRow>> = Vec::new();
    for (name, source) in parameters {
        let names: Vec<&str> = name.split('-').collect();
        let rows = match source {
            // Inline list: elements map positionally against the composite
            Value::Array(items) => {
                items.iter().map(|item| zip_row(&names, item)).collect()
            }
            // Generator template: resolve through the full pipeline first
            source => {
                let generated =
                    evaluate_now(source.clone(), variables, registry, cache)?;
                let Value::Array(items) = generated else {
                    return Err(ParseError::params(format!(
                        "parameter `{name}` must produce a list, got \
                        `{generated}`"
                    )));
                };
                items
                    .iter()
                    .map(|item| select_row(&names, item))
                    .collect::<Result<_, _>>()?
            }
        };
        row_lists.push(rows);
    }

    Ok(row_lists
        .into_iter()
        .map(Vec::into_iter)
        .multi_cartesian_product()
        .map(|combination| combination.into_iter().flatten().collect())
        .collect())
}

/// Build a row from an inline list element: a list zips positionally against
/// the composite names, a scalar counts as a single-element list
fn zip_row(names: &[&str], item: &Value) -> ParameterRow {
    let values = match item {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    names
        .iter()
        .zip(values)
        .map(|(name, value)| ((*name).to_owned(), value))
        .collect()
}

/// Build a row from a generated element: a mapping is narrowed to exactly
/// the composite names, a list zips positionally, and a scalar is allowed
/// only for a single-name composite
fn select_row(names: &[&str], item: &Value) -> Result<ParameterRow, ParseError> {
    match item {
        Value::Object(object) => names
            .iter()
            .map(|name| {
                object
                    .get(*name)
                    .cloned()
                    .map(|value| ((*name).to_owned(), value))
                    .ok_or_else(|| {
                        ParseError::params(format!(
                            "parameter row {item} is missing key `{name}`"
                        ))
                    })
            })
            .collect(),
        Value::Array(_) => Ok(zip_row(names, item)),
        scalar => {
            let [name] = names else {
                return Err(ParseError::params(format!(
                    "parameter row `{scalar}` cannot fill composite \
                    `{composite}`",
                    composite = names.join("-"),
                )));
            };
            Ok(IndexMap::from_iter([((*name).to_owned(), scalar.clone())]))
        }
    }
}
