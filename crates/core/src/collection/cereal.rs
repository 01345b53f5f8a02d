//! Serialization/deserialization helpers for collection types

use httpcase_template::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

/// Deserialize a variable/parameter mapping from either of the two accepted
/// document shapes:
///
/// ```yaml
/// # plain mapping
/// variables:
///   a: 1
///   b: 2
/// # list of single-key mappings (preserves explicit ordering in formats
/// # where mappings are unordered)
/// variables:
///   - a: 1
///   - b: 2
/// ```
///
/// Both normalize to one ordered mapping. In the list form a later entry
/// wins over an earlier one with the same key.
pub fn flexible_mapping<'de, D>(
    deserializer: D,
) -> Result<IndexMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Mapping(IndexMap<String, Value>),
        List(Vec<IndexMap<String, Value>>),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Mapping(mapping) => Ok(mapping),
        Flexible::List(list) => Ok(list.into_iter().flatten().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    #[serde(transparent)]
    struct Wrap(
        #[serde(deserialize_with = "flexible_mapping")] IndexMap<String, Value>,
    );

    #[rstest]
    #[case::mapping("{a: 1, b: x}")]
    #[case::list("[{a: 1}, {b: x}]")]
    #[case::list_multi_key("[{a: 1, b: x}]")]
    fn test_flexible_mapping(#[case] yaml: &str) {
        let actual: Wrap = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            actual,
            Wrap(indexmap! {
                "a".to_owned() => Value::Int(1),
                "b".to_owned() => Value::from("x"),
            })
        );
    }

    /// In the list form, a repeated key keeps the last value
    #[test]
    fn test_flexible_mapping_duplicate() {
        let actual: Wrap = serde_yaml::from_str("[{a: 1}, {a: 2}]").unwrap();
        assert_eq!(
            actual,
            Wrap(indexmap! {"a".to_owned() => Value::Int(2)})
        );
    }
}
