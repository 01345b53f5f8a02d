//! Token scanning and argument parsing for the template mini-language.
//!
//! The grammar is deliberately tiny: a variable reference is `$name`, a
//! function call is `${name(args)}`. Both are simple enough that a regex
//! scanner is the easiest correct implementation.

use crate::Value;
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

/// Variable reference: `$user_id`
static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z0-9_]+)").unwrap());

/// Function call: `${add($a, 10)}`. The argument text is restricted to a
/// small character set, which among other things means arguments can never
/// contain parentheses or braces
static FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_]+)\(([\$A-Za-z0-9_.\-/\s=,]*)\)\}").unwrap()
});

/// Substitution marker used in compiled templates. NUL can't appear in any
/// sane input document, so user-written braces or markers can never collide
/// with it
pub(crate) const PLACEHOLDER: char = '\u{0}';

/// Does this string contain at least one variable reference or function call?
pub fn contains_template(content: &str) -> bool {
    VARIABLE.is_match(content) || FUNCTION.is_match(content)
}

/// A function call found in a string, with its byte span
#[derive(Debug, PartialEq)]
pub(crate) struct FunctionMatch<'a> {
    pub start: usize,
    pub end: usize,
    pub name: &'a str,
    /// Raw text between the parentheses, still unsplit
    pub arguments: &'a str,
}

/// A variable reference found in a string, with its byte span
#[derive(Debug, PartialEq)]
pub(crate) struct VariableMatch<'a> {
    pub start: usize,
    pub end: usize,
    pub name: &'a str,
}

/// Find every function call in the string, in left-to-right order
pub(crate) fn find_functions(content: &str) -> Vec<FunctionMatch<'_>> {
    FUNCTION
        .captures_iter(content)
        .map(|captures| {
            let entire = captures.get(0).unwrap();
            FunctionMatch {
                start: entire.start(),
                end: entire.end(),
                name: captures.get(1).unwrap().as_str(),
                arguments: captures.get(2).unwrap().as_str(),
            }
        })
        .collect()
}

/// Find every variable reference in the string, in left-to-right order. This
/// includes references inside function argument lists; the caller is
/// responsible for dropping those if they're handled elsewhere.
pub(crate) fn find_variables(content: &str) -> Vec<VariableMatch<'_>> {
    VARIABLE
        .captures_iter(content)
        .map(|captures| {
            let entire = captures.get(0).unwrap();
            VariableMatch {
                start: entire.start(),
                end: entire.end(),
                name: captures.get(1).unwrap().as_str(),
            }
        })
        .collect()
}

/// Names of all variables referenced in the string, in order of appearance.
/// May contain duplicates.
pub fn variable_names(content: &str) -> impl Iterator<Item = &str> {
    VARIABLE
        .captures_iter(content)
        .map(|captures| captures.get(1).unwrap().as_str())
}

/// Split a function's raw argument text into positional and keyword
/// arguments with literal values coerced.
///
/// The splitting is intentionally naive: arguments are separated on every
/// `,` and a `key=value` pair is detected by the first `=`. Argument values
/// therefore can never contain a comma or an unescaped `=`; this is a
/// documented grammar limitation, not something to silently extend.
pub(crate) fn parse_arguments(
    raw: &str,
) -> (Vec<Value>, IndexMap<String, Value>) {
    let mut position = Vec::new();
    let mut keyword = IndexMap::new();

    let raw = raw.trim();
    if raw.is_empty() {
        return (position, keyword);
    }

    for fragment in raw.split(',') {
        let fragment = fragment.trim();
        if let Some((key, value)) = fragment.split_once('=') {
            keyword
                .insert(key.trim().to_owned(), parse_literal(value.trim()));
        } else {
            position.push(parse_literal(fragment));
        }
    }

    (position, keyword)
}

/// Coerce an argument fragment into a typed literal. Fragments that don't
/// parse as any literal are kept as raw strings, which preserves `$var`
/// references and bare words like `account.csv` for later resolution.
pub(crate) fn parse_literal(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    // Only try numeric parsing when the fragment looks numeric, so words
    // like `infinity` (which f64::from_str accepts) stay strings
    if raw
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
    {
        if let Ok(int) = raw.parse::<i64>() {
            return Value::Int(int);
        }
        if let Ok(float) = raw.parse::<f64>() {
            return Value::Float(float);
        }
    }
    // Strip matching quotes
    if raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')))
    {
        return Value::String(raw[1..raw.len() - 1].to_owned());
    }
    Value::String(raw.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case::plain("abc", false)]
    #[case::bare_dollar("cost is $", false)]
    #[case::variable("$variable", true)]
    #[case::variable_in_path("/blog/$postid", true)]
    #[case::function("${get_timestamp()}", true)]
    #[case::empty("", false)]
    fn test_contains_template(#[case] content: &str, #[case] expected: bool) {
        assert_eq!(contains_template(content), expected);
    }

    /// Variables are matched in order with byte offsets
    #[test]
    fn test_find_variables() {
        assert_eq!(
            find_variables("/$var1/$var2"),
            vec![
                VariableMatch {
                    start: 1,
                    end: 6,
                    name: "var1"
                },
                VariableMatch {
                    start: 7,
                    end: 12,
                    name: "var2"
                },
            ]
        );
        assert_eq!(find_variables("abc"), vec![]);
    }

    /// Functions are matched in order, with the argument text captured
    /// verbatim
    #[test]
    fn test_find_functions() {
        assert_eq!(
            find_functions("/api/${add(1, 2)}?_t=${get_timestamp()}"),
            vec![
                FunctionMatch {
                    start: 5,
                    end: 17,
                    name: "add",
                    arguments: "1, 2"
                },
                FunctionMatch {
                    start: 21,
                    end: 39,
                    name: "get_timestamp",
                    arguments: ""
                },
            ]
        );
    }

    /// A `$var` inside an argument list is still matched by the variable
    /// scanner; the preparer is responsible for assigning it to the call
    #[test]
    fn test_find_variables_inside_function() {
        let matches = find_variables("${func2($a, $b)}");
        assert_eq!(
            matches.iter().map(|m| m.name).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[rstest]
    #[case::empty("", vec![], indexmap! {})]
    #[case::single_int("5", vec![Value::Int(5)], indexmap! {})]
    #[case::two_ints("1, 2", vec![Value::Int(1), Value::Int(2)], indexmap! {})]
    #[case::keyword_only(
        "a=1, b=2",
        vec![],
        indexmap! {"a".to_owned() => Value::Int(1), "b".to_owned() => Value::Int(2)},
    )]
    #[case::mixed(
        "1, 2, a=3, b=4",
        vec![Value::Int(1), Value::Int(2)],
        indexmap! {"a".to_owned() => Value::Int(3), "b".to_owned() => Value::Int(4)},
    )]
    #[case::variable_deferred(
        "$a, 10",
        vec![Value::String("$a".into()), Value::Int(10)],
        indexmap! {},
    )]
    #[case::bare_word(
        "account.csv",
        vec![Value::String("account.csv".into())],
        indexmap! {},
    )]
    fn test_parse_arguments(
        #[case] raw: &str,
        #[case] position: Vec<Value>,
        #[case] keyword: IndexMap<String, Value>,
    ) {
        assert_eq!(parse_arguments(raw), (position, keyword));
    }

    #[rstest]
    #[case::int("123", Value::Int(123))]
    #[case::negative_int("-12", Value::Int(-12))]
    #[case::float("12.3", Value::Float(12.3))]
    #[case::bool_true("true", Value::Bool(true))]
    #[case::bool_false("false", Value::Bool(false))]
    #[case::quoted_single("'abc'", Value::String("abc".into()))]
    #[case::quoted_double("\"abc\"", Value::String("abc".into()))]
    #[case::word("abc", Value::String("abc".into()))]
    #[case::word_not_float("infinity", Value::String("infinity".into()))]
    #[case::variable("$var", Value::String("$var".into()))]
    #[case::path("/data/app", Value::String("/data/app".into()))]
    fn test_parse_literal(#[case] raw: &str, #[case] expected: Value) {
        assert_eq!(parse_literal(raw), expected);
    }
}
