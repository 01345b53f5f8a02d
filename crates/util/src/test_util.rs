/// Unwrap the `Err` of a result and check that the given needle appears
/// somewhere in its rendered error chain. The whole chain is rendered (via
/// anyhow's alternate formatting) so a context wrapper can't mask the
/// underlying failure.
#[macro_export]
macro_rules! assert_err {
    ($result:expr, $needle:expr) => {{
        let error = anyhow::Error::from($result.unwrap_err());
        let rendered = format!("{error:#}");
        assert!(
            rendered.contains($needle),
            "error {rendered:?} missing expected text {:?}",
            $needle,
        );
    }};
}

/// Check that a value fits a pattern, with an optional `if` guard. The `=>`
/// form additionally evaluates the trailing expression under the pattern's
/// bindings and returns it, so matched fields can be pulled out for
/// follow-up checks.
#[macro_export]
macro_rules! assert_matches {
    ($value:expr, $pattern:pat $(if $guard:expr)? => $bind:expr $(,)?) => {
        match $value {
            $pattern $(if $guard)? => $bind,
            ref unexpected => panic!(
                "expected `{}`, got {unexpected:?}",
                stringify!($pattern $(if $guard)?),
            ),
        }
    };
    ($value:expr, $pattern:pat $(if $guard:expr)? $(,)?) => {
        match $value {
            $pattern $(if $guard)? => (),
            ref unexpected => panic!(
                "expected `{}`, got {unexpected:?}",
                stringify!($pattern $(if $guard)?),
            ),
        }
    };
}
