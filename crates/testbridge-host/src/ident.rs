//! Parent/subtest split for parametrized test identifiers.
//!
//! `pkg.Cls.test_method (x=1, y=2)` names the subtest `(x=1, y=2)` of
//! `pkg.Cls.test_method`. The split is purely syntactic: a space followed by
//! one `(...)` or `[...]` group that closes exactly at the end of the string.

/// Split `identifier` into `(parent, subtest)`. `subtest` is empty when the
/// identifier carries no trailing group.
pub fn split_test_name(identifier: &str) -> (&str, &str) {
    for (space, _) in identifier.match_indices(' ') {
        if space == 0 {
            continue;
        }
        let group = &identifier[space + 1..];
        if matches!(group.as_bytes().first(), Some(b'(' | b'[')) && is_trailing_group(group) {
            return (&identifier[..space], group);
        }
    }
    (identifier, "")
}

/// True when `group` is a single balanced bracket group spanning the whole
/// string. Brackets inside quotes do not count. A group that only balances
/// with quotes read literally, as in `[it's]`, is accepted too.
fn is_trailing_group(group: &str) -> bool {
    balanced(group, true) || balanced(group, false)
}

fn balanced(group: &str, respect_quotes: bool) -> bool {
    let bytes = group.as_bytes();
    let mut expected: Vec<u8> = Vec::new();
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }

        match b {
            b'"' | b'\'' if respect_quotes => quote = Some(b),
            b'(' => expected.push(b')'),
            b'[' => expected.push(b']'),
            b')' | b']' => {
                if expected.pop() != Some(b) {
                    return false;
                }
                if expected.is_empty() {
                    return i == bytes.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parametrized_names() {
        let cases = [
            (
                "test_package.ClassName.test_method (param=value)",
                "(param=value)",
            ),
            ("test_package.ClassName.test_method [value]", "[value]"),
            (
                "test_package.ClassName.test_method (param1=value1, param2=value2)",
                "(param1=value1, param2=value2)",
            ),
            (
                "test_package.ClassName.test_method [value1, value2]",
                "[value1, value2]",
            ),
            (
                "test_package.ClassName.test_method (param1=value/1, param2=value+2)",
                "(param1=value/1, param2=value+2)",
            ),
            (
                "test_package.ClassName.test_method [\"a b c d\"]",
                "[\"a b c d\"]",
            ),
        ];
        for (input, subtest) in cases {
            assert_eq!(
                split_test_name(input),
                ("test_package.ClassName.test_method", subtest),
                "input: {input}"
            );
        }
    }

    #[test]
    fn plain_name_has_no_subtest() {
        assert_eq!(
            split_test_name("pkg.Cls.test_method"),
            ("pkg.Cls.test_method", "")
        );
        assert_eq!(split_test_name(""), ("", ""));
    }

    #[test]
    fn keyword_parameters() {
        assert_eq!(
            split_test_name("pkg.Cls.test_method (x=1, y=2)"),
            ("pkg.Cls.test_method", "(x=1, y=2)")
        );
    }

    #[test]
    fn nested_groups() {
        assert_eq!(
            split_test_name("t.test_x (a=(1, 2), b=[3])"),
            ("t.test_x", "(a=(1, 2), b=[3])")
        );
    }

    #[test]
    fn quoted_brackets_are_ignored() {
        assert_eq!(
            split_test_name("t.test_x [\"a] b\", 'c) d']"),
            ("t.test_x", "[\"a] b\", 'c) d']")
        );
    }

    #[test]
    fn apostrophe_inside_group() {
        assert_eq!(split_test_name("t.test_x [it's]"), ("t.test_x", "[it's]"));
        assert_eq!(
            split_test_name("t.Cls.test_m (msg=don't, n=2)"),
            ("t.Cls.test_m", "(msg=don't, n=2)")
        );
        assert_eq!(split_test_name("t.test [\"open]"), ("t.test", "[\"open]"));
    }

    #[test]
    fn group_must_reach_end_of_string() {
        assert_eq!(split_test_name("t.test_x (a) tail"), ("t.test_x (a) tail", ""));
        assert_eq!(split_test_name("t.test_x (a) [b]"), ("t.test_x (a)", "[b]"));
    }

    #[test]
    fn requires_space_before_group() {
        assert_eq!(split_test_name("test_x[1]"), ("test_x[1]", ""));
        assert_eq!(split_test_name(" (x)"), (" (x)", ""));
    }

    #[test]
    fn unbalanced_or_mismatched_groups_are_not_split() {
        assert_eq!(split_test_name("t.test (a"), ("t.test (a", ""));
        assert_eq!(split_test_name("t.test (a]"), ("t.test (a]", ""));
    }

    #[test]
    fn split_reassembles() {
        for id in ["a.b (c)", "x [y, z]", "m.n", "p (q) (r)"] {
            let (parent, subtest) = split_test_name(id);
            if subtest.is_empty() {
                assert_eq!(parent, id);
            } else {
                assert_eq!(format!("{parent} {subtest}"), id);
            }
        }
    }
}
