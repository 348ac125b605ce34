/// Pick the wildcard ambient declaration that best matches `name`.
///
/// A pattern `prefix*suffix` matches when `name` starts with `prefix` and ends
/// with `suffix` without the two overlapping. The longest prefix wins; on a tie
/// the longer fixed portion (prefix plus suffix) wins, then declaration order.
pub fn best_matching_pattern<'a, I>(name: &str, patterns: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut best: Option<(&'a str, usize, usize)> = None;
    for pattern in patterns {
        let Some((prefix, suffix)) = pattern.split_once('*') else {
            continue;
        };
        if name.len() < prefix.len() + suffix.len() {
            continue;
        }
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            continue;
        }
        let fixed = prefix.len() + suffix.len();
        let better = match best {
            None => true,
            Some((_, best_prefix, best_fixed)) => {
                prefix.len() > best_prefix || (prefix.len() == best_prefix && fixed > best_fixed)
            }
        };
        if better {
            best = Some((pattern.as_str(), prefix.len(), fixed));
        }
    }
    best.map(|(pattern, _, _)| pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let list = patterns(&["*", "foo/*", "foo/bar/*"]);
        assert_eq!(best_matching_pattern("foo/bar/baz", &list), Some("foo/bar/*"));
        assert_eq!(best_matching_pattern("foo/qux", &list), Some("foo/*"));
        assert_eq!(best_matching_pattern("other", &list), Some("*"));
    }

    #[test]
    fn test_suffix_breaks_prefix_ties() {
        let list = patterns(&["*.css", "*.module.css"]);
        assert_eq!(
            best_matching_pattern("app.module.css", &list),
            Some("*.module.css")
        );
        assert_eq!(best_matching_pattern("app.css", &list), Some("*.css"));
    }

    #[test]
    fn test_prefix_and_suffix_must_not_overlap() {
        let list = patterns(&["foo*oo"]);
        assert_eq!(best_matching_pattern("foo", &list), None);
        assert_eq!(best_matching_pattern("foooo", &list), Some("foo*oo"));
    }

    #[test]
    fn test_non_patterns_are_ignored() {
        let list = patterns(&["exact"]);
        assert_eq!(best_matching_pattern("exact", &list), None);
    }
}
