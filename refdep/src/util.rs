//! Name suggestions for diagnostics

/// Edit distance between `a` and `b` counted in characters
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    // row[j] holds the distance between the prefix of `a` seen so far and b[..j]
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = diagonal + usize::from(ca != *cb);
            diagonal = row[j + 1];
            row[j + 1] = substitute.min(row[j] + 1).min(diagonal + 1);
        }
    }
    row[b.len()]
}

/// Closest candidate within `threshold` edits of `name`. Ties go to the
/// earliest candidate.
pub fn find_similar_name<'a>(
    name: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    threshold: usize,
) -> Option<&'a str> {
    candidates
        .into_iter()
        .map(|c| (levenshtein_distance(name, c), c))
        .filter(|(d, _)| *d <= threshold)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

pub fn format_suggestion_hint(suggestion: Option<&str>) -> String {
    suggestion
        .map(|name| format!("\n  hint: did you mean `{name}`?"))
        .unwrap_or_default()
}

/// Allowed edits for a name: one per three characters, between 1 and 3
pub fn suggestion_threshold(name: &str) -> usize {
    (name.chars().count() / 3).clamp(1, 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("count", "count"), 0);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
        assert_eq!(levenshtein_distance("modifies", "modfies"), 1);
    }

    #[test]
    fn test_find_similar_name() {
        assert_eq!(find_similar_name("cnt", ["count", "cnt2"], 2), Some("cnt2"));
        assert_eq!(find_similar_name("ab", ["abcd", "abc"], 2), Some("abc"));
        assert_eq!(find_similar_name("xyz", ["count", "total"], 2), None);
    }

    #[test]
    fn test_suggestion_hint() {
        assert!(format_suggestion_hint(Some("total")).contains("did you mean `total`?"));
        assert_eq!(format_suggestion_hint(None), "");
        assert_eq!(suggestion_threshold("g"), 1);
        assert_eq!(suggestion_threshold("counter"), 2);
        assert_eq!(suggestion_threshold("a_very_long_name"), 3);
    }
}
