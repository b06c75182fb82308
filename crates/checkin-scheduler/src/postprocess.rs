//! Result filter: reduces a successful run's output with `result_regex`.

use regex::RegexBuilder;

pub const NO_MATCH_NOTE: &str = "\n[Regex Filter] No match found.";

/// Apply `pattern` to `output`.
///
/// - match with groups → the groups joined by `" | "`
/// - match without groups → the matched text
/// - no match → original output plus a note
/// - bad pattern → original output plus the error
pub fn apply_result_regex(output: &str, pattern: &str) -> String {
    let re = match RegexBuilder::new(pattern).dot_matches_new_line(true).build() {
        Ok(re) => re,
        Err(e) => return annotate_error(output, &e),
    };

    let Some(caps) = re.captures(output) else {
        return format!("{output}{NO_MATCH_NOTE}");
    };

    if caps.len() > 1 {
        caps.iter()
            .skip(1)
            .map(|group| group.map_or("", |m| m.as_str()))
            .collect::<Vec<_>>()
            .join(" | ")
    } else {
        caps.get(0).map_or("", |m| m.as_str()).to_string()
    }
}

/// Append a filter error to `output` without touching the rest of it.
pub fn annotate_error(output: &str, err: &dyn std::fmt::Display) -> String {
    format!("{output}\n[Regex Filter Error] {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_joined() {
        let out = apply_result_regex("id=42 status=ok", r"id=(\d+) status=(\w+)");
        assert_eq!(out, "42 | ok");
    }

    #[test]
    fn whole_match_without_groups() {
        let out = apply_result_regex("Status: 200\nBody: points=15", r"points=\d+");
        assert_eq!(out, "points=15");
    }

    #[test]
    fn dot_spans_lines() {
        let out = apply_result_regex(
            "Status: 200\nBody: {\"msg\":\n\"done\"}",
            r"Status: (\d+).*msg.*?(\w+)",
        );
        assert_eq!(out, "200 | done");
    }

    #[test]
    fn search_is_not_anchored() {
        let out = apply_result_regex("prefix balance: 7 suffix", r"balance: (\d+)");
        assert_eq!(out, "7");
    }

    #[test]
    fn no_match_keeps_original() {
        let out = apply_result_regex("Status: 200\nBody: nothing here", r"points=(\d+)");
        assert_eq!(out, "Status: 200\nBody: nothing here\n[Regex Filter] No match found.");
    }

    #[test]
    fn unmatched_optional_group_is_empty() {
        let out = apply_result_regex("a=1", r"a=(\d)(?:,b=(\d))?");
        assert_eq!(out, "1 | ");
    }

    #[test]
    fn invalid_pattern_is_annotated() {
        let out = apply_result_regex("Status: 200", r"(unclosed");
        assert!(out.starts_with("Status: 200\n[Regex Filter Error] "));
    }
}
