//! `require()` specifier scanner.
//!
//! Finds `require("...")` and `require('...')` calls without parsing. Calls
//! inside string literals or comments are skipped by first collecting string
//! and comment intervals. For minified text (long average line length) the
//! interval pass is skipped and every match is taken.
//!
//! Template literals and computed specifiers are not detected.

use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

/// Average line length at or above which text is treated as minified.
pub const MINIFIED_LINE_LENGTH: usize = 200;

fn string_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#""[^"\\\n]*(?:\\.[^"\\\n]*)*"|'[^'\\\n]*(?:\\.[^'\\\n]*)*'|`[^`\\]*(?:\\.[^`\\]*)*`"#,
        )
        .ok()
    })
    .as_ref()
}

fn comment_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(?:^|[^\\])(?:/\*[\s\S]*?\*/|(?:[^:]|^)//.*$)").ok()
    })
    .as_ref()
}

fn require_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:^\x{FEFF}?|[^$_a-zA-Z\x{A0}-\x{FFFF}."'])require\s*\(\s*("[^"\\]*(?:\\.[^"\\]*)*"|'[^'\\]*(?:\\.[^'\\]*)*')\s*\)"#,
        )
        .ok()
    })
    .as_ref()
}

/// Scan `source` for literal `require` specifiers.
///
/// Returns specifiers in first-appearance order, deduplicated. Specifiers
/// containing quotes are dropped and one trailing `/` is removed.
#[must_use]
pub fn scan_requires(source: &str) -> Vec<String> {
    let line_count = source.lines().count().max(1);
    let track_intervals = source.len() / line_count < MINIFIED_LINE_LENGTH;

    let Some(require) = require_regex() else {
        return Vec::new();
    };

    let (strings, comments) = match (track_intervals, string_regex(), comment_regex()) {
        (true, Some(string_re), Some(comment_re)) => {
            let strings: Vec<Range<usize>> =
                string_re.find_iter(source).map(|m| m.range()).collect();
            let comments: Vec<Range<usize>> = comment_re
                .find_iter(source)
                .map(|m| m.range())
                .filter(|c| !inside(&strings, c.start))
                .collect();
            (strings, comments)
        }
        _ => (Vec::new(), Vec::new()),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for caps in require.captures_iter(source) {
        let Some(literal) = caps.get(1) else {
            continue;
        };
        let start = literal.start();
        let enclosed_by_string = strings.iter().any(|s| s.start < start && start < s.end);
        if enclosed_by_string || inside(&comments, start) {
            continue;
        }

        let quoted = literal.as_str();
        let inner = &quoted[1..quoted.len() - 1];
        if inner.contains('"') || inner.contains('\'') {
            continue;
        }
        let specifier = inner.strip_suffix('/').unwrap_or(inner);
        if specifier.is_empty() {
            continue;
        }
        if seen.insert(specifier.to_string()) {
            out.push(specifier.to_string());
        }
    }
    out
}

fn inside(intervals: &[Range<usize>], pos: usize) -> bool {
    intervals.iter().any(|r| r.contains(&pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_requires() {
        let src = r#"
var a = require("a");
const b = require('./b');
var c = require( "c/sub/" );
"#;
        assert_eq!(scan_requires(src), vec!["a", "./b", "c/sub"]);
    }

    #[test]
    fn test_skips_comments_and_strings() {
        let src = r#"
// var x = require("commented");
/* require("block") */
var s = "require('in-string')";
var url = "http://example.com"; var y = require("real");
"#;
        assert_eq!(scan_requires(src), vec!["real"]);
    }

    #[test]
    fn test_ignores_member_and_identifier_suffix() {
        let src = r#"
obj.require("no");
myrequire("no2");
$require("no3");
var ok = require("yes");
"#;
        assert_eq!(scan_requires(src), vec!["yes"]);
    }

    #[test]
    fn test_dedupes_in_order() {
        let src = "require('b');\nrequire('a');\nrequire('b');\n";
        assert_eq!(scan_requires(src), vec!["b", "a"]);
    }

    #[test]
    fn test_start_of_input_and_bom() {
        assert_eq!(scan_requires("require('x')"), vec!["x"]);
        assert_eq!(scan_requires("\u{FEFF}require('y')"), vec!["y"]);
    }

    #[test]
    fn test_dynamic_specifiers_ignored() {
        let src = "var name = 'a';\nrequire(name);\nrequire(`tpl`);\nrequire('a' + 'b');\n";
        assert!(scan_requires(src).is_empty());
    }

    #[test]
    fn test_minified_skips_interval_tracking() {
        let filler = "x".repeat(400);
        let src = format!("var s='{filler}';/* require(\"in-comment\") */var a=require(\"a\");");
        assert_eq!(scan_requires(&src), vec!["in-comment", "a"]);
    }
}
