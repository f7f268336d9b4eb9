use crate::error::{EngineError, Result};
use crate::task::Task;
use regex::Regex;

/// Expands user-supplied glob patterns against the manifest's script names,
/// preserving user order and eliminating cross-pattern duplicates (but not
/// intra-pattern or same-literal-repeated duplicates).
///
/// `script_names` must already be in manifest declaration order.
pub fn expand(patterns: &[String], script_names: &[String]) -> Result<Vec<Task>> {
    let (positives, negatives): (Vec<&String>, Vec<&String>) =
        patterns.iter().partition(|p| !p.trim_start().starts_with('!'));

    let negative_globs: Vec<Regex> = negatives
        .iter()
        .map(|p| glob_to_regex(strip_bang(p)))
        .collect();

    let mut tasks = Vec::new();
    // script_name -> the literal positive-pattern text that first introduced it.
    let mut introduced_by: std::collections::HashMap<String, String> =
        std::collections::HashMap::new();

    for raw in &positives {
        let (name_part, extra_args) = split_inline_args(raw);

        if has_glob_meta(name_part) {
            let re = glob_to_regex(name_part);
            for script in script_names {
                if !re.is_match(script) {
                    continue;
                }
                if negative_globs.iter().any(|n| n.is_match(script)) {
                    continue;
                }
                if let Some(prior) = introduced_by.get(script) {
                    if prior != raw.as_str() {
                        continue;
                    }
                }
                introduced_by.insert(script.clone(), (*raw).clone());
                let mut task = Task::new(script.clone(), script.clone());
                task.extra_args = extra_args.clone();
                tasks.push(task);
            }
        } else {
            if !script_names.iter().any(|s| s == name_part) {
                continue;
            }
            if negative_globs.iter().any(|n| n.is_match(name_part)) {
                continue;
            }
            if let Some(prior) = introduced_by.get(name_part) {
                if prior != raw.as_str() {
                    continue;
                }
            }
            introduced_by.insert(name_part.to_string(), (*raw).clone());
            let mut task = Task::new(raw.as_str(), name_part);
            task.extra_args = extra_args;
            tasks.push(task);
        }
    }

    if tasks.is_empty() {
        let joined = patterns.join(" ");
        return Err(EngineError::PatternNoMatch(joined));
    }

    Ok(tasks)
}

fn strip_bang(p: &str) -> &str {
    p.trim_start().strip_prefix('!').unwrap_or(p)
}

fn has_glob_meta(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

/// Splits a pattern into its script-name portion and inline argument tokens
/// (everything after the first run of whitespace).
fn split_inline_args(pattern: &str) -> (&str, Vec<String>) {
    match pattern.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.split_whitespace().map(str::to_string).collect()),
        None => (pattern, Vec::new()),
    }
}

/// Translates a colon-segmented glob into an anchored regex. `**` matches
/// across segments (including `:`), a single `*`/`?` matches within one
/// segment only.
fn glob_to_regex(glob: &str) -> Regex {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push_str(".*");
                i += 2;
            }
            '*' => {
                out.push_str("[^:]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^:]");
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    Regex::new(&out).expect("glob_to_regex builds a valid regex")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }
    fn pats(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_segment_wildcard_expands_in_manifest_order() {
        let manifest = names(&["test-task:append:a", "test-task:append:b", "other"]);
        let tasks = expand(&pats(&["test-task:append:*"]), &manifest).unwrap();
        let got: Vec<&str> = tasks.iter().map(|t| t.script_name.as_str()).collect();
        assert_eq!(got, vec!["test-task:append:a", "test-task:append:b"]);
    }

    #[test]
    fn double_star_crosses_segments() {
        let manifest = names(&["a:b:c", "a:x", "z"]);
        let tasks = expand(&pats(&["a:**"]), &manifest).unwrap();
        let got: Vec<&str> = tasks.iter().map(|t| t.script_name.as_str()).collect();
        assert_eq!(got, vec!["a:b:c", "a:x"]);
    }

    #[test]
    fn negative_pattern_excludes_matches() {
        let manifest = names(&["build:a", "build:b"]);
        let tasks = expand(&pats(&["build:*", "!build:b"]), &manifest).unwrap();
        let got: Vec<&str> = tasks.iter().map(|t| t.script_name.as_str()).collect();
        assert_eq!(got, vec!["build:a"]);
    }

    #[test]
    fn repeated_identical_literal_runs_twice() {
        let manifest = names(&["a"]);
        let tasks = expand(&pats(&["a", "a"]), &manifest).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn cross_pattern_duplicate_kept_once() {
        let manifest = names(&["y:x"]);
        let tasks = expand(&pats(&["*:x", "y:x"]), &manifest).unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn empty_expansion_errors_with_not_found() {
        let manifest = names(&["a"]);
        let err = expand(&pats(&["nope"]), &manifest).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn only_negative_patterns_error() {
        let manifest = names(&["a"]);
        let err = expand(&pats(&["!a"]), &manifest).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn inline_args_preserved_on_display_name() {
        let manifest = names(&["append"]);
        let tasks = expand(&pats(&["append a b"]), &manifest).unwrap();
        assert_eq!(tasks[0].display_name, "append a b");
        assert_eq!(tasks[0].script_name, "append");
        assert_eq!(tasks[0].extra_args, vec!["a".to_string(), "b".to_string()]);
    }
}
