use crate::error::{EngineError, Result};
use std::collections::HashMap;

/// Expands `{1}`..`{N}`, `{@}`, `{*}`, `{n:-default}`, `{n:=default}`
/// placeholders in a single pattern string against the positional arguments
/// passed after `--` on the command line.
///
/// `defaults` carries remembered `{n:=default}` substitutions forward so a
/// later `{n}` (in this pattern or a later one) resolves without its own
/// default. This is a pure string-rewrite step: its output feeds
/// `pattern::expand`, it never touches process spawning.
pub fn expand(
    pattern: &str,
    positional: &[String],
    defaults: &mut HashMap<usize, String>,
) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '{' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let Some(rel_end) = chars[i + 1..].iter().position(|&c| c == '}') else {
            return Err(EngineError::InvalidPlaceholder(pattern.to_string()));
        };
        let end = i + 1 + rel_end;
        let inner: String = chars[i + 1..end].iter().collect();
        out.push_str(&resolve(&inner, positional, defaults, pattern)?);
        i = end + 1;
    }

    Ok(out)
}

fn resolve(
    inner: &str,
    positional: &[String],
    defaults: &mut HashMap<usize, String>,
    pattern: &str,
) -> Result<String> {
    if inner == "@" {
        return Ok(positional
            .iter()
            .map(|a| shell_quote(a))
            .collect::<Vec<_>>()
            .join(" "));
    }
    if inner == "*" {
        return Ok(shell_quote(&positional.join(" ")));
    }
    if let Some((idx_part, default)) = inner.split_once(":-") {
        let idx = parse_index(idx_part, pattern)?;
        return Ok(value_at(positional, defaults, idx).unwrap_or_else(|| default.to_string()));
    }
    if let Some((idx_part, default)) = inner.split_once(":=") {
        let idx = parse_index(idx_part, pattern)?;
        let value = positional
            .get(idx - 1)
            .cloned()
            .unwrap_or_else(|| default.to_string());
        defaults.insert(idx, value.clone());
        return Ok(value);
    }
    let idx = parse_index(inner, pattern)?;
    value_at(positional, defaults, idx)
        .ok_or_else(|| EngineError::InvalidPlaceholder(pattern.to_string()))
}

fn value_at(
    positional: &[String],
    defaults: &HashMap<usize, String>,
    idx: usize,
) -> Option<String> {
    positional
        .get(idx - 1)
        .cloned()
        .or_else(|| defaults.get(&idx).cloned())
}

fn parse_index(s: &str, pattern: &str) -> Result<usize> {
    let n: usize = s
        .parse()
        .map_err(|_| EngineError::InvalidPlaceholder(pattern.to_string()))?;
    if n == 0 {
        return Err(EngineError::InvalidPlaceholder(pattern.to_string()));
    }
    Ok(n)
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| c.is_alphanumeric() || "-_./:=".contains(c)) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_index_substitutes() {
        let mut defaults = HashMap::new();
        let args = vec!["foo".to_string(), "bar".to_string()];
        let out = expand("build {1} then {2}", &args, &mut defaults).unwrap();
        assert_eq!(out, "build foo then bar");
    }

    #[test]
    fn all_args_individually_quoted() {
        let mut defaults = HashMap::new();
        let args = vec!["a b".to_string(), "c".to_string()];
        let out = expand("run {@}", &args, &mut defaults).unwrap();
        assert_eq!(out, "run 'a b' c");
    }

    #[test]
    fn all_args_joined_as_one_token() {
        let mut defaults = HashMap::new();
        let args = vec!["a".to_string(), "b".to_string()];
        let out = expand("run {*}", &args, &mut defaults).unwrap();
        assert_eq!(out, "run 'a b'");
    }

    #[test]
    fn missing_index_uses_dash_default_without_remembering() {
        let mut defaults = HashMap::new();
        let args: Vec<String> = vec![];
        let out = expand("build {1:-dev}", &args, &mut defaults).unwrap();
        assert_eq!(out, "build dev");
        assert!(defaults.is_empty());
    }

    #[test]
    fn equals_default_is_remembered_for_later_bare_reference() {
        let mut defaults = HashMap::new();
        let args: Vec<String> = vec![];
        let first = expand("build {1:=dev}", &args, &mut defaults).unwrap();
        assert_eq!(first, "build dev");
        let second = expand("deploy {1}", &args, &mut defaults).unwrap();
        assert_eq!(second, "deploy dev");
    }

    #[test]
    fn unknown_syntax_errors() {
        let mut defaults = HashMap::new();
        let args: Vec<String> = vec![];
        let err = expand("build {foo}", &args, &mut defaults).unwrap_err();
        assert!(err.to_string().contains("Invalid Placeholder"));
    }

    #[test]
    fn unterminated_brace_errors() {
        let mut defaults = HashMap::new();
        let args: Vec<String> = vec![];
        let err = expand("build {1", &args, &mut defaults).unwrap_err();
        assert!(err.to_string().contains("Invalid Placeholder"));
    }
}
