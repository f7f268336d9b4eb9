use std::collections::HashMap;
use std::env;

/// Snapshot of the environment variables the engine cares about, taken once
/// at startup. Per spec.md §5 ("the only environmental reads are at
/// startup"), nothing reads `std::env` again once a run is underway.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// Script-runner path, if set via `npm_execpath` (or equivalent). A CLI
    /// `--npm-path` always takes precedence over this.
    pub runner_path: Option<String>,
    /// `loglevel=silent` implies silent per spec.md §6.
    pub silent: bool,
    /// Package-scoped overwrite vars contributed by `<pkg>_config_<var>`
    /// shaped environment variables.
    pub package_vars: HashMap<String, HashMap<String, String>>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_pairs(env::vars())
    }

    fn from_pairs(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut runner_path = None;
        let mut silent = false;
        let mut package_vars: HashMap<String, HashMap<String, String>> = HashMap::new();

        for (key, value) in vars {
            if key == "npm_execpath" && !value.is_empty() {
                runner_path = Some(value.clone());
            }
            if key == "loglevel" && value == "silent" {
                silent = true;
            }
            if let Some(idx) = key.find("_config_") {
                let pkg = &key[..idx];
                let var = &key[idx + "_config_".len()..];
                if !pkg.is_empty() && !var.is_empty() {
                    package_vars
                        .entry(pkg.to_string())
                        .or_default()
                        .insert(var.to_string(), value.clone());
                }
            }
        }

        Self {
            runner_path,
            silent,
            package_vars,
        }
    }
}
