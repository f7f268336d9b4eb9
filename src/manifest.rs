use crate::error::{EngineError, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

/// The slice of `package.json` the engine cares about: the `scripts` map.
/// Everything else in the manifest is out of scope for this crate.
///
/// `scripts` is an `IndexMap` rather than `std::collections::HashMap` so
/// declaration order survives deserialization verbatim — script names are
/// matched against patterns in manifest order (spec.md §3/§4.1), and a
/// script's command text is free-form shell text that may itself contain
/// unbalanced `{`/`}` (e.g. `sed`/regex one-liners), so order can't be
/// recovered by re-scanning the raw JSON text for brace structure.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub scripts: IndexMap<String, String>,
}

impl Manifest {
    /// Script names in declaration order, as they appear in the manifest's
    /// `scripts` object.
    pub fn script_order(&self) -> Vec<String> {
        self.scripts.keys().cloned().collect()
    }
}

/// Load `package.json` from `dir` and return the manifest plus the names in
/// declaration order.
pub fn load_manifest(dir: &Path) -> Result<(Manifest, Vec<String>)> {
    let path = dir.join("package.json");
    let raw = std::fs::read_to_string(&path).map_err(|_| EngineError::ManifestMissing)?;
    let manifest: Manifest =
        serde_json::from_str(&raw).map_err(|_| EngineError::ManifestMissing)?;
    let order = manifest.script_order();
    Ok((manifest, order))
}
