//! JSON ledger persistence

use anyhow::{Context, Result};
use nodestake_staking::EngineSnapshot;
use std::path::Path;

/// Read a snapshot, or `None` if the file does not exist yet
pub fn load_snapshot(path: &Path) -> Result<Option<EngineSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {:?}", path))?;
    let snapshot = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse state file {:?}", path))?;

    Ok(Some(snapshot))
}

/// Write a snapshot through a sibling temp file and rename it into place
pub fn save_snapshot(path: &Path, snapshot: &EngineSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize state")?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move state into {:?}", path))?;

    Ok(())
}
