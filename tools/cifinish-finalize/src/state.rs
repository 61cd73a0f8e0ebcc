// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! JSON persistence for the host registry. Writes go through a temp file and
//! a rename.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use cifinish::{HostRegistry, HostState};

/// Loads the registry at `path`; a missing file is an empty registry.
pub fn load(path: &Path) -> Result<HostRegistry> {
    let state = match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str::<HostState>(&text)
            .with_context(|| format!("invalid registry state {}", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => HostState::default(),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };
    HostRegistry::from_state(&state).with_context(|| format!("in {}", path.display()))
}

/// Writes a snapshot of `registry` to `path`.
pub fn save(path: &Path, registry: &HostRegistry) -> Result<()> {
    let json = serde_json::to_string_pretty(&registry.snapshot())?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
