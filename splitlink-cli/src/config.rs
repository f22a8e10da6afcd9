//! Peripheral profile overrides from a TOML file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use splitlink::PeripheralProfile;

/// The built-in profile, with any fields from `path` applied on top.
pub fn load_profile(path: Option<&Path>) -> Result<PeripheralProfile> {
    let Some(path) = path else {
        return Ok(PeripheralProfile::default());
    };
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_profile(&content).with_context(|| format!("parsing {}", path.display()))
}

pub fn parse_profile(content: &str) -> Result<PeripheralProfile> {
    Ok(toml::from_str(content)?)
}

pub fn to_toml(profile: &PeripheralProfile) -> Result<String> {
    toml::to_string_pretty(profile).context("serializing profile")
}
