//! Optional YAML import profile.
//!
//! ```yaml
//! chunk_rows: 20000
//! encoding: windows-1252
//! delimiter: ";"
//! accept_corruption: true
//! ```
//!
//! Every key is optional; command-line flags take precedence.

use std::{fs, path::Path};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::cli::parse_delimiter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportProfile {
    pub chunk_rows: Option<usize>,
    pub encoding: Option<String>,
    pub delimiter: Option<String>,
    pub accept_corruption: Option<bool>,
}

impl ImportProfile {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("Reading import profile {path:?}"))?;
        Self::from_yaml(&text).with_context(|| format!("Parsing import profile {path:?}"))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let profile: Self = serde_yaml::from_str(text)?;
        if profile.chunk_rows == Some(0) {
            return Err(anyhow!("chunk_rows must be at least 1"));
        }
        profile.delimiter_byte()?;
        Ok(profile)
    }

    pub fn delimiter_byte(&self) -> Result<Option<u8>> {
        self.delimiter
            .as_deref()
            .map(|value| parse_delimiter(value).map_err(|err| anyhow!(err)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_profile_parses() {
        let profile = ImportProfile::from_yaml("chunk_rows: 500\ndelimiter: tab\n").unwrap();
        assert_eq!(profile.chunk_rows, Some(500));
        assert_eq!(profile.delimiter_byte().unwrap(), Some(b'\t'));
        assert_eq!(profile.accept_corruption, None);
    }

    #[test]
    fn empty_profile_is_default() {
        assert_eq!(ImportProfile::from_yaml("{}").unwrap(), ImportProfile::default());
    }

    #[test]
    fn invalid_profiles_are_rejected() {
        assert!(ImportProfile::from_yaml("chunk_rows: 0").is_err());
        assert!(ImportProfile::from_yaml("delimiter: ';;'").is_err());
        assert!(ImportProfile::from_yaml("chunk_size: 10").is_err());
    }
}
