//! Reference manifest loading.
//!
//! A manifest is a YAML list of known function extents, usually exported
//! from a symbolized build or an earlier run, used to grade a recovery.

use std::path::Path;

use serde::Deserialize;

/// A reference list of function extents.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub functions: Vec<ManifestFn>,
}

/// One reference entry. Addresses accept YAML integers or `0x` strings.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManifestFn {
    #[serde(deserialize_with = "u32_or_hex")]
    pub addr: u32,
    #[serde(deserialize_with = "u32_or_hex")]
    pub size: u32,
}

impl Manifest {
    /// Load a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not match the schema.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Entries as bare `(addr, size)` pairs, the shape validation takes.
    pub fn pairs(&self) -> Vec<(u32, u32)> {
        self.functions.iter().map(|f| (f.addr, f.size)).collect()
    }
}

fn u32_or_hex<'de, D>(de: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u32),
        Text(String),
    }

    match Raw::deserialize(de)? {
        Raw::Int(value) => Ok(value),
        Raw::Text(text) => {
            let digits = text.strip_prefix("0x").ok_or_else(|| {
                serde::de::Error::custom(format!("expected an integer or 0x literal, got {text:?}"))
            })?;
            u32::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
        }
    }
}
