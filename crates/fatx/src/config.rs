use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Error;

/// How a volume is located on its device and whether it may be modified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VolumeConfig {
    /// Byte offset of the partition inside the device or disk image.
    #[serde(default)]
    pub partition_offset: u64,
    /// Partition length; defaults to everything after the offset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_size: Option<u64>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct ConfigFile {
    volume: VolumeConfig,
}

impl VolumeConfig {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&ConfigFile {
            volume: self.clone(),
        })
    }
}

pub fn load_config(path: &Path) -> Result<VolumeConfig, Error> {
    let str = std::fs::read_to_string(path)?;
    let config_file =
        toml::from_str::<ConfigFile>(&str).map_err(|e| Error::ConfigError(e.to_string()))?;
    Ok(config_file.volume)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = toml::from_str::<ConfigFile>("[volume]\nread_only = true\n")
            .expect("parse")
            .volume;
        assert_eq!(config, VolumeConfig::read_only());
    }

    #[test]
    fn serialized_config_parses_back() {
        let config = VolumeConfig {
            partition_offset: 0x80000,
            partition_size: Some(0x2EE00000),
            read_only: false,
        };
        let text = config.to_toml_string().expect("serialize");
        let parsed = toml::from_str::<ConfigFile>(&text).expect("parse").volume;
        assert_eq!(parsed, config);
    }
}
