//! Daemon configuration
//!
//! TOML file at `$XDG_CONFIG_HOME/clipd/config.toml`. Every section is
//! optional; a missing file yields the built-in defaults, which manage
//! PRIMARY, SECONDARY and CLIPBOARD with CLIPBOARD mirroring into
//! PRIMARY and keeping history.

use std::path::Path;

use serde::{Deserialize, Serialize};

use clipd_utils::{ClipdError, Result};

use crate::history::Compression;
use crate::pipeline::{CommandSet, DEFAULT_MARKER};
use crate::registry::Policy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub history: HistoryConfig,
    pub pipeline: PipelineConfig,
    #[serde(default = "default_selections")]
    pub selections: Vec<SelectionConfig>,
    #[serde(default = "default_specials")]
    pub specials: Vec<SpecialConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            pipeline: PipelineConfig::default(),
            selections: default_selections(),
            specials: default_specials(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    pub compression: Compression,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Marker opening an embedded command sequence
    pub command_marker: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command_marker: DEFAULT_MARKER.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    /// Selection atom name
    pub name: String,
    /// Mirror committed updates into this selection
    pub sync: Option<String>,
    /// History capacity, 0 disables the log
    pub max_clips: usize,
    pub policies: Vec<Policy>,
    /// Watch and serve special targets on this selection
    pub handles_special: bool,
    /// Commit only once the content stops changing between polls
    pub primary_style: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            sync: None,
            max_clips: 0,
            policies: Vec::new(),
            handles_special: false,
            primary_style: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecialConfig {
    /// Target atom name
    pub name: String,
    /// Shares the single binary slot with other sharing specials
    pub share_binary: bool,
}

impl Default for SpecialConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            share_binary: false,
        }
    }
}

fn default_selections() -> Vec<SelectionConfig> {
    vec![
        SelectionConfig {
            name: "PRIMARY".into(),
            primary_style: true,
            ..Default::default()
        },
        SelectionConfig {
            name: "SECONDARY".into(),
            ..Default::default()
        },
        SelectionConfig {
            name: "CLIPBOARD".into(),
            sync: Some("PRIMARY".into()),
            max_clips: 15,
            policies: vec![
                Policy::TrimWhitespaceNoMultiline,
                Policy::TrimTrailingNewline,
                Policy::OwnImmediately,
            ],
            handles_special: true,
            ..Default::default()
        },
    ]
}

fn default_specials() -> Vec<SpecialConfig> {
    let plain = ["text/uri-list", "x-special/gnome-copied-files", "application/x-kde-cutselection"];
    let binary = [
        "image/tiff",
        "image/bmp",
        "image/x-bmp",
        "image/x-MS-bmp",
        "image/x-icon",
        "image/x-ico",
        "image/x-win-bitmap",
        "image/jpeg",
    ];
    plain
        .into_iter()
        .map(|name| SpecialConfig {
            name: name.into(),
            share_binary: false,
        })
        .chain(binary.into_iter().map(|name| SpecialConfig {
            name: name.into(),
            share_binary: true,
        }))
        .collect()
}

impl Config {
    /// Load from the default config file path
    pub fn load_default() -> Result<Self> {
        Self::load(&clipd_utils::paths::config_file())
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ClipdError::FileRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ClipdError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Command table built from the pipeline section
    pub fn command_set(&self) -> CommandSet {
        CommandSet::with_marker(self.pipeline.command_marker.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.history.compression, Compression::Zstd);
        assert_eq!(config.pipeline.command_marker, "#clipd:");
        assert_eq!(config.selections.len(), 3);
        assert_eq!(config.specials.len(), 11);
        assert!(config.specials.iter().any(|s| s.name == "image/jpeg" && s.share_binary));
        assert!(config
            .specials
            .iter()
            .any(|s| s.name == "text/uri-list" && !s.share_binary));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = Config::load(&temp.path().join("nope.toml")).unwrap();
        assert_eq!(config.selections.len(), 3);
    }

    #[test]
    fn test_parse_full() {
        let toml = r##"
            [history]
            compression = "lz4"

            [pipeline]
            command_marker = "#cb:"

            [[selections]]
            name = "CLIPBOARD"
            max_clips = 5
            policies = ["trim-whitespace", "own-immediately"]

            [[specials]]
            name = "image/png"
            share_binary = true
        "##;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.history.compression, Compression::Lz4);
        assert_eq!(config.pipeline.command_marker, "#cb:");
        assert_eq!(config.selections.len(), 1);
        assert_eq!(config.selections[0].max_clips, 5);
        assert_eq!(
            config.selections[0].policies,
            vec![Policy::TrimWhitespace, Policy::OwnImmediately]
        );
        assert_eq!(config.specials.len(), 1);
        assert!(config.specials[0].share_binary);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str("[history]\ncompression = \"none\"\n").unwrap();
        assert_eq!(config.history.compression, Compression::None);
        assert_eq!(config.selections.len(), 3);
        assert_eq!(config.pipeline.command_marker, "#clipd:");
    }

    #[test]
    fn test_invalid_file_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[history]\ncompression = \"brotli\"\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ClipdError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = toml::from_str::<Config>("[history]\nlevel = 3\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_command_set_uses_marker() {
        let config: Config = toml::from_str("[pipeline]\ncommand_marker = \"#z:\"\n").unwrap();
        assert_eq!(config.command_set().marker, "#z:");
    }
}
