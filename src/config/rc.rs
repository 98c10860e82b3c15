use crate::document_model::StoreLimits;
use crate::document_model::chunk_store::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RESIDENT, DEFAULT_MERGE_CEILING, DEFAULT_SEARCH_WINDOW,
};
use crate::hex::DEFAULT_BYTES_PER_LINE;
use regex::Regex;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

const RC_FILE_NAME: &str = ".hexrusrc";

static SIZE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(0x[0-9a-f]+|[0-9]+)\s*([kmg]i?b?)?$").expect("size pattern is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("line {line}: invalid value {value:?} for {key}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },

    #[error("line {line}: unknown setting {key:?}")]
    UnknownSetting { line: usize, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcConfig {
    pub chunk_size: usize,
    pub merge_ceiling: usize,
    pub max_resident: usize,
    pub search_window: usize,
    /// `None` keeps every undo step.
    pub undo_limit: Option<usize>,
    pub bytes_per_line: usize,
    pub highlight: bool,
}

impl Default for RcConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            merge_ceiling: DEFAULT_MERGE_CEILING,
            max_resident: DEFAULT_MAX_RESIDENT,
            search_window: DEFAULT_SEARCH_WINDOW,
            undo_limit: None,
            bytes_per_line: DEFAULT_BYTES_PER_LINE,
            highlight: true,
        }
    }
}

impl RcConfig {
    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            chunk_size: self.chunk_size,
            merge_ceiling: self.merge_ceiling,
            max_resident: self.max_resident,
            search_window: self.search_window,
        }
    }
}

pub struct RcLoader;

impl RcLoader {
    /// Get the path to the RC file
    /// Looks for .hexrusrc in:
    /// 1. Current directory
    /// 2. Home directory (~/.hexrusrc)
    pub fn get_rc_path() -> Option<PathBuf> {
        let current_rc = Path::new(RC_FILE_NAME);
        if current_rc.exists() {
            return Some(current_rc.to_path_buf());
        }

        if let Ok(home) = env::var("HOME") {
            let home_rc = Path::new(&home).join(RC_FILE_NAME);
            if home_rc.exists() {
                return Some(home_rc);
            }
        }

        None
    }

    /// Load the RC file found by `get_rc_path`. A missing file yields the
    /// defaults; bad lines are logged and skipped.
    pub fn load_config() -> RcConfig {
        let mut config = RcConfig::default();

        if let Some(rc_path) = Self::get_rc_path() {
            match fs::read_to_string(&rc_path) {
                Ok(content) => {
                    debug!("loading settings from {}", rc_path.display());
                    for err in Self::parse_config_content(&content, &mut config) {
                        warn!("{}: {err}", rc_path.display());
                    }
                }
                Err(err) => warn!("cannot read {}: {err}", rc_path.display()),
            }
        }

        config
    }

    /// Load an explicitly named RC file. Unlike `load_config`, every problem
    /// is an error: the first bad line is returned.
    pub fn load_from_path(path: &Path) -> Result<RcConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = RcConfig::default();
        match Self::parse_config_content(&content, &mut config).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(config),
        }
    }

    /// Parse the content of an RC file, returning the problems found.
    pub fn parse_config_content(content: &str, config: &mut RcConfig) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') || line.starts_with('"') {
                continue;
            }

            if let Err(err) = Self::parse_config_line(index + 1, line, config) {
                errors.push(err);
            }
        }
        errors
    }

    /// Parse a single configuration line
    fn parse_config_line(
        number: usize,
        line: &str,
        config: &mut RcConfig,
    ) -> Result<(), ConfigError> {
        // Remove inline comments
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        }
        .trim();

        // "set" is optional; flags are only valid in set form
        let setting = line.strip_prefix("set ").map(str::trim).unwrap_or(line);
        match setting {
            "highlight" | "hl" => {
                config.highlight = true;
                return Ok(());
            }
            "nohighlight" | "nohl" => {
                config.highlight = false;
                return Ok(());
            }
            _ => {}
        }

        let Some((key, value)) = setting.split_once('=') else {
            return Err(ConfigError::UnknownSetting {
                line: number,
                key: setting.to_string(),
            });
        };
        let key = key.trim();
        let value = value.trim();
        let invalid = || ConfigError::InvalidValue {
            line: number,
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "chunk_size" | "chunksize" => {
                config.chunk_size = parse_size(value).filter(|&n| n > 0).ok_or_else(invalid)?;
            }
            "merge_ceiling" | "mergeceiling" => {
                config.merge_ceiling = parse_size(value).ok_or_else(invalid)?;
            }
            "max_resident" | "maxresident" => {
                config.max_resident = parse_size(value).ok_or_else(invalid)?;
            }
            "search_window" | "searchwindow" => {
                config.search_window = parse_size(value).filter(|&n| n > 0).ok_or_else(invalid)?;
            }
            "undo_limit" | "undolevels" => {
                config.undo_limit = match value {
                    "none" | "unlimited" => None,
                    _ => Some(value.parse::<usize>().map_err(|_| invalid())?),
                };
            }
            "bytes_per_line" | "columns" => {
                let columns = value.parse::<usize>().map_err(|_| invalid())?;
                if !(1..=64).contains(&columns) {
                    return Err(invalid());
                }
                config.bytes_per_line = columns;
            }
            "highlight" => {
                config.highlight = parse_bool(value).ok_or_else(invalid)?;
            }
            _ => {
                return Err(ConfigError::UnknownSetting {
                    line: number,
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Generate a sample RC file content
    pub fn generate_sample_rc() -> String {
        r#"# hexrus configuration file (.hexrusrc)
# Lines starting with # or " are comments

# Storage
set chunk_size=4K       # Bytes read from the file at a time
set merge_ceiling=4K    # Largest chunk produced by merging
set max_resident=16M    # Unmodified bytes kept in memory
set search_window=64K   # Block size for searching and saving

# History
set undo_limit=none     # Number of undo steps kept, or none

# Display
set bytes_per_line=16
set highlight           # Highlight changed bytes (or set nohighlight)

# Alternative key=value syntax:
# chunk_size=0x1000
# max_resident=256MiB
# highlight=false
"#
        .to_string()
    }
}

/// Parse a byte count such as `4096`, `0x1000`, `64K` or `16MiB`.
pub fn parse_size(value: &str) -> Option<usize> {
    let captures = SIZE_VALUE.captures(value.trim())?;
    let number = captures.get(1)?.as_str().to_ascii_lowercase();
    let base = match number.strip_prefix("0x") {
        Some(digits) => usize::from_str_radix(digits, 16).ok()?,
        None => number.parse::<usize>().ok()?,
    };
    let shift = match captures
        .get(2)
        .and_then(|unit| unit.as_str().chars().next())
        .map(|c| c.to_ascii_lowercase())
    {
        Some('k') => 10,
        Some('m') => 20,
        Some('g') => 30,
        _ => 0,
    };
    base.checked_mul(1usize << shift)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
