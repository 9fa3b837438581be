use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::theme::DEFAULT_THEME;

// ---------------------------------------------------------------------------
// Panel bounds
// ---------------------------------------------------------------------------

/// Minimum/maximum width for the resizable side panels, in px.
pub const MIN_PANEL_WIDTH: u32 = 180;
pub const MAX_PANEL_WIDTH: u32 = 480;
pub const DEFAULT_SIDEBAR_WIDTH: u32 = 260;
pub const DEFAULT_OUTLINE_WIDTH: u32 = 240;

/// Default port of the file-serving backend.
pub const DEFAULT_PORT: u16 = 6275;

// ---------------------------------------------------------------------------
// ConfigFile — deserialized from TOML (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    pub port: Option<u16>,
    pub theme: Option<String>,
    #[serde(default)]
    pub panels: PanelConfigFile,
}

#[derive(Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PanelConfigFile {
    pub sidebar_width: Option<u32>,
    pub outline_width: Option<u32>,
}

// ---------------------------------------------------------------------------
// Config — resolved (all fields concrete)
// ---------------------------------------------------------------------------

pub struct Config {
    pub port: u16,
    pub theme: String,
    pub panels: PanelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelConfig {
    pub sidebar_width: u32,
    pub outline_width: u32,
}

impl Config {
    /// Base URL of the backend this client talks to.
    pub fn server_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// A stored width is honored only inside the allowed bounds; anything else
/// falls back to the per-panel default.
fn resolve_width(stored: Option<u32>, default: u32) -> u32 {
    match stored {
        Some(w) if (MIN_PANEL_WIDTH..=MAX_PANEL_WIDTH).contains(&w) => w,
        Some(w) => {
            debug!("config: panel width {w} out of range, using default {default}");
            default
        }
        None => default,
    }
}

impl ConfigFile {
    /// Merge CLI values (overwrites non-None fields).
    pub fn merge_cli(&mut self, port: Option<u16>, theme: Option<String>) {
        if let Some(v) = port {
            debug!("config: CLI override port={v}");
            self.port = port;
        }
        if let Some(ref v) = theme {
            debug!("config: CLI override theme={v}");
            self.theme = theme;
        }
    }

    /// Resolve to a Config by applying defaults to missing fields and
    /// bounds-checking the stored panel widths.
    pub fn resolve(self) -> Config {
        let config = Config {
            port: self.port.unwrap_or(DEFAULT_PORT),
            theme: self.theme.unwrap_or_else(|| DEFAULT_THEME.into()),
            panels: PanelConfig {
                sidebar_width: resolve_width(self.panels.sidebar_width, DEFAULT_SIDEBAR_WIDTH),
                outline_width: resolve_width(self.panels.outline_width, DEFAULT_OUTLINE_WIDTH),
            },
        };
        info!(
            "config: resolved port={}, theme={}, sidebar_width={}, outline_width={}",
            config.port, config.theme, config.panels.sidebar_width, config.panels.outline_width,
        );
        config
    }
}

/// Clamp a requested panel width into the allowed bounds.
pub fn clamp_panel_width(width: u32) -> u32 {
    width.clamp(MIN_PANEL_WIDTH, MAX_PANEL_WIDTH)
}

/// Resolve the XDG config path for mdlive.
fn config_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(config_dir.join("mdlive").join("config.toml"))
}

/// Load config file. Returns `ConfigFile::default()` if no file exists.
/// Returns an error if the file exists but cannot be parsed.
pub fn load_config() -> anyhow::Result<ConfigFile> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            info!("config: no HOME or XDG_CONFIG_HOME set, using defaults");
            return Ok(ConfigFile::default());
        }
    };
    debug!("config: looking for {}", path.display());
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            info!("config: loaded from {}", path.display());
            let cfg: ConfigFile = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            Ok(ConfigFile::default())
        }
        Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    }
}

/// Persist the preferences that survive a reload: theme and panel widths.
///
/// Failure is non-fatal for the viewer; callers log and continue.
pub fn save_preferences(theme: &str, panels: PanelConfig) -> anyhow::Result<()> {
    let path = config_path()
        .ok_or_else(|| anyhow::anyhow!("no HOME or XDG_CONFIG_HOME set, cannot save"))?;
    // Re-read so unrelated settings (e.g. port) survive the rewrite.
    let mut cfg = load_config().unwrap_or_default();
    cfg.theme = Some(theme.to_string());
    cfg.panels.sidebar_width = Some(panels.sidebar_width);
    cfg.panels.outline_width = Some(panels.outline_width);
    let text = toml::to_string_pretty(&cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, text)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
    debug!("config: saved preferences to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml() {
        let cfg: ConfigFile = toml::from_str("").unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.port, 6275);
        assert_eq!(resolved.theme, "light");
        assert_eq!(resolved.panels.sidebar_width, 260);
        assert_eq!(resolved.panels.outline_width, 240);
    }

    #[test]
    fn partial_toml() {
        let text = r#"
            theme = "dark"
            [panels]
            sidebar_width = 300
        "#;
        let cfg: ConfigFile = toml::from_str(text).unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.theme, "dark");
        assert_eq!(resolved.panels.sidebar_width, 300);
        // Defaults for unspecified fields
        assert_eq!(resolved.port, 6275);
        assert_eq!(resolved.panels.outline_width, 240);
    }

    #[test]
    fn invalid_toml() {
        let text = "this is not valid toml [[[";
        let result = toml::from_str::<ConfigFile>(text);
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_widths_fall_back_to_defaults() {
        let text = r#"
            [panels]
            sidebar_width = 12
            outline_width = 4000
        "#;
        let cfg: ConfigFile = toml::from_str(text).unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.panels.sidebar_width, DEFAULT_SIDEBAR_WIDTH);
        assert_eq!(resolved.panels.outline_width, DEFAULT_OUTLINE_WIDTH);
    }

    #[test]
    fn boundary_widths_are_honored() {
        let text = r#"
            [panels]
            sidebar_width = 180
            outline_width = 480
        "#;
        let cfg: ConfigFile = toml::from_str(text).unwrap();
        let resolved = cfg.resolve();
        assert_eq!(resolved.panels.sidebar_width, 180);
        assert_eq!(resolved.panels.outline_width, 480);
    }

    #[test]
    fn cli_overrides() {
        let mut cfg: ConfigFile = toml::from_str("port = 7000").unwrap();
        cfg.merge_cli(Some(8000), Some("dark".into()));
        let resolved = cfg.resolve();
        assert_eq!(resolved.port, 8000); // CLI wins
        assert_eq!(resolved.theme, "dark");
    }

    #[test]
    fn clamp_panel_width_bounds() {
        assert_eq!(clamp_panel_width(10), MIN_PANEL_WIDTH);
        assert_eq!(clamp_panel_width(300), 300);
        assert_eq!(clamp_panel_width(9999), MAX_PANEL_WIDTH);
    }
}
