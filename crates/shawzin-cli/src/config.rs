use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use shawzin_core::{ChordTable, ConversionConfig, InstrumentTables, ScaleTable};

/// Settings file used when `--config` is not given
pub(crate) fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shawzin")
        .join("config.toml")
}

/// An explicit settings file must load; the default one is optional
pub(crate) fn load_config(explicit: Option<&Path>) -> anyhow::Result<ConversionConfig> {
    if let Some(path) = explicit {
        return read_config(path);
    }
    let path = default_config_path();
    if !path.exists() {
        return Ok(ConversionConfig::default());
    }
    match read_config(&path) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("Ignoring {}: {:#}", path.display(), e);
            Ok(ConversionConfig::default())
        }
    }
}

fn read_config(path: &Path) -> anyhow::Result<ConversionConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading settings {}", path.display()))?;
    let config = toml::from_str(&text).with_context(|| format!("parsing settings {}", path.display()))?;
    debug!("Loaded settings from {}", path.display());
    Ok(config)
}

pub(crate) fn config_to_toml(config: &ConversionConfig) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

/// Built-in tables unless JSON replacements are given
pub(crate) fn load_tables(scales: Option<&Path>, chords: Option<&Path>) -> anyhow::Result<InstrumentTables> {
    let scales = match scales {
        Some(path) => ScaleTable::from_json_file(path)
            .with_context(|| format!("loading scale table {}", path.display()))?,
        None => ScaleTable::default(),
    };
    let chords = match chords {
        Some(path) => ChordTable::from_json_file(path)
            .with_context(|| format!("loading chord table {}", path.display()))?,
        None => ChordTable::default(),
    };
    Ok(InstrumentTables::new(scales, chords)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shawzin_core::{ArpOrder, ChordMode};

    #[test]
    fn test_explicit_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "grid = \"1/8\"\ntolerance = 10\n\n[chords]\nmode = \"arpeggiate\"\norder = \"descending\"\n",
        )
        .unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.grid.denominator(), 8);
        assert_eq!(config.tolerance, 10);
        assert_eq!(config.chords.mode, ChordMode::Arpeggiate);
        assert_eq!(config.chords.order, ArpOrder::Descending);
    }

    #[test]
    fn test_explicit_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "grid = \"1/zero\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_config_survives_toml_round_trip() {
        let config = ConversionConfig::default();
        let text = config_to_toml(&config).unwrap();
        let back: ConversionConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_custom_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chords.json");
        std::fs::write(&path, r#"{"chords":[{"name":"fifth","intervals":[0,7],"symbol":"Z"}]}"#).unwrap();
        let tables = load_tables(None, Some(&path)).unwrap();
        assert_eq!(tables.chords.chords.len(), 1);
        assert_eq!(tables.scales.len(), 9);

        std::fs::write(&path, r#"{"chords":[{"name":"one","intervals":[0]}]}"#).unwrap();
        assert!(load_tables(None, Some(&path)).is_err());
    }
}
