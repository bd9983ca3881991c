use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod catalog;
pub mod config;
pub mod engine;
pub mod host;
pub mod memory;
pub mod randomizer;
pub mod refit;
pub mod scheduler;
pub mod slider;
pub mod tables;

use catalog::{Catalog, ClassificationPolicy};
use config::DistributionConfig;
use host::WorldRegistry;
use tables::RuleTables;

pub use engine::{Distributor, Resolution, Services, Tier};

/// Morph key holding preset sliders and the per-actor markers.
pub const PRESET_KEY: &str = "OBody";
/// Morph key holding the clothing refit overlay.
pub const REFIT_KEY: &str = "OClothe";
/// Marker set on actors that must never receive a preset.
pub const BLACKLIST_MORPH: &str = "obody_blacklisted";
/// Marker that keeps deferred applies away from actors another morph tool
/// is driving.
pub const GUARD_MORPH: &str = "obody_synthebd";

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid preset file {path}: {source}")]
    PresetFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, DistributionError>;

/// Inclusive range of whole seconds a deferred apply waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: u64,
    pub max: u64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self { min: 3, max: 7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub refit: bool,
    pub refit_nipple_sliders: bool,
    pub nipple_randomization: bool,
    pub genital_randomization: bool,
    /// Defer applies by a random delay instead of applying on the caller's
    /// thread.
    pub performance_mode: bool,
    /// Morph name of the processed marker.
    pub distribution_key: String,
    pub external_morph_guard: bool,
    pub seed: Option<u64>,
    pub deferred_delay_secs: DelayRange,
    pub preset_dir: PathBuf,
    pub config_path: PathBuf,
    pub policy: ClassificationPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refit: true,
            refit_nipple_sliders: false,
            nipple_randomization: true,
            genital_randomization: true,
            performance_mode: false,
            distribution_key: "obody_processed".to_string(),
            external_morph_guard: false,
            seed: None,
            deferred_delay_secs: DelayRange::default(),
            preset_dir: PathBuf::from("presets"),
            config_path: PathBuf::from("distribution.json"),
            policy: ClassificationPolicy::default(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&data)?;
        if settings.deferred_delay_secs.min > settings.deferred_delay_secs.max {
            return Err(DistributionError::Config(format!(
                "deferred_delay_secs min {} is greater than max {}",
                settings.deferred_delay_secs.min, settings.deferred_delay_secs.max
            )));
        }
        Ok(settings)
    }
}

/// Outcome of the load phase, for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub config_valid: bool,
    pub catalog_valid: bool,
    /// Preset files that could not be parsed.
    pub invalid_presets: usize,
    /// Config entries discarded because they name content that is not loaded.
    pub dropped_entries: usize,
}

/// Everything built during the load phase; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Loaded {
    pub catalog: Catalog,
    pub config: DistributionConfig,
    pub tables: RuleTables,
    pub report: LoadReport,
}

/// Read the distribution config and the preset directory named by
/// `settings` and validate them against `registry`.
///
/// Never fails: an unreadable config loads as empty and an unreadable preset
/// directory as an empty catalog, both flagged in the report.
pub fn load(settings: &Settings, registry: &dyn WorldRegistry) -> Loaded {
    let mut report = LoadReport::default();

    let mut config = match DistributionConfig::from_file(&settings.config_path) {
        Ok(config) => {
            report.config_valid = true;
            config
        }
        Err(err) => {
            log::warn!(
                "could not read distribution config {}: {}",
                settings.config_path.display(),
                err
            );
            DistributionConfig::default()
        }
    };

    let catalog = match Catalog::ingest(&settings.preset_dir, &settings.policy, &config.blacklisted_presets) {
        Ok(catalog) => {
            report.catalog_valid = true;
            catalog
        }
        Err(err) => {
            log::warn!("could not scan presets: {}", err);
            Catalog::default()
        }
    };
    report.invalid_presets = catalog.invalid_presets();

    Loaded::assemble(catalog, &mut config, registry, report)
}

impl Loaded {
    /// Validate already-parsed inputs. Used by [`load`] and by callers that
    /// build their catalog and config in memory.
    pub fn from_parts(catalog: Catalog, mut config: DistributionConfig, registry: &dyn WorldRegistry) -> Loaded {
        let report = LoadReport {
            config_valid: true,
            catalog_valid: true,
            invalid_presets: catalog.invalid_presets(),
            dropped_entries: 0,
        };
        Loaded::assemble(catalog, &mut config, registry, report)
    }

    fn assemble(
        catalog: Catalog,
        config: &mut DistributionConfig,
        registry: &dyn WorldRegistry,
        mut report: LoadReport,
    ) -> Loaded {
        let tables = RuleTables::build(config, registry);
        let filtered = config.filter_unloaded(registry);
        report.dropped_entries = tables.dropped() + filtered;

        if report.invalid_presets > 0 {
            log::warn!("{} preset files failed to load", report.invalid_presets);
        }

        Loaded {
            catalog,
            config: std::mem::take(config),
            tables,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Gender;
    use crate::memory::MemoryWorld;

    #[test]
    fn missing_inputs_degrade_to_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            preset_dir: dir.path().join("presets"),
            config_path: dir.path().join("missing.json"),
            ..Default::default()
        };
        let loaded = load(&settings, &MemoryWorld::new());
        assert!(!loaded.report.config_valid);
        assert!(!loaded.report.catalog_valid);
        assert!(loaded.catalog.all(Gender::Female).is_empty());
    }

    #[test]
    fn load_reads_config_presets_and_counts_drops() {
        let dir = tempfile::tempdir().unwrap();
        let presets = dir.path().join("presets");
        fs::create_dir(&presets).unwrap();
        fs::write(
            presets.join("set.json"),
            r#"{"presets":[{"name":"Athletic","set":"CBBE"},{"name":"Zeroed","set":"CBBE"}]}"#,
        )
        .unwrap();
        fs::write(presets.join("broken.json"), "[").unwrap();
        let config_path = dir.path().join("distribution.json");
        fs::write(
            &config_path,
            r#"{
                "blacklistedPresets": ["Zeroed"],
                "femaleFactionPresets": {"NoSuchFaction": ["Athletic"]},
                "blacklistedCharactersById": {"Missing.esp": ["00000D62"]}
            }"#,
        )
        .unwrap();

        let settings = Settings {
            preset_dir: presets,
            config_path,
            ..Default::default()
        };
        let loaded = load(&settings, &MemoryWorld::new());

        assert!(loaded.report.config_valid);
        assert!(loaded.report.catalog_valid);
        assert_eq!(loaded.report.invalid_presets, 1);
        assert_eq!(loaded.report.dropped_entries, 2);
        assert_eq!(loaded.catalog.eligible(Gender::Female).len(), 1);
        assert_eq!(loaded.catalog.blacklisted(Gender::Female).len(), 1);
        assert!(loaded.config.female_faction_presets.is_empty());
    }

    #[test]
    fn settings_file_rejects_inverted_delay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"deferred_delay_secs": {"min": 9, "max": 2}}"#).unwrap();
        assert!(matches!(Settings::from_file(&path), Err(DistributionError::Config(_))));

        fs::write(&path, r#"{"refit": false, "seed": 42}"#).unwrap();
        let settings = Settings::from_file(&path).unwrap();
        assert!(!settings.refit);
        assert_eq!(settings.seed, Some(42));
        assert_eq!(settings.deferred_delay_secs, DelayRange { min: 3, max: 7 });
    }
}
