//! Persisted user settings.
//!
//! Settings are a flat JSON object. Missing keys take their defaults, so an old or partial
//! file still loads. The core only reads [`Settings`] snapshots through [`SettingsSource`].

use crate::backup::archive::CompressionProfile;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::retention::{RetentionPolicy, DEFAULT_RECENT_WINDOW};
use crate::backup::schedule::{ScheduleConfig, ScheduleUnit};
use bon::Builder;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use validator::{Validate, ValidationError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate, Builder)]
#[serde(default)]
pub struct Settings {
    #[validate(length(min = 1))]
    #[builder(into, default = "_retail_".to_string())]
    pub wow_version: String,
    #[builder(into, default = default_wow_base_dir())]
    pub wow_base_dir: PathBuf,
    #[builder(into, default = std::env::temp_dir().join("WoWBackup"))]
    pub temp_base_dir: PathBuf,
    #[builder(into, default = home_dir().join("WoWBackups"))]
    pub dest_dir: PathBuf,
    #[builder(default)]
    pub verbose: bool,
    #[builder(default = true)]
    pub fast_compression: bool,
    #[builder(default)]
    pub enable_scheduler: bool,
    #[validate(range(min = 1))]
    #[builder(default = 24)]
    pub schedule_interval: u32,
    #[builder(default)]
    pub schedule_unit: ScheduleUnit,
    #[validate(length(min = 1), custom(function = validate_source_dir_names))]
    #[builder(default = vec!["Interface".to_string(), "WTF".to_string()])]
    pub source_dirs: Vec<String>,
    #[serde(with = "humantime_serde")]
    #[builder(default = DEFAULT_RECENT_WINDOW)]
    pub retention_window: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::builder().build()
    }
}

impl Settings {
    /// `<wow_base_dir>/<wow_version>`, the parent of every source directory.
    pub fn wow_dir(&self) -> PathBuf {
        self.wow_base_dir.join(&self.wow_version)
    }

    pub fn source_paths(&self) -> Vec<PathBuf> {
        let wow_dir = self.wow_dir();
        self.source_dirs.iter().map(|name| wow_dir.join(name)).collect()
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            enabled: self.enable_scheduler,
            interval: self.schedule_interval,
            unit: self.schedule_unit,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.retention_window)
    }

    pub fn compression_profile(&self) -> CompressionProfile {
        CompressionProfile::from_fast_flag(self.fast_compression)
    }
}

/// Source directories are joined under the game directory, so each must be one plain name.
fn validate_source_dir_names(names: &Vec<String>) -> std::result::Result<(), ValidationError> {
    for name in names {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(ValidationError::new("InvalidSourceDir")
                    .with_message(format!("{name:?} must be a single directory name").into()))
            }
        }
    }
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(windows)]
fn default_wow_base_dir() -> PathBuf {
    let program_files = PathBuf::from(r"C:\Program Files (x86)\World of Warcraft");
    if program_files.exists() {
        program_files
    } else {
        PathBuf::from(r"C:\World of Warcraft")
    }
}

#[cfg(target_os = "macos")]
fn default_wow_base_dir() -> PathBuf {
    PathBuf::from("/Applications/World of Warcraft")
}

#[cfg(not(any(windows, target_os = "macos")))]
fn default_wow_base_dir() -> PathBuf {
    home_dir().join("Games").join("world-of-warcraft")
}

/// Read access to the current settings. Every call returns a fresh, validated snapshot.
pub trait SettingsSource: Debug + Send + Sync {
    fn snapshot(&self) -> Result<Settings>;
}

/// Settings kept in a JSON file, re-read on every snapshot so external edits are picked up.
#[derive(Clone, Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the file, or the defaults if it does not exist yet.
    pub fn load(&self) -> Result<Settings> {
        let settings = if self.path.exists() {
            let file = std::fs::File::open(&self.path)?;
            serde_json::from_reader::<_, Settings>(std::io::BufReader::new(file))
                .map_err(Error::from)
                .with_msg(format!("Parse JSON settings failed: {:?}", self.path))?
        } else {
            debug!("Settings file {:?} not found, using defaults", self.path);
            Settings::default()
        };
        settings
            .validate()
            .map_err(Error::from)
            .with_msg(format!("Settings validation failed: {:?}", self.path))?;
        Ok(settings)
    }

    /// Writes pretty JSON to a temp file next to the target, then renames it into place.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, settings)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::from(e.error))?;
        info!("Settings saved to {:?}", self.path);
        Ok(())
    }
}

impl SettingsSource for JsonSettingsStore {
    fn snapshot(&self) -> Result<Settings> {
        self.load()
    }
}

/// In-memory settings shared between threads.
#[derive(Clone, Debug, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn get(&self) -> Settings {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Applies `f` and returns the updated value.
    pub fn update<F: FnOnce(&mut Settings)>(&self, f: F) -> Settings {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
        guard.clone()
    }
}

impl SettingsSource for SharedSettings {
    fn snapshot(&self) -> Result<Settings> {
        let settings = self.get();
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_object_takes_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.wow_version, "_retail_");
        assert!(settings.fast_compression);
        assert!(!settings.enable_scheduler);
        assert_eq!(settings.schedule_interval, 24);
        assert_eq!(settings.schedule_unit, ScheduleUnit::Hours);
        assert_eq!(settings.source_dirs, vec!["Interface", "WTF"]);
        assert_eq!(settings.retention_window, DEFAULT_RECENT_WINDOW);
    }

    #[test]
    fn test_flat_json_keys() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "wow_version": "_classic_",
                "wow_base_dir": "/games/wow",
                "temp_base_dir": "/tmp/stage",
                "dest_dir": "/backups",
                "verbose": true,
                "fast_compression": false,
                "enable_scheduler": true,
                "schedule_interval": 15,
                "schedule_unit": "minutes",
                "retention_window": "7days"
            }"#,
        )
        .unwrap();

        assert_eq!(
            settings.source_paths(),
            vec![
                PathBuf::from("/games/wow/_classic_/Interface"),
                PathBuf::from("/games/wow/_classic_/WTF")
            ]
        );
        assert_eq!(
            settings.schedule_config(),
            ScheduleConfig {
                enabled: true,
                interval: 15,
                unit: ScheduleUnit::Minutes
            }
        );
        assert_eq!(settings.compression_profile(), CompressionProfile::Maximum);
        assert_eq!(settings.retention_policy().recent_window, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let zero = Settings::builder().schedule_interval(0).build();
        assert!(zero.validate().is_err());

        let no_version = Settings::builder().wow_version("").build();
        assert!(no_version.validate().is_err());

        let escaping = Settings::builder()
            .source_dirs(vec!["../Interface".to_string()])
            .build();
        assert!(escaping.validate().is_err());

        let none = Settings::builder().source_dirs(vec![]).build();
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_store_save_then_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = JsonSettingsStore::new(dir.path().join("config.json"));
        assert_eq!(store.snapshot().unwrap(), Settings::default());

        let settings = Settings::builder()
            .dest_dir(dir.path().join("out"))
            .enable_scheduler(true)
            .build();
        store.save(&settings).unwrap();

        assert_eq!(store.snapshot().unwrap(), settings);
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["schedule_unit"], "hours");
        assert_eq!(raw["retention_window"], "30days");
    }

    #[test]
    fn test_store_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"schedule_interval": 0}"#).unwrap();

        let err = JsonSettingsStore::new(&path).snapshot().unwrap_err();
        assert!(err.is_pre_mutation());
        assert!(err.to_string().contains("Settings validation failed"));
    }

    #[test]
    fn test_shared_settings_update_is_visible() {
        let shared = SharedSettings::default();
        let other = shared.clone();
        other.update(|s| s.schedule_interval = 3);
        assert_eq!(shared.snapshot().unwrap().schedule_interval, 3);
    }
}
