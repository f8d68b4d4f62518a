//! Settings file: serde defaults, validation and env overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::constants::{config, defaults};

/// How many of the matched rules run when an identifier fires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireMode {
    /// Only the first rule in priority order
    #[default]
    HighestPriority,
    /// Every matched rule, back to back
    AllInOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Cool-down between recognition cycle starts
    #[serde(default = "default_min_cycle_interval_ms")]
    pub min_cycle_interval_ms: u64,

    /// Recognition calls running longer than this are abandoned
    #[serde(default = "default_recognition_timeout_ms")]
    pub recognition_timeout_ms: u64,

    /// Consecutive empty cycles that clear the armed identifier
    #[serde(default = "default_empty_reset_threshold")]
    pub empty_reset_threshold: u32,

    #[serde(default = "default_inter_character_delay_ms")]
    pub inter_character_delay_ms: u64,

    #[serde(default)]
    pub fire_mode: FireMode,

    #[serde(default)]
    pub start_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizerSettings {
    /// Shell pipeline printing the recognized screen text to stdout
    #[serde(default = "default_recognizer_command")]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSettings {
    #[serde(default = "default_tap_duration_ms")]
    pub tap_duration_ms: u64,

    /// Prefer typing the output directly when the focused window allows it
    #[serde(default)]
    pub text_injection: bool,

    /// Window title substrings that accept direct text (empty = any window)
    #[serde(default)]
    pub injection_windows: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ydotool_socket: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub recognizer: RecognizerSettings,

    #[serde(default)]
    pub input: InputSettings,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_frame_interval_ms() -> u64 {
    defaults::FRAME_INTERVAL_MS
}

fn default_min_cycle_interval_ms() -> u64 {
    defaults::MIN_CYCLE_INTERVAL_MS
}

fn default_recognition_timeout_ms() -> u64 {
    defaults::RECOGNITION_TIMEOUT_MS
}

fn default_empty_reset_threshold() -> u32 {
    defaults::EMPTY_RESET_THRESHOLD
}

fn default_inter_character_delay_ms() -> u64 {
    defaults::INTER_CHARACTER_DELAY_MS
}

fn default_recognizer_command() -> String {
    defaults::RECOGNIZER_COMMAND.to_string()
}

fn default_tap_duration_ms() -> u64 {
    defaults::TAP_DURATION_MS
}

fn default_log_level() -> String {
    defaults::LOG_LEVEL.to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            min_cycle_interval_ms: default_min_cycle_interval_ms(),
            recognition_timeout_ms: default_recognition_timeout_ms(),
            empty_reset_threshold: default_empty_reset_threshold(),
            inter_character_delay_ms: default_inter_character_delay_ms(),
            fire_mode: FireMode::default(),
            start_paused: false,
        }
    }
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            command: default_recognizer_command(),
        }
    }
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            tap_duration_ms: default_tap_duration_ms(),
            text_injection: false,
            injection_windows: Vec::new(),
            ydotool_socket: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            recognizer: RecognizerSettings::default(),
            input: InputSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl EngineSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn min_cycle_interval(&self) -> Duration {
        Duration::from_millis(self.min_cycle_interval_ms)
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }

    pub fn inter_character_delay(&self) -> Duration {
        Duration::from_millis(self.inter_character_delay_ms)
    }
}

impl InputSettings {
    pub fn tap_duration(&self) -> Duration {
        Duration::from_millis(self.tap_duration_ms)
    }
}

/// Clamp `value` into `[min, max]`, warning when it moves
fn clamp_field<T>(field: &str, value: &mut T, min: T, max: T)
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if *value < min {
        warn!(field = field, value = %value, min = %min, "Setting below minimum, clamping");
        *value = min;
    } else if *value > max {
        warn!(field = field, value = %value, max = %max, "Setting exceeds maximum, clamping");
        *value = max;
    }
}

impl Settings {
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::FILENAME);
        path
    }

    /// `log_level` from the settings file, without validating anything else
    ///
    /// Logging is set up before the full load so its warnings are visible.
    pub fn peek_log_level() -> Option<String> {
        let contents = fs::read_to_string(Self::config_path()).ok()?;
        let value: serde_json::Value = serde_json::from_str(&contents).ok()?;
        value.get("log_level")?.as_str().map(str::to_string)
    }

    /// Load from the default location, writing defaults there if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`
    ///
    /// A missing file is created with defaults. A file that fails to parse is
    /// an error and is left untouched.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str::<Settings>(&contents)
                .with_context(|| format!("Failed to parse settings file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let settings = Settings::default();
                if let Err(e) = settings.save_to(path) {
                    error!(path = %path.display(), error = ?e, "Failed to write default settings");
                } else {
                    info!(path = %path.display(), "Generated settings file for user to edit (env vars still override)");
                }
                settings
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read settings file {}", path.display()));
            }
        };

        settings.apply_env_overrides();
        settings.validate_and_clamp();
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings file to {}", path.display()))?;
        Ok(())
    }

    /// Clamp numeric fields into safe ranges
    pub fn validate_and_clamp(&mut self) {
        use crate::constants::validation::*;

        let engine = &mut self.engine;
        clamp_field(
            "engine.frame_interval_ms",
            &mut engine.frame_interval_ms,
            MIN_FRAME_INTERVAL_MS,
            MAX_FRAME_INTERVAL_MS,
        );
        clamp_field(
            "engine.min_cycle_interval_ms",
            &mut engine.min_cycle_interval_ms,
            MIN_CYCLE_INTERVAL_MS,
            MAX_CYCLE_INTERVAL_MS,
        );
        clamp_field(
            "engine.recognition_timeout_ms",
            &mut engine.recognition_timeout_ms,
            MIN_RECOGNITION_TIMEOUT_MS,
            MAX_RECOGNITION_TIMEOUT_MS,
        );
        clamp_field(
            "engine.empty_reset_threshold",
            &mut engine.empty_reset_threshold,
            MIN_EMPTY_THRESHOLD,
            MAX_EMPTY_THRESHOLD,
        );
        clamp_field(
            "engine.inter_character_delay_ms",
            &mut engine.inter_character_delay_ms,
            MIN_CHARACTER_DELAY_MS,
            MAX_CHARACTER_DELAY_MS,
        );
        clamp_field(
            "input.tap_duration_ms",
            &mut self.input.tap_duration_ms,
            MIN_TAP_DURATION_MS,
            MAX_TAP_DURATION_MS,
        );

        if self.recognizer.command.trim().is_empty() {
            warn!(using = defaults::RECOGNIZER_COMMAND, "recognizer.command is empty, using default");
            self.recognizer.command = default_recognizer_command();
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|var| env::var(var).ok());
    }

    /// Apply `AUTOTYPER_*` overrides read through `lookup`
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ms) = parse_num(&lookup, "AUTOTYPER_MIN_CYCLE_INTERVAL_MS") {
            self.engine.min_cycle_interval_ms = ms;
        }
        if let Some(ms) = parse_num(&lookup, "AUTOTYPER_CHAR_DELAY_MS") {
            self.engine.inter_character_delay_ms = ms;
        }
        if let Some(threshold) = parse_num(&lookup, "AUTOTYPER_EMPTY_THRESHOLD") {
            self.engine.empty_reset_threshold = threshold;
        }
        if let Some(command) = lookup("AUTOTYPER_RECOGNIZER_CMD")
            && !command.trim().is_empty()
        {
            self.recognizer.command = command;
        }
    }
}

fn parse_num<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<T>
where
    T: std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    let raw = lookup(var)?;
    raw.trim()
        .parse::<T>()
        .inspect_err(|e| error!(var = %var, error = ?e, "failed to parse env var"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_gets_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"engine":{"empty_reset_threshold":4}}"#).unwrap();
        assert_eq!(settings.engine.empty_reset_threshold, 4);
        assert_eq!(settings.engine.min_cycle_interval_ms, defaults::MIN_CYCLE_INTERVAL_MS);
        assert_eq!(settings.engine.fire_mode, FireMode::HighestPriority);
        assert_eq!(settings.input.tap_duration_ms, defaults::TAP_DURATION_MS);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_fire_mode_snake_case() {
        let settings: Settings =
            serde_json::from_str(r#"{"engine":{"fire_mode":"all_in_order"}}"#).unwrap();
        assert_eq!(settings.engine.fire_mode, FireMode::AllInOrder);
    }

    #[test]
    fn test_validate_and_clamp() {
        let mut settings = Settings::default();
        settings.engine.empty_reset_threshold = 0;
        settings.engine.min_cycle_interval_ms = 1;
        settings.engine.inter_character_delay_ms = 1_000_000;
        settings.input.tap_duration_ms = 0;
        settings.recognizer.command = "  ".to_string();
        settings.validate_and_clamp();

        use crate::constants::validation::*;
        assert_eq!(settings.engine.empty_reset_threshold, MIN_EMPTY_THRESHOLD);
        assert_eq!(settings.engine.min_cycle_interval_ms, MIN_CYCLE_INTERVAL_MS);
        assert_eq!(settings.engine.inter_character_delay_ms, MAX_CHARACTER_DELAY_MS);
        assert_eq!(settings.input.tap_duration_ms, MIN_TAP_DURATION_MS);
        assert_eq!(settings.recognizer.command, defaults::RECOGNIZER_COMMAND);
    }

    #[test]
    fn test_zero_character_delay_is_raised() {
        let vars: HashMap<&str, &str> = HashMap::from([("AUTOTYPER_CHAR_DELAY_MS", "0")]);
        let mut settings = Settings::default();
        settings.apply_overrides_from(|var| vars.get(var).map(|v| v.to_string()));
        assert_eq!(settings.engine.inter_character_delay_ms, 0);

        settings.validate_and_clamp();
        assert_eq!(
            settings.engine.inter_character_delay_ms,
            crate::constants::validation::MIN_CHARACTER_DELAY_MS
        );
        assert!(settings.engine.inter_character_delay() > std::time::Duration::ZERO);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("AUTOTYPER_MIN_CYCLE_INTERVAL_MS", "900"),
            ("AUTOTYPER_CHAR_DELAY_MS", " 120 "),
            ("AUTOTYPER_EMPTY_THRESHOLD", "not a number"),
            ("AUTOTYPER_RECOGNIZER_CMD", "cat /tmp/screen.txt"),
        ]);
        let mut settings = Settings::default();
        settings.apply_overrides_from(|var| vars.get(var).map(|v| v.to_string()));

        assert_eq!(settings.engine.min_cycle_interval_ms, 900);
        assert_eq!(settings.engine.inter_character_delay_ms, 120);
        assert_eq!(settings.engine.empty_reset_threshold, defaults::EMPTY_RESET_THRESHOLD);
        assert_eq!(settings.recognizer.command, "cat /tmp/screen.txt");
    }

    #[test]
    fn test_missing_file_written_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(config::FILENAME);

        let settings = Settings::load_from(&path).unwrap();
        assert!(path.exists());
        let reread: Settings = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread.engine, EngineSettings::default());
        assert_eq!(settings.input.injection_windows, Vec::<String>::new());
    }

    #[test]
    fn test_unparsable_file_is_error_and_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(config::FILENAME);
        fs::write(&path, "{ broken").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse settings file"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ broken");
    }
}
