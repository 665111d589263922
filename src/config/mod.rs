//! Configuration management for Skyris voice
//!
//! Layers, lowest priority first: built-in defaults, the TOML config file,
//! `SKYRIS_*` environment variables.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::voice::{
    CaptureConstraints, FRAME_SIZE, RecognizerOptions, SAMPLE_RATE, SessionOptions, VadConfig,
};
use crate::{Error, Result};

/// Default AI backend for local development
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5001";

/// Skyris voice configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Speech engine settings
    pub speech: SpeechConfig,

    /// AI backend connection
    pub backend: BackendConfig,

    /// Directory receiving a WAV copy of every utterance, if set
    pub recordings_dir: Option<PathBuf>,
}

/// Speech interaction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Recognition language
    pub language: String,

    /// Continuous recognition mode
    pub continuous: bool,

    /// Emit interim transcripts
    pub interim_results: bool,

    /// Frames louder than this (dB) count as speech
    pub silence_threshold_db: f32,

    /// Silence that ends an utterance (ms)
    pub silence_time_ms: u64,

    /// Silence before the session goes to sleep (ms)
    pub no_speech_timeout_ms: u64,

    /// Resume listening automatically after the AI finishes speaking
    pub auto_restart: bool,

    /// Exchanges kept as conversation context
    pub max_conversation_turns: usize,

    /// Keep capturing audio when live recognition is unavailable
    pub fallback_to_local_capture: bool,

    /// Capture sample rate (Hz)
    pub sample_rate: u32,

    /// Samples per analysis frame
    pub frame_size: usize,

    /// Sustained sound needed to wake from sleep (ms)
    pub wake_debounce_ms: u64,

    /// Delay before restarting recognition (ms)
    pub restart_delay_ms: u64,

    /// Delay before listening again after the AI finishes (ms)
    pub auto_restart_delay_ms: u64,

    /// Automatic recognition restarts before giving up
    pub max_restart_attempts: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_string(),
            continuous: false,
            interim_results: true,
            silence_threshold_db: -50.0,
            silence_time_ms: 1500,
            no_speech_timeout_ms: 10_000,
            auto_restart: true,
            max_conversation_turns: 10,
            fallback_to_local_capture: true,
            sample_rate: SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            wake_debounce_ms: 300,
            restart_delay_ms: 500,
            auto_restart_delay_ms: 500,
            max_restart_attempts: 3,
        }
    }
}

impl SpeechConfig {
    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.language.trim().is_empty() {
            return Err(Error::Config("speech.language must not be empty".to_string()));
        }
        if !self.silence_threshold_db.is_finite() || self.silence_threshold_db > 0.0 {
            return Err(Error::Config(format!(
                "speech.silence_threshold_db must be a finite value <= 0, got {}",
                self.silence_threshold_db
            )));
        }
        if self.max_conversation_turns == 0 {
            return Err(Error::Config(
                "speech.max_conversation_turns must be at least 1".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(Error::Config("speech.sample_rate must be positive".to_string()));
        }
        if self.frame_size == 0 {
            return Err(Error::Config("speech.frame_size must be positive".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub const fn silence_time(&self) -> Duration {
        Duration::from_millis(self.silence_time_ms)
    }

    #[must_use]
    pub const fn no_speech_timeout(&self) -> Duration {
        Duration::from_millis(self.no_speech_timeout_ms)
    }

    #[must_use]
    pub const fn auto_restart_delay(&self) -> Duration {
        Duration::from_millis(self.auto_restart_delay_ms)
    }

    /// Detector settings
    #[must_use]
    pub const fn vad_config(&self) -> VadConfig {
        VadConfig {
            silence_threshold_db: self.silence_threshold_db,
            silence_time: self.silence_time(),
            wake_debounce: Duration::from_millis(self.wake_debounce_ms),
        }
    }

    /// Microphone request
    #[must_use]
    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            sample_rate: self.sample_rate,
            frame_size: self.frame_size,
            ..CaptureConstraints::default()
        }
    }

    /// Recognition session settings
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            recognizer: RecognizerOptions {
                language: self.language.clone(),
                continuous: self.continuous,
                interim_results: self.interim_results,
            },
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            max_restart_attempts: self.max_restart_attempts,
            fallback_to_local_capture: self.fallback_to_local_capture,
        }
    }

    /// Apply `SKYRIS_*` overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(language) = lookup("SKYRIS_LANGUAGE") {
            self.language = language;
        }
        override_parsed(&lookup, "SKYRIS_SILENCE_THRESHOLD_DB", &mut self.silence_threshold_db)?;
        override_parsed(&lookup, "SKYRIS_SILENCE_TIME_MS", &mut self.silence_time_ms)?;
        override_parsed(&lookup, "SKYRIS_NO_SPEECH_TIMEOUT_MS", &mut self.no_speech_timeout_ms)?;
        override_parsed(&lookup, "SKYRIS_MAX_CONVERSATION_TURNS", &mut self.max_conversation_turns)?;
        if let Some(value) = lookup("SKYRIS_AUTO_RESTART") {
            self.auto_restart = parse_flag("SKYRIS_AUTO_RESTART", &value)?;
        }
        if let Some(value) = lookup("SKYRIS_FALLBACK_TO_LOCAL_CAPTURE") {
            self.fallback_to_local_capture = parse_flag("SKYRIS_FALLBACK_TO_LOCAL_CAPTURE", &value)?;
        }
        Ok(())
    }
}

/// AI backend connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL of the Skyris backend
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Speech synthesis style
    pub audio_style: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            timeout_secs: 15,
            audio_style: "fast".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the standard file location and environment
    ///
    /// # Errors
    ///
    /// Returns error if an override is malformed or a value is out of range
    pub fn load() -> Result<Self> {
        let config_file = file::config_file_path()
            .map(|path| file::load_config_file(&path))
            .unwrap_or_default();

        let mut config = Self::from_file_config(config_file);
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.speech.validate()?;

        tracing::debug!(
            language = %config.speech.language,
            backend = %config.backend.base_url,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Load configuration from an explicit file, without environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or a value is out of range
    pub fn from_path(path: &Path) -> Result<Self> {
        let config = Self::from_file_config(file::read_config_file(path)?);
        config.speech.validate()?;
        Ok(config)
    }

    fn from_file_config(file: file::SkyrisConfigFile) -> Self {
        let defaults = BackendConfig::default();
        let backend = BackendConfig {
            base_url: file.backend.url.unwrap_or(defaults.base_url),
            timeout_secs: file.backend.timeout_secs.unwrap_or(defaults.timeout_secs),
            audio_style: file.backend.audio_style.unwrap_or(defaults.audio_style),
        };

        Self {
            speech: file.speech,
            backend,
            recordings_dir: file.recordings_dir.map(PathBuf::from),
        }
    }

    /// Apply environment overrides read through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        self.speech.apply_env_with(&lookup)?;

        if let Some(url) = lookup("SKYRIS_BACKEND_URL") {
            self.backend.base_url = url;
        }
        override_parsed(&lookup, "SKYRIS_BACKEND_TIMEOUT_SECS", &mut self.backend.timeout_secs)?;
        if let Some(dir) = lookup("SKYRIS_RECORDINGS_DIR") {
            self.recordings_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<()> {
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {key}: {raw:?}")))?;
    }
    Ok(())
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(Error::Config(format!("invalid value for {key}: {value:?}"))),
    }
}
