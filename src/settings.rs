//! Persisted voice settings.
//!
//! Small JSON blob under the user config dir, loaded once at startup and
//! rewritten on every change. The speech engine takes a snapshot per
//! utterance, so edits never retroactively affect something already speaking.

use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RATE_RANGE: RangeInclusive<f32> = 0.1..=2.0;
pub const PITCH_RANGE: RangeInclusive<f32> = 0.0..=2.0;
pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;

const SETTINGS_FILE: &str = "voice_settings.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to write settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Voice output parameters, mirrored onto every enqueued utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub lang: String,
    /// Preferred voice name, matched by substring against the device's
    /// voice list when supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            rate: 0.8,
            pitch: 1.0,
            volume: 0.8,
            lang: "ko-KR".to_string(),
            voice: None,
        }
    }
}

impl VoiceSettings {
    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate.clamp(*RATE_RANGE.start(), *RATE_RANGE.end());
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch.clamp(*PITCH_RANGE.start(), *PITCH_RANGE.end());
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(*VOLUME_RANGE.start(), *VOLUME_RANGE.end());
    }

    /// Pull every field back into its nominal range. Applied to values read
    /// from disk, which may have been hand-edited.
    fn normalized(mut self) -> Self {
        self.set_rate(self.rate);
        self.set_pitch(self.pitch);
        self.set_volume(self.volume);
        if self.lang.trim().is_empty() {
            self.lang = VoiceSettings::default().lang;
        }
        self
    }
}

/// Loads and saves [`VoiceSettings`] at a fixed path.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store under the platform config directory (`<config>/dasom/`).
    pub fn open_default() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: base.join("dasom").join(SETTINGS_FILE),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read settings from disk. A missing or corrupt file degrades to the
    /// defaults rather than failing startup.
    pub fn load(&self) -> VoiceSettings {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<VoiceSettings>(&raw) {
                Ok(settings) => settings.normalized(),
                Err(e) => {
                    warn!(
                        "settings file {} is corrupt ({}), using defaults",
                        self.path.display(),
                        e
                    );
                    VoiceSettings::default()
                }
            },
            Err(_) => VoiceSettings::default(),
        }
    }

    pub fn save(&self, settings: &VoiceSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}
