use crate::defaults;
use crate::error::{ChirpError, Result};
use crate::modem::{ChannelSelect, HeaderVariant, SenderId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub modem: ModemConfig,
    pub identity: IdentityConfig,
}

/// Audio endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub output_rate: u32,
    pub output_channel: ChannelSelect,
    pub record_rate: u32,
    pub record_channel: ChannelSelect,
    /// Audio host to open devices on (e.g. "alsa", "jack"); `None` picks
    /// the platform default.
    pub source: Option<String>,
    /// Capture device name; `None` picks the system default.
    pub capture_device: Option<String>,
    /// Playback device name; `None` picks the system default.
    pub playback_device: Option<String>,
}

/// Parameters passed through to the modem encoder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModemConfig {
    pub carrier_frequency: i32,
    pub noise_symbols: u32,
    pub fancy_header: bool,
}

/// Who we are and the shared secret
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    pub sender_id: String,
    pub password: String,
    /// Unsent composer text, kept across restarts.
    pub draft: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_rate: defaults::SAMPLE_RATE,
            output_channel: ChannelSelect::Mono,
            record_rate: defaults::SAMPLE_RATE,
            record_channel: ChannelSelect::Mono,
            source: None,
            capture_device: None,
            playback_device: None,
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            carrier_frequency: defaults::CARRIER_FREQUENCY,
            noise_symbols: defaults::NOISE_SYMBOLS,
            fancy_header: false,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            sender_id: defaults::SENDER_ID.to_string(),
            password: defaults::PASSWORD.to_string(),
            draft: String::new(),
        }
    }
}

/// Capture endpoint settings; a change forces the endpoint to be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub channel: ChannelSelect,
    pub source: Option<String>,
    pub device: Option<String>,
}

/// Playback endpoint settings; a change forces the endpoint to be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    pub sample_rate: u32,
    pub channel: ChannelSelect,
    pub source: Option<String>,
    pub device: Option<String>,
}

/// Validated, read-only view of the configuration handed to each operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub output_rate: u32,
    pub output_channel: ChannelSelect,
    pub record_rate: u32,
    pub record_channel: ChannelSelect,
    pub source: Option<String>,
    pub capture_device: Option<String>,
    pub playback_device: Option<String>,
    pub carrier_frequency: i32,
    pub noise_symbols: u32,
    pub header: HeaderVariant,
    pub password: String,
    pub sender_id: SenderId,
}

impl SessionConfig {
    pub fn capture(&self) -> CaptureSettings {
        CaptureSettings {
            sample_rate: self.record_rate,
            channel: self.record_channel,
            source: self.source.clone(),
            device: self.capture_device.clone(),
        }
    }

    pub fn playback(&self) -> PlaybackSettings {
        PlaybackSettings {
            sample_rate: self.output_rate,
            channel: self.output_channel,
            source: self.source.clone(),
            device: self.playback_device.clone(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_rate: defaults::SAMPLE_RATE,
            output_channel: ChannelSelect::Mono,
            record_rate: defaults::SAMPLE_RATE,
            record_channel: ChannelSelect::Mono,
            source: None,
            capture_device: None,
            playback_device: None,
            carrier_frequency: defaults::CARRIER_FREQUENCY,
            noise_symbols: defaults::NOISE_SYMBOLS,
            header: HeaderVariant::Plain,
            password: defaults::PASSWORD.to_string(),
            sender_id: SenderId::from_wire(defaults::SENDER_ID.as_bytes()),
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ChirpError {
    ChirpError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns [`ChirpError::ConfigParse`] if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| ChirpError::ConfigParse {
                message: format!("{}: {}", path.display(), e),
            })?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CHIRPGRAM_SENDER_ID → identity.sender_id
    /// - CHIRPGRAM_PASSWORD → identity.password
    /// - CHIRPGRAM_CAPTURE_DEVICE → audio.capture_device
    /// - CHIRPGRAM_PLAYBACK_DEVICE → audio.playback_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(sender_id) = std::env::var("CHIRPGRAM_SENDER_ID")
            && !sender_id.is_empty()
        {
            self.identity.sender_id = sender_id;
        }

        if let Ok(password) = std::env::var("CHIRPGRAM_PASSWORD")
            && !password.is_empty()
        {
            self.identity.password = password;
        }

        if let Ok(device) = std::env::var("CHIRPGRAM_CAPTURE_DEVICE")
            && !device.is_empty()
        {
            self.audio.capture_device = Some(device);
        }

        if let Ok(device) = std::env::var("CHIRPGRAM_PLAYBACK_DEVICE")
            && !device.is_empty()
        {
            self.audio.playback_device = Some(device);
        }

        self
    }

    /// Check every value against what the modem and peers accept.
    pub fn validate(&self) -> Result<()> {
        for (key, rate) in [
            ("audio.output_rate", self.audio.output_rate),
            ("audio.record_rate", self.audio.record_rate),
        ] {
            if !defaults::SUPPORTED_RATES.contains(&rate) {
                return Err(invalid(
                    key,
                    format!("{} Hz is not one of {:?}", rate, defaults::SUPPORTED_RATES),
                ));
            }
        }

        if !self.audio.output_channel.supports_playback() {
            return Err(invalid(
                "audio.output_channel",
                "channel summation is only available for capture",
            ));
        }

        let min_carrier = if self.audio.output_channel == ChannelSelect::Analytic {
            -defaults::MAX_CARRIER_FREQUENCY
        } else {
            defaults::MIN_CARRIER_FREQUENCY
        };
        let carrier = self.modem.carrier_frequency;
        if carrier < min_carrier
            || carrier > defaults::MAX_CARRIER_FREQUENCY
            || (carrier - min_carrier) % defaults::CARRIER_STEP != 0
        {
            return Err(invalid(
                "modem.carrier_frequency",
                format!(
                    "{} Hz must lie in {}..={} Hz on a {} Hz grid",
                    carrier,
                    min_carrier,
                    defaults::MAX_CARRIER_FREQUENCY,
                    defaults::CARRIER_STEP
                ),
            ));
        }

        if !defaults::SUPPORTED_NOISE_SYMBOLS.contains(&self.modem.noise_symbols) {
            return Err(invalid(
                "modem.noise_symbols",
                format!("must be one of {:?}", defaults::SUPPORTED_NOISE_SYMBOLS),
            ));
        }

        SenderId::new(&self.identity.sender_id)?;
        Ok(())
    }

    /// Validate and produce the per-operation session view.
    pub fn session(&self) -> Result<SessionConfig> {
        self.validate()?;
        Ok(SessionConfig {
            output_rate: self.audio.output_rate,
            output_channel: self.audio.output_channel,
            record_rate: self.audio.record_rate,
            record_channel: self.audio.record_channel,
            source: self.audio.source.clone(),
            capture_device: self.audio.capture_device.clone(),
            playback_device: self.audio.playback_device.clone(),
            carrier_frequency: self.modem.carrier_frequency,
            noise_symbols: self.modem.noise_symbols,
            header: if self.modem.fancy_header {
                HeaderVariant::Fancy
            } else {
                HeaderVariant::Plain
            },
            password: self.identity.password.clone(),
            sender_id: SenderId::new(&self.identity.sender_id)?,
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/chirpgram/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chirpgram")
            .join("config.toml")
    }
}
