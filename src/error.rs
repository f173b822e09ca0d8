//! Error types for chirpgram.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChirpError {
    // Envelope errors
    #[error("Malformed envelope: {message}")]
    Format { message: String },

    #[error("Envelope authentication failed: {message}")]
    Auth { message: String },

    #[error("Message too large: {size} bytes exceeds the {limit} byte budget")]
    Capacity { size: usize, limit: usize },

    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio device error: {message}")]
    AudioDevice { message: String },

    // Modem errors
    #[error("Modem resources exhausted: {message}")]
    ResourceExhausted { message: String },

    // Transcript persistence errors
    #[error("Transcript error: {0}")]
    Transcript(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ChirpError {
    /// True for errors that halt an audio lane until it is explicitly
    /// reinitialised.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChirpError::ResourceExhausted { .. })
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ChirpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_format_display() {
        let error = ChirpError::Format {
            message: "length 0 is not a positive multiple of 16".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed envelope: length 0 is not a positive multiple of 16"
        );
    }

    #[test]
    fn test_auth_display() {
        let error = ChirpError::Auth {
            message: "bad padding".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Envelope authentication failed: bad padding"
        );
    }

    #[test]
    fn test_capacity_display() {
        let error = ChirpError::Capacity {
            size: 160,
            limit: 153,
        };
        assert_eq!(
            error.to_string(),
            "Message too large: 160 bytes exceeds the 153 byte budget"
        );
    }

    #[test]
    fn test_config_parse_display() {
        let error = ChirpError::ConfigParse {
            message: "config.toml: expected `]`".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to parse configuration: config.toml: expected `]`"
        );
    }

    #[test]
    fn test_config_invalid_value_display() {
        let error = ChirpError::ConfigInvalidValue {
            key: "modem.noise_symbols".to_string(),
            message: "must be one of 0, 1, 3, 6, 11, 22".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for modem.noise_symbols: must be one of 0, 1, 3, 6, 11, 22"
        );
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = ChirpError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_audio_device_display() {
        let error = ChirpError::AudioDevice {
            message: "stream closed".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device error: stream closed");
    }

    #[test]
    fn test_resource_exhausted_display_and_fatality() {
        let error = ChirpError::ResourceExhausted {
            message: "decoder heap".to_string(),
        };
        assert_eq!(error.to_string(), "Modem resources exhausted: decoder heap");
        assert!(error.is_fatal());
        assert!(!ChirpError::Other("x".to_string()).is_fatal());
    }

    #[test]
    fn test_other_display() {
        let error = ChirpError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ChirpError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: ChirpError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<Vec<String>>("[oops").unwrap_err();
        let error: ChirpError = json_error.into();
        assert!(error.to_string().starts_with("Transcript error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: ChirpError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ChirpError>();
        assert_sync::<ChirpError>();
    }
}
