use thiserror::Error;

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("File read error: {0}")]
    FileRead(#[from] FileReadError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No audio buffer loaded")]
    PlaybackBufferEmpty,
}

impl PlayerError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::FileRead(err) => err.user_message(),
            PlayerError::Conversion(err) => err.user_message(),
            PlayerError::Engine(err) => err.user_message(),
            PlayerError::Selection(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
            PlayerError::PlaybackBufferEmpty => {
                "No track is loaded yet - load a track first".to_string()
            }
        }
    }

    /// Check if this error allows for automatic recovery
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::FileRead(err) => err.is_recoverable(),
            PlayerError::Conversion(_) => false, // Requires a different file
            PlayerError::Engine(_) => true,      // Can retry the operation
            PlayerError::Selection(_) => true,   // Pool/history may change
            PlayerError::Config(_) => true,      // Can fall back to defaults
            PlayerError::PlaybackBufferEmpty => true, // Can load a track
        }
    }
}

/// Errors reading samples from the source track file
#[derive(Debug, Error)]
pub enum FileReadError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Read failed: {0}")]
    ReadFailed(String),
}

impl FileReadError {
    pub fn user_message(&self) -> String {
        match self {
            FileReadError::Open { path, .. } => {
                format!("Cannot open audio file: {}", path)
            }
            FileReadError::UnsupportedFormat { format } => {
                format!("Audio format '{}' is not supported", format)
            }
            FileReadError::ReadFailed(msg) => {
                format!("Failed to read audio data: {}", msg)
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            FileReadError::Open { .. } => false, // Requires valid file
            FileReadError::UnsupportedFormat { .. } => false, // Requires conversion
            FileReadError::ReadFailed(_) => true, // Can retry the load
        }
    }
}

/// Format conversion errors
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Failed to create converter: {0}")]
    CreateFailed(String),

    #[error("Plane count mismatch: expected {expected}, got {actual}")]
    MismatchedPlanes { expected: usize, actual: usize },

    #[error("Conversion failed: {0}")]
    ConvertFailed(String),

    #[error("Write of {len} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    DestinationOverflow {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

impl ConversionError {
    pub fn user_message(&self) -> String {
        match self {
            ConversionError::CreateFailed(msg) => {
                format!("Cannot prepare audio for playback: {}", msg)
            }
            ConversionError::MismatchedPlanes { expected, actual } => format!(
                "Audio data is malformed ({} channel buffers, expected {})",
                actual, expected
            ),
            ConversionError::ConvertFailed(msg) => {
                format!("Failed to convert audio data: {}", msg)
            }
            ConversionError::DestinationOverflow { .. } => {
                "Audio file is longer than its reported length".to_string()
            }
        }
    }
}

/// Playback engine primitive failures. The engine reports status codes;
/// anything non-zero is fatal for the operation that produced it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine operation '{operation}' failed with status {status}")]
    Status { operation: &'static str, status: i32 },
}

impl EngineError {
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Status { operation, status } => {
                format!("Audio engine failed to {} (status {})", operation, status)
            }
        }
    }
}

/// Track selection errors (random pick, history navigation)
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("No compatible tracks found")]
    NoEligibleTracks,

    #[error("No previous tracks to play")]
    NoPreviousTrack,
}

impl SelectionError {
    pub fn user_message(&self) -> String {
        match self {
            SelectionError::NoEligibleTracks => {
                "No tracks available in the current selection".to_string()
            }
            SelectionError::NoPreviousTrack => {
                "Already at the oldest track in history".to_string()
            }
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => {
                format!("Cannot access configuration file: {}", err)
            }
            ConfigError::SerializationError(_) => {
                "Failed to save configuration settings".to_string()
            }
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
        }
    }
}
