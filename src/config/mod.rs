//! Process-wide codec mode configuration

use std::str::FromStr;
use std::sync::OnceLock;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use tracing::{debug, warn};

use crate::dispatch::{Direction, ReadChunking};
use crate::error::GzError;

/// Environment variable names
pub mod env {
    pub const COMPRESS_MODE: &str = "GZACCEL_COMPRESS_MODE";
    pub const DECOMPRESS_MODE: &str = "GZACCEL_DECOMPRESS_MODE";
    pub const COMPRESS_THRESHOLD: &str = "GZACCEL_COMPRESS_THRESHOLD";
    pub const DECOMPRESS_THRESHOLD: &str = "GZACCEL_DECOMPRESS_THRESHOLD";
}

/// Default payload size at or below which Automatic mode stays in software
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 1024;
pub const DEFAULT_DECOMPRESS_THRESHOLD: usize = 1024;

/// Codec path policy for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive)]
pub enum CodecMode {
    /// Pick per call from the payload size
    #[default]
    Automatic = 0,
    SoftwareOnly = 1,
    HardwareOnly = 2,
}

impl CodecMode {
    pub const ALL: [CodecMode; 3] = [
        CodecMode::Automatic,
        CodecMode::SoftwareOnly,
        CodecMode::HardwareOnly,
    ];
}

impl FromStr for CodecMode {
    type Err = GzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return CodecMode::from_u8(code)
                .ok_or_else(|| GzError::InvalidArgument(format!("unknown codec mode code {}", code)));
        }
        match s.to_ascii_lowercase().as_str() {
            "auto" | "automatic" => Ok(CodecMode::Automatic),
            "sw" | "software" => Ok(CodecMode::SoftwareOnly),
            "hw" | "hardware" => Ok(CodecMode::HardwareOnly),
            other => Err(GzError::InvalidArgument(format!("unknown codec mode '{}'", other))),
        }
    }
}

/// Mode configuration consulted by the codec selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeConfig {
    pub compress_mode: CodecMode,
    pub decompress_mode: CodecMode,

    /// Largest write still handled in software under Automatic
    pub compress_threshold: usize,

    /// Largest read still handled in software under Automatic
    pub decompress_threshold: usize,

    /// Descriptor read sizing for the decompress loop
    pub read_chunking: ReadChunking,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            compress_mode: CodecMode::Automatic,
            decompress_mode: CodecMode::Automatic,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
            decompress_threshold: DEFAULT_DECOMPRESS_THRESHOLD,
            read_chunking: ReadChunking::default(),
        }
    }
}

static GLOBAL_CONFIG: OnceLock<ModeConfig> = OnceLock::new();

impl ModeConfig {
    /// Same policy for both directions
    pub fn uniform(mode: CodecMode) -> Self {
        Self {
            compress_mode: mode,
            decompress_mode: mode,
            ..Self::default()
        }
    }

    pub fn with_modes(mut self, compress: CodecMode, decompress: CodecMode) -> Self {
        self.compress_mode = compress;
        self.decompress_mode = decompress;
        self
    }

    pub fn with_thresholds(mut self, compress: usize, decompress: usize) -> Self {
        self.compress_threshold = compress;
        self.decompress_threshold = decompress;
        self
    }

    pub fn with_read_chunking(mut self, chunking: ReadChunking) -> Self {
        self.read_chunking = chunking;
        self
    }

    pub fn mode(&self, direction: Direction) -> CodecMode {
        match direction {
            Direction::Compress => self.compress_mode,
            Direction::Decompress => self.decompress_mode,
        }
    }

    pub fn threshold(&self, direction: Direction) -> usize {
        match direction {
            Direction::Compress => self.compress_threshold,
            Direction::Decompress => self.decompress_threshold,
        }
    }

    /// Build from the `GZACCEL_*` environment variables.
    ///
    /// Malformed values are reported and the default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, e.g. a parsed config file.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(mode) = parse_key(&lookup, env::COMPRESS_MODE) {
            config.compress_mode = mode;
        }
        if let Some(mode) = parse_key(&lookup, env::DECOMPRESS_MODE) {
            config.decompress_mode = mode;
        }
        if let Some(threshold) = parse_key(&lookup, env::COMPRESS_THRESHOLD) {
            config.compress_threshold = threshold;
        }
        if let Some(threshold) = parse_key(&lookup, env::DECOMPRESS_THRESHOLD) {
            config.decompress_threshold = threshold;
        }

        config
    }

    /// The process-wide configuration, read from the environment on first use
    pub fn global() -> &'static ModeConfig {
        GLOBAL_CONFIG.get_or_init(|| {
            let config = ModeConfig::from_env();
            debug!(?config, "loaded codec mode configuration");
            config
        })
    }
}

fn parse_key<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring malformed configuration value");
            None
        }
    }
}
