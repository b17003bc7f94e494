//! Startup configuration for the bridge. Read once at process start,
//! never re-read mid-run.

use crate::error::{BridgeError, Result};
use crate::frames::Strategy;
use crate::media::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMS};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PREAMBLE: &str =
    "You are a helpful assistant replying inside a chat conversation. \
     Messages may mix text with images and video keyframes. Respond concisely.";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Length of one aggregation window.
    pub window_interval: Duration,
    /// Keyframe ceiling per video event.
    pub max_frames: usize,
    /// Downscale bound for outgoing images (width, height).
    pub max_dims: (u32, u32),
    pub jpeg_quality: u8,
    /// Keyframe sampling strategy for video events.
    pub frame_strategy: Strategy,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub system_preamble: String,
    /// Save location advertised to the event source for incoming media.
    /// Created at startup; the bridge itself only reads the paths it is
    /// handed, so a UI-automation listener downloading attachments is
    /// expected to place them here.
    pub media_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            window_interval: Duration::from_secs(15),
            max_frames: 15,
            max_dims: DEFAULT_MAX_DIMS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_strategy: Strategy::EvenInterval,
            model: String::new(),
            api_key: String::new(),
            base_url: "https://ark.cn-beijing.volces.com/api/v3".to_string(),
            system_preamble: DEFAULT_PREAMBLE.to_string(),
            media_dir: PathBuf::from("received_media"),
        }
    }
}

impl BridgeConfig {
    /// Build the config from `BRIDGE_*` environment variables, falling
    /// back to defaults. `BRIDGE_MODEL` and `BRIDGE_API_KEY` are required.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            window_interval: Duration::from_secs(parse_env(
                "BRIDGE_INTERVAL_SECS",
                defaults.window_interval.as_secs(),
            )?),
            max_frames: parse_env("BRIDGE_MAX_FRAMES", defaults.max_frames)?,
            max_dims: (
                parse_env("BRIDGE_MAX_WIDTH", defaults.max_dims.0)?,
                parse_env("BRIDGE_MAX_HEIGHT", defaults.max_dims.1)?,
            ),
            jpeg_quality: parse_env("BRIDGE_JPEG_QUALITY", defaults.jpeg_quality)?,
            frame_strategy: defaults.frame_strategy,
            model: require_env("BRIDGE_MODEL")?,
            api_key: require_env("BRIDGE_API_KEY")?,
            base_url: env::var("BRIDGE_BASE_URL").unwrap_or(defaults.base_url),
            system_preamble: env::var("BRIDGE_SYSTEM_PROMPT").unwrap_or(defaults.system_preamble),
            media_dir: env::var("BRIDGE_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.media_dir),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| BridgeError::Other(format!("{key} must be set")))
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| BridgeError::Other(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
