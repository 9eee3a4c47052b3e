use std::{str::FromStr, time::Duration};

use anyhow::{Context, bail};
use detect_wire::framing::DEFAULT_MAX_FRAME_LEN;

use crate::{
    codec::DEFAULT_JPEG_QUALITY,
    overlay::OverlayStyle,
    worker::{DEFAULT_SERVER, ReconnectPolicy, WorkerConfig},
};

const PREFIX: &str = "DETECT_RELAY_";

pub struct RelayConfig {
    server: String,
    jpeg_quality: u8,
    reconnect_after: Option<Duration>,
    exchange_timeout: Option<Duration>,
    max_response_len: u32,
    preview_addr: String,
    fps: u32,
    frame_size: (u32, u32),
    clamp_labels: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            reconnect_after: None,
            exchange_timeout: None,
            max_response_len: DEFAULT_MAX_FRAME_LEN,
            preview_addr: "0.0.0.0:8080".to_string(),
            fps: 15,
            frame_size: (640, 480),
            clamp_labels: false,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `DETECT_RELAY_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| lookup(&format!("{}{}", PREFIX, name)).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(server) = get("SERVER") {
            config.server = server.trim().to_string();
        }
        if let Some(quality) = get("JPEG_QUALITY") {
            let quality: u8 = parse("JPEG_QUALITY", &quality)?;
            if !(1..=100).contains(&quality) {
                bail!("{}JPEG_QUALITY must be within 1..=100, got {}", PREFIX, quality);
            }
            config.jpeg_quality = quality;
        }
        if let Some(ms) = get("RECONNECT_MS") {
            config.reconnect_after = Some(Duration::from_millis(parse("RECONNECT_MS", &ms)?));
        }
        if let Some(ms) = get("EXCHANGE_TIMEOUT_MS") {
            let ms: u64 = parse("EXCHANGE_TIMEOUT_MS", &ms)?;
            if ms == 0 {
                bail!("{}EXCHANGE_TIMEOUT_MS must be positive", PREFIX);
            }
            config.exchange_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(len) = get("MAX_RESPONSE") {
            config.max_response_len = parse("MAX_RESPONSE", &len)?;
        }
        if let Some(addr) = get("PREVIEW") {
            config.preview_addr = addr.trim().to_string();
        }
        if let Some(fps) = get("FPS") {
            let fps: u32 = parse("FPS", &fps)?;
            if fps == 0 {
                bail!("{}FPS must be positive", PREFIX);
            }
            config.fps = fps;
        }
        if let Some(size) = get("FRAME_SIZE") {
            config.frame_size = parse_size(&size)?;
        }
        if let Some(clamp) = get("CLAMP_LABELS") {
            config.clamp_labels = parse_flag("CLAMP_LABELS", &clamp)?;
        }
        Ok(config)
    }

    pub fn preview_addr(&self) -> &str {
        &self.preview_addr
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            server: self.server.clone(),
            jpeg_quality: self.jpeg_quality,
            reconnect: match self.reconnect_after {
                Some(delay) => ReconnectPolicy::Backoff(delay),
                None => ReconnectPolicy::Never,
            },
            exchange_timeout: self.exchange_timeout,
            max_response_len: self.max_response_len,
            overlay: OverlayStyle {
                clamp_labels: self.clamp_labels,
                ..OverlayStyle::default()
            },
        }
    }
}

fn parse<T>(name: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {}{}: {:?}", PREFIX, name, value))
}

fn parse_flag(name: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid {}{}: {:?}", PREFIX, name, other),
    }
}

/// `WIDTHxHEIGHT`
fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let Some((w, h)) = value.trim().split_once(['x', 'X']) else {
        bail!("invalid {}FRAME_SIZE: {:?}, expected WIDTHxHEIGHT", PREFIX, value);
    };
    let width: u32 = parse("FRAME_SIZE", w)?;
    let height: u32 = parse("FRAME_SIZE", h)?;
    if width == 0 || height == 0 || width > u16::MAX as u32 || height > u16::MAX as u32 {
        bail!("{}FRAME_SIZE out of range: {}x{}", PREFIX, width, height);
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<RelayConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{}{}", PREFIX, k), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.worker_config().server, "127.0.0.1:9999");
        assert_eq!(config.jpeg_quality(), 95);
        assert_eq!(config.fps(), 15);
        assert_eq!(config.frame_size(), (640, 480));

        let worker = config.worker_config();
        assert_eq!(worker.reconnect, ReconnectPolicy::Never);
        assert_eq!(worker.exchange_timeout, None);
        assert!(!worker.overlay.clamp_labels);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SERVER", "10.0.0.5:7000"),
            ("JPEG_QUALITY", "80"),
            ("RECONNECT_MS", "250"),
            ("EXCHANGE_TIMEOUT_MS", "2000"),
            ("MAX_RESPONSE", "4096"),
            ("FRAME_SIZE", "320x240"),
            ("CLAMP_LABELS", "true"),
            ("FPS", " "),
        ])
        .unwrap();
        assert_eq!(config.frame_size(), (320, 240));
        assert_eq!(config.fps(), 15);

        let worker = config.worker_config();
        assert_eq!(worker.server, "10.0.0.5:7000");
        assert_eq!(worker.jpeg_quality, 80);
        assert_eq!(worker.reconnect, ReconnectPolicy::Backoff(Duration::from_millis(250)));
        assert_eq!(worker.exchange_timeout, Some(Duration::from_secs(2)));
        assert_eq!(worker.max_response_len, 4096);
        assert!(worker.overlay.clamp_labels);
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("JPEG_QUALITY", "0")]).is_err());
        assert!(load(&[("JPEG_QUALITY", "101")]).is_err());
        assert!(load(&[("JPEG_QUALITY", "high")]).is_err());
        assert!(load(&[("FPS", "0")]).is_err());
        assert!(load(&[("EXCHANGE_TIMEOUT_MS", "0")]).is_err());
        assert!(load(&[("FRAME_SIZE", "640")]).is_err());
        assert!(load(&[("FRAME_SIZE", "0x10")]).is_err());
        assert!(load(&[("CLAMP_LABELS", "maybe")]).is_err());

        let err = load(&[("MAX_RESPONSE", "-1")]).err().unwrap();
        assert!(format!("{:#}", err).contains("DETECT_RELAY_MAX_RESPONSE"));
    }
}
