//! The configuration data model and its strict JSON codec (grounded on
//! `configuration/configuration.hpp` and `configuration/parse.cpp`).
//!
//! "Unknown key is fatal" is achieved with `#[serde(deny_unknown_fields)]`
//! on every struct here — the idiomatic `serde` equivalent of the
//! original's hand-rolled key-tracking `ObjectDeserializer`. `FrameRate`
//! and `Directory` need custom `Deserialize` impls because they accept
//! more than one JSON shape (a string shorthand, an array, or a full
//! object); both still reject unrecognized shapes/keys.

pub mod defaults;
pub mod latency;

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameRateKind {
    Fps,
    Fraction,
    Fraction23,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRate {
    #[serde(rename = "type")]
    pub kind: FrameRateKind,
    pub numerator: u64,
    pub denominator: u64,
}

impl FrameRate {
    pub fn fps(n: u64) -> Self {
        FrameRate { kind: FrameRateKind::Fps, numerator: n, denominator: 1 }
    }

    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator.max(1) as f64
    }

    fn reduce(num: u64, den: u64) -> (u64, u64) {
        fn gcd(a: u64, b: u64) -> u64 {
            if b == 0 { a.max(1) } else { gcd(b, a % b) }
        }
        let g = gcd(num, den);
        (num / g.max(1), den / g.max(1))
    }

    pub fn reduced(&self) -> Self {
        let (n, d) = Self::reduce(self.numerator, self.denominator);
        FrameRate { kind: self.kind, numerator: n, denominator: d }
    }
}

impl<'de> Deserialize<'de> for FrameRate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) if s == "half" => Ok(FrameRate { kind: FrameRateKind::Fraction, numerator: 1, denominator: 2 }),
            Value::String(s) if s == "half+" => Ok(FrameRate { kind: FrameRateKind::Fraction23, numerator: 1, denominator: 2 }),
            Value::String(s) => Err(D::Error::custom(format!("unrecognized frame rate string {s:?}"))),
            Value::Array(arr) if arr.len() == 2 => {
                let num = arr[0].as_u64().ok_or_else(|| D::Error::custom("frame rate numerator must be an integer"))?;
                let den = arr[1].as_u64().ok_or_else(|| D::Error::custom("frame rate denominator must be an integer"))?;
                Ok(FrameRate { kind: FrameRateKind::Fraction, numerator: num, denominator: den })
            }
            Value::Object(map) => {
                let allowed = ["type", "numerator", "denominator"];
                for key in map.keys() {
                    if !allowed.contains(&key.as_str()) {
                        return Err(D::Error::custom(format!("unknown key \"{key}\" in frame rate object")));
                    }
                }
                let kind = match map.get("type").and_then(Value::as_str) {
                    Some("fps") => FrameRateKind::Fps,
                    Some("fraction") => FrameRateKind::Fraction,
                    Some("fraction23") => FrameRateKind::Fraction23,
                    _ => return Err(D::Error::custom("frame rate object missing valid \"type\"")),
                };
                let numerator = map.get("numerator").and_then(Value::as_u64).unwrap_or(1);
                let denominator = map.get("denominator").and_then(Value::as_u64).unwrap_or(1);
                Ok(FrameRate { kind, numerator, denominator })
            }
            other => Err(D::Error::custom(format!("cannot parse frame rate from {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Directory {
    pub local_path: String,
    #[serde(default)]
    pub index_file: Option<String>,
    #[serde(default)]
    pub writable: bool,
}

impl<'de> Deserialize<'de> for Directory {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => Ok(Directory { local_path: s, index_file: None, writable: false }),
            Value::Object(map) => {
                let allowed = ["localPath", "indexFile", "writable"];
                for key in map.keys() {
                    if !allowed.contains(&key.as_str()) {
                        return Err(D::Error::custom(format!("unknown key \"{key}\" in directory object")));
                    }
                }
                let local_path = map
                    .get("localPath")
                    .and_then(Value::as_str)
                    .ok_or_else(|| D::Error::custom("directory object missing \"localPath\""))?
                    .to_string();
                let index_file = map.get("indexFile").and_then(Value::as_str).map(str::to_string);
                let writable = map.get("writable").and_then(Value::as_bool).unwrap_or(false);
                Ok(Directory { local_path, index_file, writable })
            }
            other => Err(D::Error::custom(format!("cannot parse directory from {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Source {
    pub url: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub listen: bool,
    #[serde(default, rename = "loop")]
    pub loop_input: bool,
    #[serde(default)]
    pub timestamp_overlay: bool,
    /// Latency already spent before bytes reach this server (ms).
    #[serde(default)]
    pub source_latency_ms: f64,
    /// Network transit latency to the client (ms).
    #[serde(default)]
    pub transit_latency_ms: f64,
    /// Jitter to budget for on top of transit latency (ms).
    #[serde(default)]
    pub transit_jitter_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct VideoQuality {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<FrameRate>,
    pub codec: Option<String>,
    pub crf: Option<f64>,
    pub preset: Option<String>,
    pub bitrate: Option<u64>,
    pub min_bitrate: Option<u64>,
    pub rate_control_buffer_length_ms: Option<f64>,
    pub gop_size: Option<u32>,
}

impl Default for VideoQuality {
    fn default() -> Self {
        VideoQuality {
            width: None,
            height: None,
            frame_rate: None,
            codec: None,
            crf: None,
            preset: None,
            bitrate: None,
            min_bitrate: None,
            rate_control_buffer_length_ms: None,
            gop_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AudioQuality {
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u64>,
}

impl Default for AudioQuality {
    fn default() -> Self {
        AudioQuality { codec: None, sample_rate: None, bitrate: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ClientBufferControl {
    pub extra_buffer_ms: Option<f64>,
}

impl Default for ClientBufferControl {
    fn default() -> Self {
        ClientBufferControl { extra_buffer_ms: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Quality {
    #[serde(default)]
    pub video: VideoQuality,
    #[serde(default)]
    pub audio: AudioQuality,
    #[serde(default)]
    pub client_buffer_control: ClientBufferControl,
    pub target_latency_ms: Option<f64>,
    pub min_interleave_rate: Option<f64>,
    pub min_interleave_window_ms: Option<f64>,
    pub interleave_timestamp_interval_ms: Option<u64>,
}

impl Default for Quality {
    fn default() -> Self {
        Quality {
            video: VideoQuality::default(),
            audio: AudioQuality::default(),
            client_buffer_control: ClientBufferControl::default(),
            target_latency_ms: None,
            min_interleave_rate: None,
            min_interleave_window_ms: None,
            interleave_timestamp_interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Dash {
    #[serde(default)]
    pub segment_duration_ms: Option<u64>,
    #[serde(default)]
    pub pre_availability_ms: Option<u64>,
    #[serde(default)]
    pub expose_segments: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct History {
    #[serde(default)]
    pub retention_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ChannelFfmpeg {
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub extra_arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Channel {
    pub source: Source,
    #[serde(default)]
    pub qualities: Vec<Quality>,
    #[serde(default)]
    pub dash: Dash,
    #[serde(default)]
    pub history: History,
    #[serde(default)]
    pub ffmpeg: ChannelFfmpeg,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SeparatedIngestSource {
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Network {
    pub port: u16,
    #[serde(default)]
    pub public_port: Option<u16>,
    #[serde(default = "default_private_networks")]
    pub private_networks: Vec<String>,
}

fn default_private_networks() -> Vec<String> {
    vec![
        "10.0.0.0/8".into(),
        "172.16.0.0/12".into(),
        "192.168.0.0/16".into(),
        "127.0.0.0/8".into(),
        "169.254.0.0/16".into(),
        "::1/128".into(),
        "fc00::/7".into(),
        "fe80::/10".into(),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Http {
    #[serde(default)]
    pub ephemeral_when_not_found: bool,
    #[serde(default = "default_cache_non_live_time")]
    pub cache_non_live_time_secs: u64,
}

fn default_cache_non_live_time() -> u64 {
    600
}

impl Default for Http {
    fn default() -> Self {
        Http { ephemeral_when_not_found: false, cache_non_live_time_secs: default_cache_non_live_time() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Features {
    #[serde(default)]
    pub api_control_plane: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Root {
    #[serde(default)]
    pub channels: BTreeMap<String, Channel>,
    #[serde(default)]
    pub directories: BTreeMap<String, Directory>,
    pub network: Network,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub separated_ingest_sources: BTreeMap<String, SeparatedIngestSource>,
}

impl Root {
    pub fn from_json(s: &str) -> Result<Root> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).expect("Root always serializes")
    }

    /// Structural equality modulo `uid` and anything derived solely from
    /// it (used by the instance state machine to decide whether a channel
    /// must be restarted).
    pub fn differs_by_uid_only(&self, other: &Root) -> bool {
        if self.channels.len() != other.channels.len() {
            return false;
        }
        for (name, chan) in &self.channels {
            let Some(other_chan) = other.channels.get(name) else {
                return false;
            };
            let mut a = chan.clone();
            let mut b = other_chan.clone();
            a.uid = None;
            b.uid = None;
            if a != b {
                return false;
            }
        }
        self.directories == other.directories
            && self.network == other.network
            && self.http == other.http
            && self.features == other.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_top_level_key() {
        let json = r#"{"network":{"port":8080},"bogus":true}"#;
        assert!(Root::from_json(json).is_err());
    }

    #[test]
    fn parses_minimal_config() {
        let json = r#"{"network":{"port":8080}}"#;
        let root = Root::from_json(json).unwrap();
        assert_eq!(root.network.port, 8080);
        assert!(root.channels.is_empty());
    }

    #[test]
    fn frame_rate_parses_integer_fps_string_form() {
        let json = r#"{"type":"fps","numerator":25,"denominator":1}"#;
        let fr: FrameRate = serde_json::from_str(json).unwrap();
        assert_eq!(fr.kind, FrameRateKind::Fps);
        assert_eq!(fr.numerator, 25);
    }

    #[test]
    fn frame_rate_parses_half_shorthand() {
        let fr: FrameRate = serde_json::from_str("\"half\"").unwrap();
        assert_eq!(fr.kind, FrameRateKind::Fraction);
        assert_eq!((fr.numerator, fr.denominator), (1, 2));
    }

    #[test]
    fn frame_rate_parses_fraction_array() {
        let fr: FrameRate = serde_json::from_str("[30000,1001]").unwrap();
        assert_eq!((fr.numerator, fr.denominator), (30000, 1001));
    }

    #[test]
    fn frame_rate_rejects_unknown_object_key() {
        let json = r#"{"type":"fps","numerator":25,"denominator":1,"bogus":1}"#;
        assert!(serde_json::from_str::<FrameRate>(json).is_err());
    }

    #[test]
    fn directory_parses_plain_string_shorthand() {
        let dir: Directory = serde_json::from_str("\"/var/www\"").unwrap();
        assert_eq!(dir.local_path, "/var/www");
        assert!(!dir.writable);
    }

    #[test]
    fn differs_by_uid_only_ignores_uid() {
        let a = Root::from_json(r#"{"network":{"port":8080},"channels":{"live":{"source":{"url":"x"},"uid":"one"}}}"#).unwrap();
        let b = Root::from_json(r#"{"network":{"port":8080},"channels":{"live":{"source":{"url":"x"},"uid":"two"}}}"#).unwrap();
        assert!(a.differs_by_uid_only(&b));
    }
}
