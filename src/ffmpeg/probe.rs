//! Concrete [`ProbeFn`] that shells out to the `ffprobe` binary, grounded
//! line-for-line on `ffmpeg/ffprobe.cpp`'s stream-selection logic: prefer
//! the first video stream for resolution/frame rate, the first audio
//! stream for sample rate.

use crate::config::defaults::{ProbeFn, SourceInfo};
use crate::config::{FrameRate, Result};
use crate::error::ConfigError;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

#[derive(Deserialize)]
struct ProbeOutput {
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    sample_rate: Option<String>,
}

pub struct FfprobeProber {
    pub binary: String,
}

impl Default for FfprobeProber {
    fn default() -> Self {
        FfprobeProber { binary: "ffprobe".to_string() }
    }
}

fn parse_fraction(s: &str) -> Option<FrameRate> {
    let (num, den) = s.split_once('/')?;
    Some(FrameRate { kind: crate::config::FrameRateKind::Fps, numerator: num.parse().ok()?, denominator: den.parse().ok()? }.reduced())
}

#[async_trait]
impl ProbeFn for FfprobeProber {
    async fn probe(&self, url: &str, arguments: &[String]) -> Result<SourceInfo> {
        let output = Command::new(&self.binary)
            .arg("-of")
            .arg("json")
            .arg("-show_streams")
            .args(arguments)
            .arg(url)
            .output()
            .await
            .map_err(|e| ConfigError::Probe(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(ConfigError::Probe(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| ConfigError::Probe(format!("could not parse ffprobe output: {e}")))?;

        let video = parsed.streams.iter().find(|s| s.codec_type == "video");
        let audio = parsed.streams.iter().find(|s| s.codec_type == "audio");

        let width = video.and_then(|v| v.width).unwrap_or(1920);
        let height = video.and_then(|v| v.height).unwrap_or(1080);
        let frame_rate = video
            .and_then(|v| v.r_frame_rate.as_deref())
            .and_then(parse_fraction)
            .unwrap_or_else(|| FrameRate::fps(25));
        let sample_rate = audio
            .and_then(|a| a.sample_rate.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(48000);

        Ok(SourceInfo { width, height, frame_rate, sample_rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ntsc_fraction() {
        let fr = parse_fraction("30000/1001").unwrap();
        assert_eq!((fr.numerator, fr.denominator), (30000, 1001));
    }

    #[test]
    fn parses_integer_fps_as_fraction() {
        let fr = parse_fraction("25/1").unwrap();
        assert_eq!((fr.numerator, fr.denominator), (25, 1));
    }
}
