//! The default resolver, grounded on `configuration/defaults/defaults.cpp`,
//! `source.cpp`, `quality.cpp`, and `compute.cpp`. Fills in every field a
//! sparse configuration left implicit: listen-source rewriting, probed
//! source properties, and the derived latency/buffer settings.

use crate::config::latency::{self};
use crate::config::{AudioQuality, FrameRate, FrameRateKind, Quality, Root, VideoQuality};
use crate::config::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub sample_rate: u32,
}

#[async_trait]
pub trait ProbeFn: Send + Sync {
    async fn probe(&self, url: &str, arguments: &[String]) -> Result<SourceInfo>;
}

/// Caches probe results for the duration of one resolution pass so that
/// the same `(url, arguments)` pair is never probed twice.
pub struct Resolver<'a> {
    probe: &'a dyn ProbeFn,
    cache: Mutex<HashMap<(String, Vec<String>), SourceInfo>>,
    in_use_urls: Mutex<Vec<String>>,
}

const SUPPORTED_SAMPLE_RATES: [u32; 5] = [48000, 44100, 32000, 24000, 16000];

fn round_half_up(value: f64) -> u32 {
    (value + 0.5).floor() as u32
}

impl<'a> Resolver<'a> {
    pub fn new(probe: &'a dyn ProbeFn) -> Self {
        Resolver { probe, cache: Mutex::new(HashMap::new()), in_use_urls: Mutex::new(Vec::new()) }
    }

    async fn probe_cached(&self, url: &str, arguments: &[String]) -> Result<SourceInfo> {
        let key = (url.to_string(), arguments.to_vec());
        {
            let cache = self.cache.lock().await;
            if let Some(info) = cache.get(&key) {
                return Ok(info.clone());
            }
        }
        let info = self.probe.probe(url, arguments).await?;
        self.cache.lock().await.insert(key, info.clone());
        Ok(info)
    }

    pub async fn in_use_urls(&self) -> Vec<String> {
        self.in_use_urls.lock().await.clone()
    }

    /// Resolves every implicit field of `root`, mutating it in place.
    pub async fn resolve(&self, root: &mut Root, http_port: u16) -> Result<()> {
        self.rewrite_listen_sources(root);
        self.rewrite_ingest_urls(root, http_port);

        let channel_names: Vec<String> = root.channels.keys().cloned().collect();
        for name in channel_names {
            self.resolve_channel(root, &name).await?;
        }
        Ok(())
    }

    fn rewrite_listen_sources(&self, root: &mut Root) {
        let mut listen_index = 0u32;
        let mut new_sources = Vec::new();
        for channel in root.channels.values_mut() {
            if channel.source.listen {
                let name = format!("__listen__/{listen_index}");
                listen_index += 1;
                let mut arguments = channel.source.arguments.clone();
                arguments.push("-listen".to_string());
                arguments.push("1".to_string());
                new_sources.push((name.clone(), arguments));
                channel.source.url = format!("ingest://{name}");
                channel.source.listen = false;
            }
        }
        for (name, arguments) in new_sources {
            root.separated_ingest_sources.insert(name, crate::config::SeparatedIngestSource { arguments });
        }
    }

    fn rewrite_ingest_urls(&self, root: &mut Root, http_port: u16) {
        for channel in root.channels.values_mut() {
            if let Some(name) = channel.source.url.strip_prefix("ingest://") {
                channel.source.url = format!("ingest_http://localhost:{http_port}/ingest/{name}");
            }
        }
    }

    async fn resolve_channel(&self, root: &mut Root, name: &str) -> Result<()> {
        {
            let channel = root.channels.get_mut(name).expect("channel name came from root.channels");
            if channel.qualities.is_empty() {
                channel.qualities.push(Quality::default());
            }
            if channel.uid.is_none() {
                channel.uid = Some(fresh_uid());
            }
        }

        let (url, arguments) = {
            let channel = &root.channels[name];
            (channel.source.url.clone(), channel.source.arguments.clone())
        };
        self.in_use_urls.lock().await.push(url.clone());
        let info = self.probe_cached(&url, &arguments).await?;

        let channel = root.channels.get_mut(name).expect("channel exists");
        for quality in channel.qualities.iter_mut() {
            fill_video_dimensions(&mut quality.video, &info);
            fill_frame_rate(&mut quality.video, &info);
            fill_audio_sample_rate(&mut quality.audio, &info);

            let audio_bps = quality.audio.bitrate.unwrap_or(128_000) as f64;
            let resolved = latency::allocate(quality, &channel.source, audio_bps)?;
            quality.video.bitrate.get_or_insert(resolved.bitrate_bps.round() as u64);
            quality.video.min_bitrate.get_or_insert(resolved.min_bitrate_bps.round() as u64);
            quality.video.rate_control_buffer_length_ms.get_or_insert(resolved.rate_control_buffer_ms);
            quality.client_buffer_control.extra_buffer_ms.get_or_insert(resolved.client_extra_buffer_ms);

            let frame_rate_hz = quality.video.frame_rate.map(|f| f.as_f64()).unwrap_or(25.0);
            let gop_seconds = 2.0;
            quality.video.gop_size.get_or_insert((frame_rate_hz * gop_seconds).round() as u32);
            quality.min_interleave_rate.get_or_insert(resolved.bitrate_bps);
            quality
                .min_interleave_window_ms
                .get_or_insert(quality.video.rate_control_buffer_length_ms.unwrap_or(500.0));
        }
        Ok(())
    }
}

fn fill_video_dimensions(video: &mut VideoQuality, info: &SourceInfo) {
    match (video.width, video.height) {
        (None, None) => {
            video.width = Some(info.width);
            video.height = Some(info.height);
        }
        (Some(w), None) => {
            let ratio = info.height as f64 / info.width as f64;
            video.height = Some(round_half_up(w as f64 * ratio));
        }
        (None, Some(h)) => {
            let ratio = info.width as f64 / info.height as f64;
            video.width = Some(round_half_up(h as f64 * ratio));
        }
        (Some(_), Some(_)) => {}
    }
}

fn fill_frame_rate(video: &mut VideoQuality, info: &SourceInfo) {
    let Some(fr) = video.frame_rate else {
        video.frame_rate = Some(info.frame_rate);
        return;
    };
    match fr.kind {
        FrameRateKind::Fps => {}
        FrameRateKind::Fraction => {
            let combined = FrameRate {
                kind: FrameRateKind::Fps,
                numerator: fr.numerator * info.frame_rate.numerator,
                denominator: fr.denominator * info.frame_rate.denominator,
            };
            video.frame_rate = Some(combined.reduced());
        }
        FrameRateKind::Fraction23 => {
            let combined = FrameRate {
                kind: FrameRateKind::Fps,
                numerator: fr.numerator * info.frame_rate.numerator,
                denominator: fr.denominator * info.frame_rate.denominator,
            }
            .reduced();
            let is_reduction = fr.numerator * info.frame_rate.denominator < fr.denominator * info.frame_rate.numerator;
            if combined.as_f64() < 23.0 && is_reduction {
                video.frame_rate = Some(FrameRate { kind: FrameRateKind::Fps, ..info.frame_rate });
            } else {
                video.frame_rate = Some(combined);
            }
        }
    }
}

fn fill_audio_sample_rate(audio: &mut AudioQuality, info: &SourceInfo) {
    if audio.codec.as_deref() == Some("none") {
        return;
    }
    if audio.sample_rate.is_some() {
        return;
    }
    for candidate in SUPPORTED_SAMPLE_RATES {
        if candidate <= 48000 && candidate <= info.sample_rate && info.sample_rate % candidate == 0 && candidate >= 32000 {
            audio.sample_rate = Some(candidate);
            return;
        }
    }
    for candidate in SUPPORTED_SAMPLE_RATES {
        if candidate <= 48000 && candidate <= info.sample_rate && info.sample_rate % candidate == 0 {
            audio.sample_rate = Some(candidate);
            return;
        }
    }
    for candidate in SUPPORTED_SAMPLE_RATES {
        if candidate <= 48000 && candidate <= info.sample_rate {
            audio.sample_rate = Some(candidate);
            return;
        }
    }
    audio.sample_rate = Some(info.sample_rate.min(48000));
}

fn fresh_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Root;

    struct FixedProbe(SourceInfo);

    #[async_trait]
    impl ProbeFn for FixedProbe {
        async fn probe(&self, _url: &str, _arguments: &[String]) -> Result<SourceInfo> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn defaults_integer_fps_and_sample_rate() {
        let json = r#"{"network":{"port":8080},"channels":{"live":{"source":{"url":"file:///a.mp4"}}}}"#;
        let mut root = Root::from_json(json).unwrap();
        let probe = FixedProbe(SourceInfo { width: 1920, height: 1080, frame_rate: FrameRate::fps(25), sample_rate: 48000 });
        let resolver = Resolver::new(&probe);
        resolver.resolve(&mut root, 8080).await.unwrap();
        let quality = &root.channels["live"].qualities[0];
        assert_eq!(quality.video.width, Some(1920));
        assert_eq!(quality.video.height, Some(1080));
        assert_eq!(quality.video.frame_rate.unwrap().numerator, 25);
        assert_eq!(quality.audio.sample_rate, Some(48000));
    }

    #[tokio::test]
    async fn listen_rewrite() {
        let json = r#"{"network":{"port":8080},"channels":{"live":{"source":{"url":"rtmp://localhost:1935/test","listen":true}}}}"#;
        let mut root = Root::from_json(json).unwrap();
        let probe = FixedProbe(SourceInfo { width: 1920, height: 1080, frame_rate: FrameRate::fps(25), sample_rate: 48000 });
        let resolver = Resolver::new(&probe);
        resolver.resolve(&mut root, 8080).await.unwrap();
        let channel = &root.channels["live"];
        assert_eq!(channel.source.url, "ingest_http://localhost:8080/ingest/__listen__/0");
        assert!(!channel.source.listen);
        assert_eq!(
            root.separated_ingest_sources["__listen__/0"].arguments,
            vec!["-listen".to_string(), "1".to_string()]
        );
    }

    #[tokio::test]
    async fn probe_is_called_once_per_url() {
        struct CountingProbe {
            count: std::sync::atomic::AtomicUsize,
            info: SourceInfo,
        }
        #[async_trait]
        impl ProbeFn for CountingProbe {
            async fn probe(&self, _url: &str, _arguments: &[String]) -> Result<SourceInfo> {
                self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(self.info.clone())
            }
        }
        let json = r#"{"network":{"port":8080},"channels":{"a":{"source":{"url":"file:///x.mp4"},"qualities":[{},{}]}}}"#;
        let mut root = Root::from_json(json).unwrap();
        let probe = CountingProbe {
            count: std::sync::atomic::AtomicUsize::new(0),
            info: SourceInfo { width: 1920, height: 1080, frame_rate: FrameRate::fps(25), sample_rate: 48000 },
        };
        let resolver = Resolver::new(&probe);
        resolver.resolve(&mut root, 8080).await.unwrap();
        assert_eq!(probe.count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
