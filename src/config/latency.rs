//! The latency-budget allocator, grounded line-for-line on
//! `configuration/defaults/latency.cpp`. Solves for `minBitrate`,
//! `rateControlBufferLength`, and `clientExtraBuffer` (and from those,
//! `bitrate`) so that their combined latency contribution fits under a
//! target end-to-end latency.

use crate::config::{Quality, Source};
use crate::error::ConfigError;
use crate::config::Result;

pub const MAX_VIDEO_ENCODER_RATE_RANGE_RATIO: f64 = 0.75;
const EPSILON_MS: f64 = 10.0;

const REF_RATE_BYTES_PER_SEC: f64 = 3_000_000.0 / 8.0;
const REF_WIDTH: f64 = 1920.0;
const REF_HEIGHT: f64 = 1080.0;
const REF_FRAME_RATE: f64 = 27.5;
const REF_CRF: f64 = 25.0;

/// Bounds on the minimum video bitrate, in bps.
const MIN_BITRATE_RANGE_BPS: (f64, f64) = (100_000.0, 50_000_000.0);
/// Bounds on the encoder rate control buffer length, in ms.
const RATE_CONTROL_BUFFER_RANGE_MS: (f64, f64) = (250.0, 2_000.0);
/// Bounds on the client's extra buffer, in ms.
const EXTRA_BUFFER_RANGE_MS: (f64, f64) = (100.0, 10_000.0);

/// Bits of buffered data that must transit the encoder→client path before
/// the first byte of a segment can safely be emitted at `minBitrate`; a
/// fixed allowance rather than something the resolver derives, since it
/// models constant per-segment framing/container overhead.
const TRANSIT_BUFFER_BITS: f64 = 188_000.0;

pub struct Resolved {
    pub bitrate_bps: f64,
    pub min_bitrate_bps: f64,
    pub rate_control_buffer_ms: f64,
    pub client_extra_buffer_ms: f64,
}

struct Param {
    share: f64,
    fixed: bool,
    value: f64,
    min_native: f64,
    max_native: f64,
    to_latency: fn(f64, f64) -> f64,
    to_native: fn(f64, f64) -> f64,
    /// extra context each conversion function needs (e.g. audio rate)
    ctx: f64,
}

fn min_bitrate_to_latency(min_bitrate_bps: f64, audio_bps: f64) -> f64 {
    (TRANSIT_BUFFER_BITS / (min_bitrate_bps + audio_bps)) * 1000.0
}

fn min_bitrate_from_latency(latency_ms: f64, audio_bps: f64) -> f64 {
    (TRANSIT_BUFFER_BITS / (latency_ms / 1000.0)) - audio_bps
}

fn identity_to_latency(value: f64, _ctx: f64) -> f64 {
    value
}

fn identity_from_latency(latency: f64, _ctx: f64) -> f64 {
    latency
}

/// Reference-rate target bitrate, scaled by resolution, frame rate, and CRF.
pub fn target_video_rate_bps(width: u32, height: u32, frame_rate: f64, crf: f64) -> f64 {
    let resolution_ratio = (width as f64 * height as f64) / (REF_WIDTH * REF_HEIGHT);
    let rate = REF_RATE_BYTES_PER_SEC
        * resolution_ratio.powf(0.75)
        * (frame_rate / REF_FRAME_RATE).powf(0.5)
        * 2f64.powf((REF_CRF - crf) / 6.0);
    rate * 8.0
}

/// Runs the four-pass allocation for one quality. `audio_bps` is the
/// quality's resolved audio bitrate (0 if there is no audio stream).
pub fn allocate(quality: &Quality, source: &Source, audio_bps: f64) -> Result<Resolved> {
    let target_latency_ms = quality.target_latency_ms.unwrap_or(2000.0);
    let explicit_sources_ms = source.source_latency_ms + source.transit_latency_ms + source.transit_jitter_ms;
    let mut budget = target_latency_ms - explicit_sources_ms;
    if budget < 0.0 {
        return Err(ConfigError::LatencyUnachievable(format!(
            "target latency {target_latency_ms}ms is smaller than fixed source/transit latency {explicit_sources_ms}ms"
        )));
    }

    let mut params = vec![
        Param {
            share: 1.0,
            fixed: quality.video.min_bitrate.is_some(),
            value: quality.video.min_bitrate.map(|v| v as f64).unwrap_or(0.0),
            min_native: MIN_BITRATE_RANGE_BPS.0,
            max_native: MIN_BITRATE_RANGE_BPS.1,
            to_latency: min_bitrate_to_latency,
            to_native: min_bitrate_from_latency,
            ctx: audio_bps,
        },
        Param {
            share: 1.0,
            fixed: quality.video.rate_control_buffer_length_ms.is_some(),
            value: quality.video.rate_control_buffer_length_ms.unwrap_or(0.0),
            min_native: RATE_CONTROL_BUFFER_RANGE_MS.0,
            max_native: RATE_CONTROL_BUFFER_RANGE_MS.1,
            to_latency: identity_to_latency,
            to_native: identity_from_latency,
            ctx: 0.0,
        },
        Param {
            share: 0.25,
            fixed: quality.client_buffer_control.extra_buffer_ms.is_some(),
            value: quality.client_buffer_control.extra_buffer_ms.unwrap_or(0.0),
            min_native: EXTRA_BUFFER_RANGE_MS.0,
            max_native: EXTRA_BUFFER_RANGE_MS.1,
            to_latency: identity_to_latency,
            to_native: identity_from_latency,
            ctx: 0.0,
        },
    ];

    // Pass 1: ifFixed — explicit values leave the pool entirely.
    for p in params.iter_mut() {
        if p.fixed {
            budget -= (p.to_latency)(p.value, p.ctx);
            p.share = 0.0;
        }
    }
    if budget < 0.0 {
        return Err(ConfigError::LatencyUnachievable(
            "sum of fixed parameter latencies exceeds the target latency".into(),
        ));
    }

    // Pass 2: lowLatency — default share would undershoot the minimum.
    let mut share_sum: f64 = params.iter().filter(|p| !p.fixed).map(|p| p.share).sum();
    for p in params.iter_mut() {
        if p.fixed || share_sum <= 0.0 {
            continue;
        }
        let default_latency = budget * (p.share / share_sum);
        let default_value = (p.to_native)(default_latency, p.ctx);
        if default_value < p.min_native {
            p.value = p.min_native;
            budget -= (p.to_latency)(p.min_native, p.ctx);
            p.fixed = true;
            p.share = 0.0;
        }
    }
    if budget < 0.0 {
        return Err(ConfigError::LatencyUnachievable(
            "minimum parameter values exceed the target latency budget".into(),
        ));
    }

    // Pass 3: highLatency — default share would overshoot the maximum.
    share_sum = params.iter().filter(|p| !p.fixed).map(|p| p.share).sum();
    for p in params.iter_mut() {
        if p.fixed || share_sum <= 0.0 {
            continue;
        }
        let default_latency = budget * (p.share / share_sum);
        let default_value = (p.to_native)(default_latency, p.ctx);
        if default_value > p.max_native {
            p.value = p.max_native;
            budget -= (p.to_latency)(p.max_native, p.ctx);
            p.fixed = true;
            p.share = 0.0;
        }
    }

    // Pass 4: ifNotFixed — split whatever remains by default share.
    share_sum = params.iter().filter(|p| !p.fixed).map(|p| p.share).sum();
    for p in params.iter_mut() {
        if !p.fixed {
            let latency = if share_sum > 0.0 { budget * (p.share / share_sum) } else { 0.0 };
            p.value = (p.to_native)(latency, p.ctx);
        }
    }

    let min_bitrate_bps = params[0].value.max(MIN_BITRATE_RANGE_BPS.0);
    let rate_control_buffer_ms = params[1].value;
    let client_extra_buffer_ms = params[2].value;

    let video = &quality.video;
    let width = video.width.unwrap_or(1920);
    let height = video.height.unwrap_or(1080);
    let frame_rate = video.frame_rate.map(|f| f.as_f64()).unwrap_or(25.0);
    let crf = video.crf.unwrap_or(25.0);
    let target_rate = target_video_rate_bps(width, height, frame_rate, crf);
    // Mirrors getMaxVideoRateConstraints: a fixed bitrate pins the ceiling to
    // itself, otherwise the ceiling is twice the reference-scaled target rate.
    let max_rate_ceiling = video.bitrate.map(|b| b as f64).unwrap_or(target_rate * 2.0);

    if min_bitrate_bps > max_rate_ceiling * MAX_VIDEO_ENCODER_RATE_RANGE_RATIO {
        return Err(ConfigError::LatencyUnachievable(format!(
            "required minimum bitrate {min_bitrate_bps:.0}bps exceeds {:.0}% of the encoder's maximum rate",
            MAX_VIDEO_ENCODER_RATE_RANGE_RATIO * 100.0
        )));
    }

    let bitrate_bps = target_rate.max(min_bitrate_bps / MAX_VIDEO_ENCODER_RATE_RANGE_RATIO);

    Ok(Resolved {
        bitrate_bps,
        min_bitrate_bps,
        rate_control_buffer_ms,
        client_extra_buffer_ms,
    })
}

/// Verifies the allocated total contribution is within `EPSILON_MS` of the
/// adjustable budget — a feasibility self-check, not part of the allocation
/// itself.
pub fn total_latency_ms(resolved: &Resolved, audio_bps: f64) -> f64 {
    min_bitrate_to_latency(resolved.min_bitrate_bps, audio_bps)
        + resolved.rate_control_buffer_ms
        + resolved.client_extra_buffer_ms
}

pub fn within_epsilon(total_ms: f64, budget_ms: f64) -> bool {
    total_ms <= budget_ms + EPSILON_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioQuality, ClientBufferControl, FrameRate, Quality, Source, VideoQuality};

    fn source() -> Source {
        Source {
            url: "x".into(),
            arguments: vec![],
            listen: false,
            loop_input: false,
            timestamp_overlay: false,
            source_latency_ms: 0.0,
            transit_latency_ms: 0.0,
            transit_jitter_ms: 0.0,
        }
    }

    #[test]
    fn two_thousand_ms_target_1080p25() {
        let quality = Quality {
            video: VideoQuality {
                width: Some(1920),
                height: Some(1080),
                frame_rate: Some(FrameRate::fps(25)),
                crf: Some(25.0),
                ..Default::default()
            },
            audio: AudioQuality { sample_rate: Some(48000), ..Default::default() },
            client_buffer_control: ClientBufferControl::default(),
            target_latency_ms: Some(2000.0),
            ..Default::default()
        };
        let resolved = allocate(&quality, &source(), 128_000.0).unwrap();
        let total = total_latency_ms(&resolved, 128_000.0);
        assert!(within_epsilon(total, 2000.0), "total latency {total} exceeds budget");
        assert!(resolved.min_bitrate_bps > 0.0);
        assert!(resolved.bitrate_bps >= resolved.min_bitrate_bps);
    }

    #[test]
    fn allocator_is_idempotent() {
        let quality = Quality {
            video: VideoQuality { width: Some(1920), height: Some(1080), frame_rate: Some(FrameRate::fps(25)), crf: Some(25.0), ..Default::default() },
            target_latency_ms: Some(2000.0),
            ..Default::default()
        };
        let first = allocate(&quality, &source(), 128_000.0).unwrap();
        let mut refixed = quality.clone();
        refixed.video.min_bitrate = Some(first.min_bitrate_bps as u64);
        refixed.video.rate_control_buffer_length_ms = Some(first.rate_control_buffer_ms);
        refixed.client_buffer_control.extra_buffer_ms = Some(first.client_extra_buffer_ms);
        let second = allocate(&refixed, &source(), 128_000.0).unwrap();
        assert!((second.min_bitrate_bps - first.min_bitrate_bps).abs() < 1.0);
    }

    #[test]
    fn infeasible_budget_is_rejected() {
        let mut quality = Quality::default();
        quality.target_latency_ms = Some(2000.0);
        let mut src = source();
        src.source_latency_ms = 5000.0;
        assert!(allocate(&quality, &src, 0.0).is_err());
    }
}
