//! The instance state machine: applies/replaces configuration and starts or
//! stops channels accordingly. Grounded on `instance/State.cpp`. Serialized
//! by a single mutex — concurrent `apply_configuration` calls queue rather
//! than race.

use crate::config::defaults::{ProbeFn, Resolver};
use crate::config::{Channel, Root};
use crate::dash::interleave::ControlChunkType;
use crate::dash::{Coordinator, CoordinatorConfig, StreamPlacement};
use crate::error::{Error, Result};
use crate::ffmpeg::process::Process;
use crate::log::{Context as LogContext, Log};
use crate::path::Path;
use crate::resources::{ConstantResource, FilesystemResource, ManifestResource};
use crate::server::address::{default_private_networks, CidrBlock};
use crate::server::response::CacheKind;
use crate::server::Server;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

struct ChannelState {
    coordinator: Arc<Coordinator>,
    process: Option<Process>,
}

struct Inner {
    active: Option<Root>,
    requested: Option<Root>,
    channel_states: HashMap<String, ChannelState>,
    in_use_urls: HashSet<String>,
}

pub struct Instance {
    server: Arc<Server>,
    log: Log,
    apply_lock: Mutex<Inner>,
    channel_index: Arc<ConstantResource>,
}

/// Configuration fields that cannot change without a full restart.
fn runtime_immutable_violation(active: &Root, new: &Root) -> Option<String> {
    if active.network.port != new.network.port {
        return Some("network.port cannot change at runtime".into());
    }
    if active.network.public_port != new.network.public_port {
        return Some("network.publicPort cannot change at runtime".into());
    }
    if active.http.ephemeral_when_not_found != new.http.ephemeral_when_not_found {
        return Some("http.ephemeralWhenNotFound cannot change at runtime".into());
    }
    if active.features != new.features {
        return Some("features cannot change at runtime".into());
    }
    if active.log.path != new.log.path {
        return Some("log.path cannot change at runtime".into());
    }
    if active.directories != new.directories {
        return Some("directories cannot change at runtime".into());
    }
    None
}

impl Instance {
    pub fn new(server: Arc<Server>, log: Log) -> Arc<Self> {
        Arc::new(Instance {
            server,
            log,
            apply_lock: Mutex::new(Inner {
                active: None,
                requested: None,
                channel_states: HashMap::new(),
                in_use_urls: HashSet::new(),
            }),
            channel_index: Arc::new(ConstantResource::new("[]", "application/json", CacheKind::Ephemeral, true)),
        })
    }

    /// Mounts `channelIndex.json` at the server root. Must be called once
    /// before the first `apply_configuration`.
    pub async fn mount_ambient_resources(&self) -> Result<()> {
        self.server
            .add_or_replace(&Path::parse("channelIndex.json").map_err(Error::BadRequest)?, self.channel_index.clone())
            .await
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub async fn requested_config(&self) -> Option<Root> {
        self.apply_lock.lock().await.requested.clone()
    }

    pub async fn in_use_urls(&self) -> HashSet<String> {
        self.apply_lock.lock().await.in_use_urls.clone()
    }

    /// CIDR list used to classify a peer as private or public. Falls back
    /// to the built-in defaults until a configuration has been applied.
    pub async fn private_networks(&self) -> Vec<CidrBlock> {
        let inner = self.apply_lock.lock().await;
        match &inner.active {
            Some(active) if !active.network.private_networks.is_empty() => active
                .network
                .private_networks
                .iter()
                .filter_map(|s| CidrBlock::parse(s).ok())
                .collect(),
            _ => default_private_networks(),
        }
    }

    pub async fn channel_names(&self) -> Vec<String> {
        self.apply_lock.lock().await.channel_states.keys().cloned().collect()
    }

    /// Pushes a control chunk into every open interleave of `channel`.
    pub async fn broadcast_control(&self, channel: &str, ctype: ControlChunkType, payload: &[u8]) -> Result<()> {
        let inner = self.apply_lock.lock().await;
        let state = inner.channel_states.get(channel).ok_or(Error::NotFound)?;
        state.coordinator.broadcast_control(ctype, payload).await
    }

    pub async fn apply_configuration(self: &Arc<Self>, mut new: Root, probe: &dyn ProbeFn) -> Result<()> {
        let mut inner = self.apply_lock.lock().await;

        let resolver = Resolver::new(probe);
        resolver.resolve(&mut new, inner.active.as_ref().map(|a| a.network.port).unwrap_or(new.network.port)).await?;

        if let Some(active) = &inner.active {
            if let Some(reason) = runtime_immutable_violation(active, &new) {
                return Err(Error::BadConfigurationReplacement(reason));
            }
        } else {
            self.mount_directories(&new).await?;
        }

        let keep: HashSet<String> = new.channels.keys().cloned().collect();
        let mut to_stop = Vec::new();
        for name in inner.channel_states.keys() {
            let should_restart = match (inner.active.as_ref(), new.channels.get(name)) {
                (Some(active), Some(_)) => {
                    let active_channel = &active.channels[name];
                    let new_channel = &new.channels[name];
                    !channel_differs_by_uid_only(active_channel, new_channel)
                }
                _ => true,
            };
            if !keep.contains(name) || should_restart {
                to_stop.push(name.clone());
            }
        }
        for name in &to_stop {
            if let Some(mut state) = inner.channel_states.remove(name) {
                state.coordinator.shutdown();
                if let Some(process) = state.process.as_mut() {
                    process.kill().await;
                }
            }
        }

        for (name, channel) in new.channels.clone() {
            if inner.channel_states.contains_key(&name) {
                continue;
            }
            let state = self.start_channel(&name, &channel).await?;
            inner.channel_states.insert(name, state);
        }

        let in_use_urls: HashSet<String> = resolver.in_use_urls().await.into_iter().collect();
        inner.in_use_urls = in_use_urls;
        inner.requested = Some(new.clone());
        inner.active = Some(new);

        let names: Vec<&String> = inner.channel_states.keys().collect();
        let index_json = serde_json::to_string(&names).expect("channel names always serialize");
        self.channel_index.replace(index_json).await;
        Ok(())
    }

    /// Mounts a [`FilesystemResource`] for each entry of the `directories`
    /// configuration section. `directories` is runtime-immutable, so this
    /// only needs to run once, on the first applied configuration.
    async fn mount_directories(&self, root: &Root) -> Result<()> {
        for (name, dir) in &root.directories {
            let path = Path::parse(name).map_err(Error::BadRequest)?;
            let resource = FilesystemResource::new(
                PathBuf::from(&dir.local_path),
                dir.index_file.clone(),
                dir.writable,
            );
            self.server.add_or_replace(&path, Arc::new(resource)).await?;
        }
        Ok(())
    }

    async fn start_channel(self: &Arc<Self>, name: &str, channel: &Channel) -> Result<ChannelState> {
        let uid = channel.uid.clone().unwrap_or_default();
        let mut placements = HashMap::new();
        for (i, _quality) in channel.qualities.iter().enumerate() {
            placements.insert(i as u8, StreamPlacement { interleave_index: i as u8, index_in_interleave: 0 });
        }
        let stream_indices: Vec<u8> = placements.keys().copied().collect();
        let segment_duration_ms = channel.dash.segment_duration_ms.unwrap_or(2000);
        let pre_availability_ms = channel.dash.pre_availability_ms.unwrap_or(500);
        let log_context: LogContext = self.log.context(format!("channel:{name}"), None);
        let coordinator = Coordinator::new(
            self.server.clone(),
            CoordinatorConfig {
                channel_path: Path::parse(name).map_err(Error::BadRequest)?,
                uid,
                segment_duration_ms,
                pre_availability_ms,
                retention_secs: channel.history.retention_secs.unwrap_or(30),
                retain_segments: channel.dash.expose_segments,
                placements,
                interleave_timestamp_interval_ms: channel
                    .qualities
                    .first()
                    .and_then(|q| q.interleave_timestamp_interval_ms)
                    .unwrap_or(u64::MAX),
            },
            log_context,
        );
        for stream_index in stream_indices {
            coordinator.create_segment(stream_index, 0).await?;
        }
        coordinator.spawn_gc_loop();

        let binary = channel.ffmpeg.binary.clone().unwrap_or_else(|| "ffmpeg".to_string());
        let process = Process::spawn(&binary, &channel.source.arguments).ok();

        let channel_path = Path::parse(name).map_err(Error::BadRequest)?;
        let info_path = channel_path.join(&Path::parse("info.json").expect("literal path segment"));
        let info = ConstantResource::new(build_info_json(channel), "application/json", CacheKind::Ephemeral, true);
        self.server.add_or_replace(&info_path, Arc::new(info)).await?;

        let uid_path = channel_path.join(&Path::parse(coordinator_uid(channel)).expect("uid is a valid path segment"));
        let manifest_path = uid_path.join(&Path::parse("manifest.mpd").expect("literal path segment"));
        self.server.add_or_replace(&manifest_path, Arc::new(ManifestResource::default())).await?;

        Ok(ChannelState { coordinator, process })
    }
}

fn coordinator_uid(channel: &Channel) -> String {
    channel.uid.clone().unwrap_or_default()
}

/// Builds the per-channel `info.json` body: segment timing, and each
/// quality's resolved video/audio parameters, keyed by stream index.
fn build_info_json(channel: &Channel) -> String {
    let qualities: Vec<serde_json::Value> = channel
        .qualities
        .iter()
        .enumerate()
        .map(|(stream_index, q)| {
            serde_json::json!({
                "streamIndex": stream_index,
                "video": q.video,
                "audio": q.audio,
                "targetLatencyMs": q.target_latency_ms,
            })
        })
        .collect();
    let body = serde_json::json!({
        "segmentDurationMs": channel.dash.segment_duration_ms,
        "preAvailabilityMs": channel.dash.pre_availability_ms,
        "qualities": qualities,
    });
    body.to_string()
}

fn channel_differs_by_uid_only(a: &Channel, b: &Channel) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.uid = None;
    b.uid = None;
    a == b
}
