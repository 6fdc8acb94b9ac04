// src/recording/options.rs
//! Options handed to the recorder library
//!
//! Merges client-side `RecordingOptions` with the server-side recording
//! config. Client opt-outs always win.

use crate::recording::remote_config::SessionRecordingRemoteConfig;
use crate::utils::config::RecordingOptions;
use serde::Serialize;
use tracing::warn;

/// Highest canvas frame rate the recorder will sample at
pub const MAX_CANVAS_FPS: u32 = 12;
pub const DEFAULT_CANVAS_FPS: u32 = 4;
pub const DEFAULT_CANVAS_QUALITY: f64 = 0.4;

/// Merge a server and a client flag
///
/// An explicit client `false` wins; otherwise the first defined of server
/// and client, falling back to `default`.
pub fn resolve_flag(server: Option<bool>, client: Option<bool>, default: bool) -> bool {
    if client == Some(false) {
        return false;
    }
    server.or(client).unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanvasOptions {
    pub fps: u32,
    /// 0.0 - 1.0
    pub quality: f64,
}

impl CanvasOptions {
    pub fn new(fps: f64, quality: f64) -> Self {
        let fps = if fps.is_finite() {
            fps.clamp(0.0, MAX_CANVAS_FPS as f64) as u32
        } else {
            DEFAULT_CANVAS_FPS
        };
        let quality = if quality.is_finite() {
            quality.clamp(0.0, 1.0)
        } else {
            DEFAULT_CANVAS_QUALITY
        };
        Self { fps, quality }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "plugin", rename_all = "snake_case")]
pub enum RecordPlugin {
    ConsoleLog,
    Network { record_headers: bool, record_body: bool },
}

/// Everything the recorder library is started with
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOptions {
    pub mask_all_inputs: bool,
    pub mask_text_selector: Option<String>,
    pub block_selector: Option<String>,
    pub record_cross_origin_iframes: bool,
    pub canvas: Option<CanvasOptions>,
    pub plugins: Vec<RecordPlugin>,
}

impl RecordOptions {
    pub fn build(client: &RecordingOptions, remote: &SessionRecordingRemoteConfig) -> Self {
        let masking = remote.masking.clone().unwrap_or_default();

        let canvas = resolve_flag(remote.record_canvas, client.record_canvas, false).then(|| {
            let fps = client
                .canvas_fps
                .or(remote.canvas_fps)
                .unwrap_or(DEFAULT_CANVAS_FPS as f64);
            let quality = client
                .canvas_quality
                .or_else(|| remote.canvas_quality.as_deref().and_then(parse_quality))
                .unwrap_or(DEFAULT_CANVAS_QUALITY);
            CanvasOptions::new(fps, quality)
        });

        let mut plugins = Vec::new();
        if resolve_flag(remote.console_log_recording_enabled, client.console_log, false) {
            plugins.push(RecordPlugin::ConsoleLog);
        }

        let network = remote.network_payload_capture.clone().unwrap_or_default();
        let record_headers = resolve_flag(network.record_headers, client.record_headers, false);
        let record_body = resolve_flag(network.record_body, client.record_body, false);
        if record_headers || record_body {
            plugins.push(RecordPlugin::Network {
                record_headers,
                record_body,
            });
        }

        Self {
            // masking only ever tightens
            mask_all_inputs: client.mask_all_inputs || masking.mask_all_inputs == Some(true),
            mask_text_selector: client
                .mask_text_selector
                .clone()
                .or(masking.mask_text_selector),
            block_selector: client.block_selector.clone().or(masking.block_selector),
            record_cross_origin_iframes: client.record_cross_origin_iframes,
            canvas,
            plugins,
        }
    }
}

fn parse_quality(raw: &str) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(quality) => Some(quality),
        Err(_) => {
            warn!("Ignoring unparsable canvas quality {:?}", raw);
            None
        }
    }
}
