// src/recording/compressor.rs
//! Gzip compression for bulky event payloads
//!
//! Full snapshots and mutation/stylesheet incremental events carry most of
//! the bytes in a recording. Their heavy sub-fields are gzipped and base64
//! encoded independently so the event stays valid JSON, and the event is
//! tagged with a compression version marker. Everything else passes through.

use crate::recording::event::{EventType, IncrementalSource, RecorderEvent};
use crate::recording::transform::estimate_size;
use crate::utils::errors::{RecorderError, Result};
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};
use tracing::{debug, error};

/// Version marker written to `cv` on compressed events
pub const COMPRESSION_VERSION: &str = "2024-10";

/// Events smaller than this are not worth compressing
pub const MIN_COMPRESSIBLE_SIZE: usize = 1024;

const MUTATION_FIELDS: [&str; 4] = ["texts", "attributes", "removes", "adds"];
const STYLESHEET_FIELDS: [&str; 2] = ["adds", "removes"];

/// Compression levels
#[derive(Debug, Clone, Copy)]
pub enum CompressionLevel {
    /// Fast compression (level 1)
    Fast,

    /// Balanced (level 6)
    Balanced,

    /// Best compression (level 9)
    Best,
}

impl CompressionLevel {
    pub fn as_u32(&self) -> u32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 6,
            CompressionLevel::Best => 9,
        }
    }
}

/// Gzip + base64 compressor for event fields
pub struct Compressor {
    level: CompressionLevel,
}

impl Compressor {
    /// Create a new compressor
    pub fn new(level: CompressionLevel) -> Self {
        Self { level }
    }

    /// Gzip `value` serialized as JSON and encode the bytes as base64
    pub fn compress_value(&self, value: &Value) -> Result<String> {
        let json = serde_json::to_vec(value)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level.as_u32()));
        encoder
            .write_all(&json)
            .map_err(|e| RecorderError::CompressionFailed(format!("gzip write: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| RecorderError::CompressionFailed(format!("gzip finish: {}", e)))?;

        Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
    }

    /// Inverse of `compress_value`
    pub fn decompress_value(&self, encoded: &str) -> Result<Value> {
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RecorderError::CompressionFailed(format!("base64 decode: {}", e)))?;

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|e| RecorderError::CompressionFailed(format!("gzip read: {}", e)))?;

        Ok(serde_json::from_slice(&json)?)
    }

    /// Compress the bulky fields of `event`
    ///
    /// Never fails: on error the original event is returned untouched.
    pub fn compress_event(&self, event: RecorderEvent) -> RecorderEvent {
        if event.cv.is_some() || !is_compressible(&event) {
            return event;
        }

        let original_size = estimate_size(&event.data);
        if original_size < MIN_COMPRESSIBLE_SIZE {
            return event;
        }

        match self.try_compress(&event) {
            Ok(compressed) => {
                debug!(
                    "Compressed {:?} event data from {} bytes to {} bytes",
                    event.event_type,
                    original_size,
                    estimate_size(&compressed.data)
                );
                compressed
            }
            Err(e) => {
                error!("Could not compress event, using uncompressed event: {}", e);
                event
            }
        }
    }

    fn try_compress(&self, event: &RecorderEvent) -> Result<RecorderEvent> {
        let mut compressed = event.clone();

        if event.event_type == EventType::FullSnapshot {
            compressed.data = Value::String(self.compress_value(&event.data)?);
        } else {
            let fields: &[&str] = match event.incremental_source() {
                Some(IncrementalSource::Mutation) => &MUTATION_FIELDS,
                Some(IncrementalSource::StyleSheetRule) => &STYLESHEET_FIELDS,
                _ => return Ok(compressed),
            };

            let data = compressed.data.as_object_mut().ok_or_else(|| {
                RecorderError::CompressionFailed("incremental data is not an object".to_string())
            })?;
            for field in fields {
                if let Some(value) = data.get(*field) {
                    let encoded = self.compress_value(value)?;
                    data.insert(field.to_string(), Value::String(encoded));
                }
            }
        }

        compressed.cv = Some(COMPRESSION_VERSION.to_string());
        Ok(compressed)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionLevel::Balanced)
    }
}

fn is_compressible(event: &RecorderEvent) -> bool {
    match event.event_type {
        EventType::FullSnapshot => true,
        EventType::IncrementalSnapshot => matches!(
            event.incremental_source(),
            Some(IncrementalSource::Mutation) | Some(IncrementalSource::StyleSheetRule)
        ),
        _ => false,
    }
}
