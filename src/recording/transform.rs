// src/recording/transform.rs
//! Per-event transforms: size estimation and URL masking

use crate::utils::errors::RecorderError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

/// Compact JSON length of `value` in bytes
///
/// Walks the value with an explicit stack so arbitrarily deep input cannot
/// overflow the call stack. The result matches `serde_json::to_vec(value).len()`.
pub fn estimate_size(value: &Value) -> usize {
    let mut total = 0usize;
    let mut stack: Vec<&Value> = vec![value];

    while let Some(current) = stack.pop() {
        match current {
            Value::Null => total += 4,
            Value::Bool(true) => total += 4,
            Value::Bool(false) => total += 5,
            Value::Number(n) => total += n.to_string().len(),
            Value::String(s) => total += escaped_len(s),
            Value::Array(items) => {
                // brackets plus separators
                total += 2 + items.len().saturating_sub(1);
                stack.extend(items.iter());
            }
            Value::Object(map) => {
                // braces, separators, and a colon per key
                total += 2 + map.len().saturating_sub(1) + map.len();
                for (key, item) in map {
                    total += escaped_len(key);
                    stack.push(item);
                }
            }
        }
    }

    total
}

/// Length of a JSON string literal including quotes
fn escaped_len(s: &str) -> usize {
    let mut len = 2;
    for ch in s.chars() {
        len += match ch {
            '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
            c if (c as u32) < 0x20 => 6,
            c => c.len_utf8(),
        };
    }
    len
}

/// A network request URL exposed to masking functions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub url: String,
}

/// Current masking function. `Ok(None)` drops the URL entirely.
pub type MaskNetworkRequestFn =
    Arc<dyn Fn(NetworkRequest) -> anyhow::Result<Option<NetworkRequest>> + Send + Sync>;

/// Deprecated masking function operating on a loose JSON request object.
/// It may return the URL under either `url` or `name`.
pub type LegacyMaskFn = Arc<dyn Fn(Value) -> anyhow::Result<Option<Value>> + Send + Sync>;

/// User supplied masking hooks
#[derive(Clone, Default)]
pub struct UrlMasker {
    mask_network_request: Option<MaskNetworkRequestFn>,
    legacy_mask: Option<LegacyMaskFn>,
}

impl fmt::Debug for UrlMasker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlMasker")
            .field("mask_network_request", &self.mask_network_request.is_some())
            .field("legacy_mask", &self.legacy_mask.is_some())
            .finish()
    }
}

impl UrlMasker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mask_fn(mut self, f: MaskNetworkRequestFn) -> Self {
        self.mask_network_request = Some(f);
        self.warn_if_both();
        self
    }

    pub fn with_legacy_mask_fn(mut self, f: LegacyMaskFn) -> Self {
        self.legacy_mask = Some(f);
        self.warn_if_both();
        self
    }

    fn warn_if_both(&self) {
        if self.mask_network_request.is_some() && self.legacy_mask.is_some() {
            warn!(
                "Both mask_network_request_fn and the deprecated mask_captured_network_request_fn \
                 are set; only mask_network_request_fn will be used"
            );
        }
    }

    pub fn is_configured(&self) -> bool {
        self.mask_network_request.is_some() || self.legacy_mask.is_some()
    }

    /// Apply the configured masking to `url`
    ///
    /// `None` means the URL must be dropped. A failing masking function
    /// leaves the URL unmasked.
    pub fn mask_url(&self, url: &str) -> Option<String> {
        if let Some(mask) = &self.mask_network_request {
            let request = NetworkRequest { url: url.to_string() };
            return match mask(request) {
                Ok(masked) => masked.map(|r| r.url),
                Err(e) => {
                    let err =
                        RecorderError::MaskingFailed(format!("mask_network_request_fn: {}", e));
                    error!("{}, using unmasked url", err);
                    Some(url.to_string())
                }
            };
        }

        if let Some(legacy) = &self.legacy_mask {
            let request = serde_json::json!({ "url": url, "name": url });
            return match legacy(request) {
                Ok(Some(masked)) => masked
                    .get("url")
                    .or_else(|| masked.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                Ok(None) => None,
                Err(e) => {
                    let err =
                        RecorderError::MaskingFailed(format!("legacy mask function: {}", e));
                    error!("{}, using unmasked url", err);
                    Some(url.to_string())
                }
            };
        }

        Some(url.to_string())
    }
}
