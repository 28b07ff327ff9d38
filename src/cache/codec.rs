//! Serialization helpers shared by both cache tiers.
//!
//! Frames are opaque byte blobs; both tiers store text (base64-encoded frames
//! inside a bincode-serialized envelope), so a malformed record can always be
//! detected as "not valid bincode" / "not valid base64" rather than silently
//! corrupting binary data. Grounded in `database::cache::CacheManager`'s
//! `serialize`/`deserialize`/`compress`/`decompress` helpers.

use crate::model::CacheEntry;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec errors: any of these are treated as a miss by the caller.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The stored bytes were not valid bincode for the expected shape.
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// On-the-wire form of a `CacheEntry`, with frames text-encoded as base64 so
/// the record is safe to store in either tier as text.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEntry {
    cache_key: String,
    user_id: String,
    structured_prompt: crate::model::StructuredRequest,
    job_id: String,
    frames_b64: Vec<String>,
    dimensions: crate::model::Size,
    generation_time_ms: u64,
    cache_hit: bool,
    external_job_id: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
    hits: u64,
    last_accessed_at: chrono::DateTime<chrono::Utc>,
}

/// Encode a `CacheEntry` into its storable byte form.
pub fn encode(entry: &CacheEntry) -> Result<Vec<u8>, CodecError> {
    let wire = WireEntry {
        cache_key: entry.cache_key.as_str().to_string(),
        user_id: entry.user_id.clone(),
        structured_prompt: entry.structured_prompt.clone(),
        job_id: entry.result.job_id.clone(),
        frames_b64: entry
            .result
            .frames
            .iter()
            .map(|frame| STANDARD.encode(frame))
            .collect(),
        dimensions: entry.result.metadata.dimensions,
        generation_time_ms: entry.result.metadata.generation_time_ms,
        cache_hit: entry.result.metadata.cache_hit,
        external_job_id: entry.result.metadata.external_job_id.clone(),
        created_at: entry.created_at,
        expires_at: entry.expires_at,
        hits: entry.hits,
        last_accessed_at: entry.last_accessed_at,
    };
    bincode::serialize(&wire).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode bytes previously produced by [`encode`] back into a `CacheEntry`.
/// Frames round-trip byte-for-byte through the base64 boundary.
pub fn decode(bytes: &[u8]) -> Result<CacheEntry, CodecError> {
    let wire: WireEntry =
        bincode::deserialize(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let mut frames = Vec::with_capacity(wire.frames_b64.len());
    for encoded in &wire.frames_b64 {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        frames.push(bytes);
    }

    let frame_count = frames.len();
    let result = crate::model::GenerationResult {
        job_id: wire.job_id,
        frames,
        metadata: crate::model::ResultMetadata {
            dimensions: wire.dimensions,
            frame_count,
            generation_time_ms: wire.generation_time_ms,
            cache_hit: wire.cache_hit,
            external_job_id: wire.external_job_id,
        },
    };

    Ok(CacheEntry {
        cache_key: crate::model::CacheKey(wire.cache_key),
        user_id: wire.user_id,
        structured_prompt: wire.structured_prompt,
        result,
        created_at: wire.created_at,
        expires_at: wire.expires_at,
        hits: wire.hits,
        last_accessed_at: wire.last_accessed_at,
    })
}
