//! Paired-image record payload
//!
//! A record carries two opaque encoded images, `degraded` then `clean`,
//! each as a little-endian `u32` length followed by that many bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{PipelineError, Result};

/// One serialized degraded/clean pair, still encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRecord {
    /// Encoded degraded image (e.g. PNG)
    pub degraded: Bytes,
    /// Encoded clean target image
    pub clean: Bytes,
}

impl PairRecord {
    pub fn new(degraded: impl Into<Bytes>, clean: impl Into<Bytes>) -> Self {
        Self {
            degraded: degraded.into(),
            clean: clean.into(),
        }
    }

    /// Serialize into the two-field payload; fails if a field does not
    /// fit its `u32` length prefix
    pub fn encode(&self) -> Result<Bytes> {
        let degraded_len = field_len(self.degraded.len(), "degraded")?;
        let clean_len = field_len(self.clean.len(), "clean")?;
        let mut buf = BytesMut::with_capacity(8 + self.degraded.len() + self.clean.len());
        buf.put_u32_le(degraded_len);
        buf.put_slice(&self.degraded);
        buf.put_u32_le(clean_len);
        buf.put_slice(&self.clean);
        Ok(buf.freeze())
    }

    /// Parse a payload; both fields must be present and the payload fully consumed
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let degraded = take_field(&mut payload, "degraded")?;
        let clean = take_field(&mut payload, "clean")?;
        if payload.has_remaining() {
            return Err(PipelineError::malformed(format!(
                "{} trailing bytes after clean field",
                payload.remaining()
            )));
        }
        Ok(Self { degraded, clean })
    }
}

fn field_len(len: usize, name: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        PipelineError::malformed(format!(
            "{} field of {} bytes exceeds the u32 length prefix",
            name, len
        ))
    })
}

fn take_field(payload: &mut Bytes, name: &str) -> Result<Bytes> {
    if payload.remaining() < 4 {
        return Err(PipelineError::malformed(format!(
            "missing length prefix for {} field",
            name
        )));
    }
    let len = payload.get_u32_le() as usize;
    if payload.remaining() < len {
        return Err(PipelineError::malformed(format!(
            "{} field declares {} bytes, only {} left",
            name,
            len,
            payload.remaining()
        )));
    }
    if len == 0 {
        return Err(PipelineError::malformed(format!("{} field is empty", name)));
    }
    Ok(payload.split_to(len))
}
