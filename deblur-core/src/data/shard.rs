//! Shard framing for serialized records
//!
//! A shard is a sequence of framed records:
//! `u64 length | u32 masked crc32c(length) | payload | u32 masked crc32c(payload)`,
//! all little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

const MASK_DELTA: u32 = 0xa282_ead8;
const HEADER_LEN: usize = 8 + 4;
const FOOTER_LEN: usize = 4;

/// Rotate-and-offset so checksums of checksummed data stay well distributed
pub fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    (crc.rotate_right(15)).wrapping_add(MASK_DELTA)
}

/// Location of a shard to be loaded
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardSpec {
    /// Position in the sorted listing
    pub id: u32,
    /// Object key in storage
    pub key: String,
}

impl ShardSpec {
    /// Create a new shard specification
    pub fn new(id: u32, key: impl Into<String>) -> Self {
        Self { id, key: key.into() }
    }
}

/// A fetched shard with its raw bytes
#[derive(Debug, Clone)]
pub struct Shard {
    pub spec: ShardSpec,
    pub data: Bytes,
}

impl Shard {
    pub fn new(spec: ShardSpec, data: Bytes) -> Self {
        Self { spec, data }
    }

    /// Get shard size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Iterate the framed payloads in file order
    pub fn records(&self) -> RecordReader {
        RecordReader::new(self.spec.key.clone(), self.data.clone())
    }
}

/// Zero-copy iterator over framed payloads in a shard
pub struct RecordReader {
    key: String,
    data: Bytes,
    failed: bool,
}

impl RecordReader {
    pub fn new(key: impl Into<String>, data: Bytes) -> Self {
        Self {
            key: key.into(),
            data,
            failed: false,
        }
    }

    fn read_one(&mut self) -> Result<Bytes> {
        if self.data.remaining() < HEADER_LEN {
            return Err(PipelineError::malformed(format!(
                "{}: truncated record header",
                self.key
            )));
        }
        let len_bytes = self.data.slice(..8);
        let declared = self.data.get_u64_le();
        let expected = self.data.get_u32_le();
        let actual = masked_crc32c(&len_bytes);
        if expected != actual {
            return Err(PipelineError::ChecksumMismatch {
                key: self.key.clone(),
                expected,
                actual,
            });
        }

        let available = self.data.remaining().saturating_sub(FOOTER_LEN);
        let len = match usize::try_from(declared) {
            Ok(len) if len <= available => len,
            _ => {
                return Err(PipelineError::malformed(format!(
                    "{}: record declares {} bytes, only {} left",
                    self.key,
                    declared,
                    self.data.remaining()
                )))
            }
        };
        let payload = self.data.split_to(len);
        let expected = self.data.get_u32_le();
        let actual = masked_crc32c(&payload);
        if expected != actual {
            return Err(PipelineError::ChecksumMismatch {
                key: self.key.clone(),
                expected,
                actual,
            });
        }
        Ok(payload)
    }
}

impl Iterator for RecordReader {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.data.has_remaining() {
            return None;
        }
        let item = self.read_one();
        // a framing error leaves the cursor in an unknown position
        self.failed = item.is_err();
        Some(item)
    }
}

/// Accumulates framed records into one shard body
#[derive(Debug, Default)]
pub struct ShardWriter {
    buf: BytesMut,
    records: usize,
}

impl ShardWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one framed payload
    pub fn push(&mut self, payload: &[u8]) {
        let len = (payload.len() as u64).to_le_bytes();
        self.buf.reserve(HEADER_LEN + payload.len() + FOOTER_LEN);
        self.buf.put_slice(&len);
        self.buf.put_u32_le(masked_crc32c(&len));
        self.buf.put_slice(payload);
        self.buf.put_u32_le(masked_crc32c(payload));
        self.records += 1;
    }

    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Finish the shard, returning its bytes
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_of(payloads: &[&[u8]]) -> Bytes {
        let mut writer = ShardWriter::new();
        for p in payloads {
            writer.push(p);
        }
        writer.finish()
    }

    #[test]
    fn test_reads_records_in_order() {
        let data = shard_of(&[b"first", b"second", b"third"]);
        let records: Vec<Bytes> = RecordReader::new("s", data)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![&b"first"[..], &b"second"[..], &b"third"[..]]);
    }

    #[test]
    fn test_empty_shard_yields_nothing() {
        assert_eq!(RecordReader::new("s", Bytes::new()).count(), 0);
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut data = BytesMut::from(&shard_of(&[b"payload"])[..]);
        data[HEADER_LEN] ^= 0xff;
        let mut reader = RecordReader::new("shard-0", data.freeze());
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::ChecksumMismatch { .. }));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_truncated_shard_detected() {
        let data = shard_of(&[b"payload"]);
        let truncated = data.slice(..data.len() - 2);
        let mut reader = RecordReader::new("shard-0", truncated);
        assert!(reader.next().unwrap().unwrap_err().is_corruption());
    }

    #[test]
    fn test_oversized_length_is_malformed() {
        let len = (u64::MAX - 1).to_le_bytes();
        let mut data = BytesMut::new();
        data.put_slice(&len);
        data.put_u32_le(masked_crc32c(&len));
        data.put_slice(b"short payload");
        data.put_u32_le(0);

        let mut reader = RecordReader::new("shard-0", data.freeze());
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { .. }));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_mask_differs_from_raw_crc() {
        let data = b"abc";
        assert_ne!(masked_crc32c(data), crc32c::crc32c(data));
    }
}
