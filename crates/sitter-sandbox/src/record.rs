//! Decoders for the fixed-layout records the engine leaves in guest memory.
//!
//! ## Layouts (wasm32, little-endian)
//!
//! ```text
//! TSNode          24 bytes, opaque: context[4] u32, id u32 @16, tree u32 @20
//! TSQueryMatch    id u32 @0 | pattern_index u16 @4 | capture_count u16 @6 | captures u32 @8
//! TSQueryCapture  node TSNode @0 (24 bytes) | index u32 @24    (stride 28)
//! ```
//!
//! Every decoder takes the guest memory as a byte slice and checks the whole
//! record against its length before reading, so a bad pointer from the guest
//! surfaces as [`SitterError::CorruptRecord`].

use crate::error::{Result, SitterError};

/// Size of a node descriptor.
pub const NODE_DESCRIPTOR_SIZE: u32 = 24;

/// Size of a query match record.
pub const MATCH_RECORD_SIZE: u32 = 12;

/// Distance between consecutive capture records.
pub const CAPTURE_RECORD_STRIDE: u32 = 28;

/// Offset of the capture index within a capture record.
const CAPTURE_INDEX_OFFSET: u32 = 24;

/// Borrow `len` bytes at `address`, or report which record ran off the end.
fn record_bytes<'m>(
    memory: &'m [u8],
    record: &'static str,
    address: u32,
    len: u64,
) -> Result<&'m [u8]> {
    let start = address as u64;
    let end = start + len;
    if end > memory.len() as u64 {
        return Err(SitterError::CorruptRecord {
            record,
            address,
            len,
            memory_size: memory.len(),
        });
    }
    Ok(&memory[start as usize..end as usize])
}

pub(crate) fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

pub(crate) fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A node descriptor resident in guest memory.
///
/// The host never looks inside it; the address is handed back to the
/// engine's node accessors as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Guest address of the 24-byte descriptor
    pub address: u32,
}

impl NodeDescriptor {
    /// Check that a whole descriptor fits at `address`.
    pub fn locate(memory: &[u8], address: u32) -> Result<Self> {
        record_bytes(memory, "node", address, NODE_DESCRIPTOR_SIZE as u64)?;
        Ok(Self { address })
    }
}

/// A decoded `TSQueryMatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRecord {
    /// Match id
    pub id: u32,
    /// Index of the pattern that matched
    pub pattern_index: u16,
    /// Number of capture records at `captures_address`
    pub capture_count: u16,
    /// Guest address of the capture array
    pub captures_address: u32,
}

impl MatchRecord {
    /// Decode a match record at `address`.
    pub fn decode(memory: &[u8], address: u32) -> Result<Self> {
        let bytes = record_bytes(memory, "query match", address, MATCH_RECORD_SIZE as u64)?;
        Ok(Self {
            id: le_u32(&bytes[0..4]),
            pattern_index: le_u16(&bytes[4..6]),
            capture_count: le_u16(&bytes[6..8]),
            captures_address: le_u32(&bytes[8..12]),
        })
    }

    /// Decode the capture array this match points at.
    pub fn captures(&self, memory: &[u8]) -> Result<Vec<CaptureRecord>> {
        let total = self.capture_count as u64 * CAPTURE_RECORD_STRIDE as u64;
        record_bytes(memory, "capture array", self.captures_address, total)?;

        (0..self.capture_count as u32)
            .map(|i| {
                CaptureRecord::decode(memory, self.captures_address + i * CAPTURE_RECORD_STRIDE)
            })
            .collect()
    }
}

/// A decoded `TSQueryCapture`. The node is a view into the capture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRecord {
    /// The captured node, viewed in place
    pub node: NodeDescriptor,
    /// Pattern-local capture index
    pub index: u32,
}

impl CaptureRecord {
    /// Decode a capture record at `address`.
    pub fn decode(memory: &[u8], address: u32) -> Result<Self> {
        let bytes = record_bytes(memory, "query capture", address, CAPTURE_RECORD_STRIDE as u64)?;
        let index_at = CAPTURE_INDEX_OFFSET as usize;
        Ok(Self {
            node: NodeDescriptor { address },
            index: le_u32(&bytes[index_at..index_at + 4]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_u32(memory: &mut [u8], at: u32, value: u32) {
        memory[at as usize..at as usize + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u16(memory: &mut [u8], at: u32, value: u16) {
        memory[at as usize..at as usize + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Match record at 16, two captures at 64.
    fn synthetic_match() -> Vec<u8> {
        let mut memory = vec![0u8; 256];
        put_u32(&mut memory, 16, 7);
        put_u16(&mut memory, 20, 2);
        put_u16(&mut memory, 22, 2);
        put_u32(&mut memory, 24, 64);
        put_u32(&mut memory, 64 + 24, 11);
        put_u32(&mut memory, 64 + 28 + 24, 5);
        memory
    }

    #[test]
    fn test_decode_match_record() {
        let memory = synthetic_match();
        let record = MatchRecord::decode(&memory, 16).unwrap();
        assert_eq!(
            record,
            MatchRecord {
                id: 7,
                pattern_index: 2,
                capture_count: 2,
                captures_address: 64,
            }
        );
    }

    #[test]
    fn test_decode_captures_walks_stride() {
        let memory = synthetic_match();
        let record = MatchRecord::decode(&memory, 16).unwrap();
        let captures = record.captures(&memory).unwrap();

        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0].node.address, 64);
        assert_eq!(captures[0].index, 11);
        // second capture index lives at P + 28 + 24
        assert_eq!(captures[1].node.address, 64 + 28);
        assert_eq!(captures[1].index, 5);
    }

    #[test]
    fn test_match_record_past_end_is_corrupt() {
        let memory = vec![0u8; 20];
        let err = MatchRecord::decode(&memory, 12).unwrap_err();
        assert!(matches!(
            err,
            SitterError::CorruptRecord {
                record: "query match",
                address: 12,
                len: 12,
                memory_size: 20,
            }
        ));
    }

    #[test]
    fn test_truncated_capture_array_is_corrupt() {
        let mut memory = synthetic_match();
        // point the captures at the last 40 bytes: room for one record, not two
        put_u32(&mut memory, 24, 216);
        let record = MatchRecord::decode(&memory, 16).unwrap();
        let err = record.captures(&memory).unwrap_err();
        assert!(matches!(
            err,
            SitterError::CorruptRecord {
                record: "capture array",
                len: 56,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_capture_array() {
        let mut memory = synthetic_match();
        put_u16(&mut memory, 22, 0);
        put_u32(&mut memory, 24, 0);
        let record = MatchRecord::decode(&memory, 16).unwrap();
        assert!(record.captures(&memory).unwrap().is_empty());
    }

    #[test]
    fn test_address_near_u32_max_does_not_wrap() {
        let memory = vec![0u8; 64];
        assert!(NodeDescriptor::locate(&memory, u32::MAX - 4).is_err());
        assert!(MatchRecord::decode(&memory, u32::MAX).is_err());
    }

    #[test]
    fn test_locate_node_descriptor() {
        let memory = vec![0u8; 48];
        assert_eq!(NodeDescriptor::locate(&memory, 24).unwrap().address, 24);
        assert!(NodeDescriptor::locate(&memory, 25).is_err());
    }
}
