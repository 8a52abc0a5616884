//! Recursive tagged-length-value chunk codec
//!
//! Every PSN message is a tree of chunks. Each chunk starts with a 4-byte header:
//!
//! ```text
//! ┌────────────────┬──────────────────────────────────────┐
//! │ id (u16 LE)    │ length_and_flag (u16 LE)             │
//! │                │ bit 15 = has_subchunks               │
//! │                │ bits 0-14 = payload length in bytes  │
//! └────────────────┴──────────────────────────────────────┘
//! ```
//!
//! A leaf chunk carries raw bytes. A container chunk carries the concatenation
//! of its fully encoded children and no raw bytes of its own. Decoding keeps
//! every chunk, known or not, so readers can skip ids they do not understand.

use crate::error::{PsnError, Result};

/// Size of the chunk header on the wire.
pub const CHUNK_HEADER_LEN: usize = 4;

/// Largest payload the 15-bit length field can describe.
pub const MAX_CHUNK_PAYLOAD: usize = 0x7FFF;

/// Deepest nesting the decoder will follow before rejecting the input.
pub const MAX_NESTING_DEPTH: usize = 16;

const SUBCHUNK_FLAG: u16 = 0x8000;
const LENGTH_MASK: u16 = 0x7FFF;

/// Payload of a chunk: raw bytes or an ordered list of children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkBody {
    Leaf(Vec<u8>),
    Container(Vec<Chunk>),
}

/// A single node of the chunk tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: u16,
    pub body: ChunkBody,
}

impl Chunk {
    /// Creates a raw-data chunk.
    pub fn leaf(id: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            body: ChunkBody::Leaf(payload.into()),
        }
    }

    /// Creates a container chunk holding `children` in order.
    pub fn container(id: u16, children: Vec<Chunk>) -> Self {
        Self {
            id,
            body: ChunkBody::Container(children),
        }
    }

    pub fn has_subchunks(&self) -> bool {
        matches!(self.body, ChunkBody::Container(_))
    }

    /// Raw payload for leaf chunks, `None` for containers.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            ChunkBody::Leaf(bytes) => Some(bytes),
            ChunkBody::Container(_) => None,
        }
    }

    /// Children for container chunks, an empty slice for leaves.
    pub fn children(&self) -> &[Chunk] {
        match &self.body {
            ChunkBody::Leaf(_) => &[],
            ChunkBody::Container(children) => children,
        }
    }

    /// First child with the given id.
    pub fn child(&self, id: u16) -> Option<&Chunk> {
        self.children().iter().find(|c| c.id == id)
    }

    /// Number of payload bytes, excluding this chunk's own header.
    pub fn payload_len(&self) -> usize {
        match &self.body {
            ChunkBody::Leaf(bytes) => bytes.len(),
            ChunkBody::Container(children) => children.iter().map(Chunk::encoded_len).sum(),
        }
    }

    /// Number of bytes this chunk occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_LEN + self.payload_len()
    }

    /// Appends the wire form of this chunk to `out`.
    ///
    /// Fails if this chunk or any descendant has more than
    /// [`MAX_CHUNK_PAYLOAD`] payload bytes. On failure `out` may hold a
    /// partially written tree and should be discarded.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        let length = self.payload_len();
        if length > MAX_CHUNK_PAYLOAD {
            return Err(PsnError::Encoding {
                context: "chunk payload",
                length,
                limit: MAX_CHUNK_PAYLOAD,
            });
        }

        let mut length_and_flag = length as u16;
        if self.has_subchunks() {
            length_and_flag |= SUBCHUNK_FLAG;
        }

        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&length_and_flag.to_le_bytes());

        match &self.body {
            ChunkBody::Leaf(bytes) => out.extend_from_slice(bytes),
            ChunkBody::Container(children) => {
                for child in children {
                    child.encode_into(out)?;
                }
            }
        }
        Ok(())
    }

    /// Encodes this chunk into a new buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }
}

/// Encodes a single chunk tree.
pub fn encode_chunk(chunk: &Chunk) -> Result<Vec<u8>> {
    chunk.encode()
}

/// Decodes a sequence of sibling chunks filling `bytes` exactly.
pub fn decode_chunks(bytes: &[u8]) -> Result<Vec<Chunk>> {
    decode_level(bytes, 0, 0)
}

fn decode_level(bytes: &[u8], base_offset: usize, depth: usize) -> Result<Vec<Chunk>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(PsnError::malformed(
            base_offset,
            format!("nesting deeper than {} levels", MAX_NESTING_DEPTH),
        ));
    }

    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let offset = base_offset + pos;
        let remaining = bytes.len() - pos;
        if remaining < CHUNK_HEADER_LEN {
            return Err(PsnError::malformed(
                offset,
                format!("{} trailing bytes cannot hold a chunk header", remaining),
            ));
        }

        let id = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]);
        let length_and_flag = u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]);
        let has_subchunks = length_and_flag & SUBCHUNK_FLAG != 0;
        let length = (length_and_flag & LENGTH_MASK) as usize;

        let start = pos + CHUNK_HEADER_LEN;
        if length > bytes.len() - start {
            return Err(PsnError::malformed(
                offset,
                format!(
                    "chunk {:#06x} declares {} bytes but only {} remain",
                    id,
                    length,
                    bytes.len() - start
                ),
            ));
        }
        let payload = &bytes[start..start + length];

        let body = if has_subchunks {
            ChunkBody::Container(decode_level(
                payload,
                base_offset + start,
                depth + 1,
            )?)
        } else {
            ChunkBody::Leaf(payload.to_vec())
        };

        chunks.push(Chunk { id, body });
        pos = start + length;
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_tree() -> Chunk {
        Chunk::container(
            0x6755,
            vec![
                Chunk::leaf(0x0000, vec![1, 2, 3, 4]),
                Chunk::container(
                    0x0001,
                    vec![
                        Chunk::container(7, vec![Chunk::leaf(0, vec![9; 12])]),
                        Chunk::container(3, vec![]),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn test_leaf_header_layout() {
        let bytes = Chunk::leaf(0x0102, vec![0xAA, 0xBB]).encode().unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0x02, 0x00, 0xAA, 0xBB]);
    }

    #[test]
    fn test_container_sets_subchunk_flag() {
        let chunk = Chunk::container(0x0001, vec![Chunk::leaf(0x0000, vec![5])]);
        let bytes = chunk.encode().unwrap();

        assert_eq!(bytes.len(), 9);
        let length_and_flag = u16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(length_and_flag & 0x8000, 0x8000);
        assert_eq!(length_and_flag & 0x7FFF, 5);
    }

    #[test]
    fn test_nesting_preserved() {
        let tree = sample_tree();
        let bytes = encode_chunk(&tree).unwrap();
        assert_eq!(bytes.len(), tree.encoded_len());

        let decoded = decode_chunks(&bytes).unwrap();
        assert_eq!(decoded, vec![tree]);
    }

    #[test]
    fn test_child_order_preserved() {
        let tree = Chunk::container(
            1,
            (0..10u16).rev().map(|i| Chunk::leaf(i, vec![i as u8])).collect(),
        );
        let decoded = decode_chunks(&tree.encode().unwrap()).unwrap();
        let ids: Vec<u16> = decoded[0].children().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_multiple_root_chunks() {
        let mut bytes = Chunk::leaf(1, vec![1]).encode().unwrap();
        bytes.extend(Chunk::leaf(2, vec![2, 2]).encode().unwrap());

        let decoded = decode_chunks(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].payload(), Some(&[2u8, 2][..]));
    }

    #[test]
    fn test_empty_input_decodes_to_nothing() {
        assert!(decode_chunks(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_payload_at_limit_encodes() {
        let chunk = Chunk::leaf(1, vec![0u8; MAX_CHUNK_PAYLOAD]);
        let bytes = chunk.encode().unwrap();
        assert_eq!(bytes.len(), MAX_CHUNK_PAYLOAD + CHUNK_HEADER_LEN);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let chunk = Chunk::leaf(1, vec![0u8; MAX_CHUNK_PAYLOAD + 1]);
        match chunk.encode() {
            Err(PsnError::Encoding { length, limit, .. }) => {
                assert_eq!(length, MAX_CHUNK_PAYLOAD + 1);
                assert_eq!(limit, MAX_CHUNK_PAYLOAD);
            }
            other => panic!("expected encoding error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_container_rejected() {
        let children = (0..5)
            .map(|i| Chunk::leaf(i, vec![0u8; 8000]))
            .collect::<Vec<_>>();
        let chunk = Chunk::container(1, children);
        assert!(matches!(chunk.encode(), Err(PsnError::Encoding { .. })));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = Chunk::leaf(1, vec![1, 2, 3, 4]).encode().unwrap();
        bytes.pop();
        assert!(matches!(
            decode_chunks(&bytes),
            Err(PsnError::MalformedChunk { offset: 0, .. })
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let mut bytes = Chunk::leaf(1, vec![1]).encode().unwrap();
        bytes.extend_from_slice(&[0x01, 0x00]);
        assert!(matches!(
            decode_chunks(&bytes),
            Err(PsnError::MalformedChunk { offset: 5, .. })
        ));
    }

    #[test]
    fn test_child_overrunning_parent_rejected() {
        // Parent declares 4 bytes of children, child header claims 10.
        let bytes = vec![0x01, 0x00, 0x04, 0x80, 0x02, 0x00, 0x0A, 0x00];
        assert!(matches!(
            decode_chunks(&bytes),
            Err(PsnError::MalformedChunk { offset: 4, .. })
        ));
    }

    #[test]
    fn test_depth_bomb_rejected() {
        let mut chunk = Chunk::leaf(0, vec![]);
        for _ in 0..(MAX_NESTING_DEPTH + 2) {
            chunk = Chunk::container(0, vec![chunk]);
        }
        let bytes = chunk.encode().unwrap();
        assert!(matches!(
            decode_chunks(&bytes),
            Err(PsnError::MalformedChunk { .. })
        ));
    }

    #[test]
    fn test_depth_at_limit_accepted() {
        let mut chunk = Chunk::leaf(0, vec![1]);
        for _ in 0..MAX_NESTING_DEPTH {
            chunk = Chunk::container(0, vec![chunk]);
        }
        let bytes = chunk.encode().unwrap();
        assert_eq!(decode_chunks(&bytes).unwrap(), vec![chunk]);
    }

    #[test]
    fn test_unknown_ids_preserved() {
        let tree = Chunk::container(
            0x6755,
            vec![Chunk::leaf(0xBEEF, vec![1, 2]), Chunk::leaf(0x0000, vec![3])],
        );
        let decoded = decode_chunks(&tree.encode().unwrap()).unwrap();
        assert!(decoded[0].child(0xBEEF).is_some());
        assert_eq!(decoded[0].child(0x0000).unwrap().payload(), Some(&[3u8][..]));
    }

    #[test]
    fn test_accessors() {
        let tree = sample_tree();
        assert!(tree.has_subchunks());
        assert!(tree.payload().is_none());
        let header = tree.child(0).unwrap();
        assert!(!header.has_subchunks());
        assert!(header.children().is_empty());
        assert!(tree.child(0x4242).is_none());
    }

    fn chunk_tree() -> impl Strategy<Value = Chunk> {
        let leaf = (any::<u16>(), prop::collection::vec(any::<u8>(), 0..24))
            .prop_map(|(id, payload)| Chunk::leaf(id, payload));
        leaf.prop_recursive(MAX_NESTING_DEPTH as u32, 64, 4, |inner| {
            (any::<u16>(), prop::collection::vec(inner, 0..6))
                .prop_map(|(id, children)| Chunk::container(id, children))
        })
    }

    proptest! {
        #[test]
        fn chunk_trees_survive_encode_decode(tree in chunk_tree()) {
            prop_assume!(tree.payload_len() <= MAX_CHUNK_PAYLOAD);
            let bytes = encode_chunk(&tree).unwrap();
            prop_assert_eq!(bytes.len(), tree.encoded_len());
            prop_assert_eq!(decode_chunks(&bytes).unwrap(), vec![tree]);
        }

        #[test]
        fn sibling_sequences_survive_encode_decode(
            trees in prop::collection::vec(chunk_tree(), 0..4),
        ) {
            prop_assume!(trees.iter().all(|t| t.payload_len() <= MAX_CHUNK_PAYLOAD));
            let mut bytes = Vec::new();
            for tree in &trees {
                tree.encode_into(&mut bytes).unwrap();
            }
            prop_assert_eq!(decode_chunks(&bytes).unwrap(), trees);
        }
    }
}
