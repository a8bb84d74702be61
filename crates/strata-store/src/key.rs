#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte offset of the member-id field within a key.
const MEMBER_OFF: usize = 1;
/// Byte offset of the chunk-index field within a key.
const CHUNK_OFF: usize = 5;
/// Total prefix length before the group payload starts.
const PREFIX_LEN: usize = 9;

/// Sentinel member id for keys that do not name a group member.
pub const MEMBER_NONE: u32 = u32::MAX;
/// Sentinel chunk index for keys that do not name a chunk.
pub const CHUNK_INDEX_NONE: u32 = u32::MAX;

/// What a key addresses in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// A column-group record (shared id counter).
    Group,
    /// A column header.
    Column,
    /// One compressed chunk of one column.
    Chunk,
}

impl KeyKind {
    fn tag(self) -> u8 {
        match self {
            KeyKind::Group => 1,
            KeyKind::Column => 2,
            KeyKind::Chunk => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<KeyKind> {
        match tag {
            1 => Some(KeyKind::Group),
            2 => Some(KeyKind::Column),
            3 => Some(KeyKind::Chunk),
            _ => None,
        }
    }
}

/// A store key.
///
/// Keys are short byte strings with a structured prefix:
///
/// ```text
/// byte 0      kind tag (group / column / chunk)
/// bytes 1..5  member id within the group (little-endian u32)
/// bytes 5..9  chunk index (little-endian u32)
/// bytes 9..   group payload (identity of the column group)
/// ```
///
/// All keys of one column group share the same payload, so deriving a
/// chunk key from a column key — or recovering the column or group key
/// from a chunk key — is a prefix rewrite, never a lookup.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// A group key over an arbitrary payload (typically a UUID).
    pub fn group(payload: &[u8]) -> Key {
        let mut bytes = Vec::with_capacity(PREFIX_LEN + payload.len());
        bytes.push(KeyKind::Group.tag());
        bytes.extend_from_slice(&MEMBER_NONE.to_le_bytes());
        bytes.extend_from_slice(&CHUNK_INDEX_NONE.to_le_bytes());
        bytes.extend_from_slice(payload);
        Key(bytes)
    }

    /// The column key for member `id` of this key's group.
    pub fn member(&self, id: u32) -> Key {
        debug_assert_ne!(id, MEMBER_NONE, "member id is reserved");
        let mut key = self.clone();
        key.0[0] = KeyKind::Column.tag();
        key.0[MEMBER_OFF..MEMBER_OFF + 4].copy_from_slice(&id.to_le_bytes());
        key.0[CHUNK_OFF..CHUNK_OFF + 4].copy_from_slice(&CHUNK_INDEX_NONE.to_le_bytes());
        key
    }

    /// The key of chunk `cidx` of this column. O(1); no index structure.
    pub fn chunk_of(&self, cidx: u32) -> Key {
        debug_assert_eq!(self.kind(), Some(KeyKind::Column));
        debug_assert_ne!(cidx, CHUNK_INDEX_NONE, "chunk index is reserved");
        let mut key = self.clone();
        key.0[0] = KeyKind::Chunk.tag();
        key.0[CHUNK_OFF..CHUNK_OFF + 4].copy_from_slice(&cidx.to_le_bytes());
        key
    }

    /// The column key owning this chunk key.
    pub fn column_of(&self) -> Key {
        debug_assert_eq!(self.kind(), Some(KeyKind::Chunk));
        let mut key = self.clone();
        key.0[0] = KeyKind::Column.tag();
        key.0[CHUNK_OFF..CHUNK_OFF + 4].copy_from_slice(&CHUNK_INDEX_NONE.to_le_bytes());
        key
    }

    /// The group key this column or chunk key belongs to.
    pub fn group_of(&self) -> Key {
        let mut key = self.clone();
        key.0[0] = KeyKind::Group.tag();
        key.0[MEMBER_OFF..MEMBER_OFF + 4].copy_from_slice(&MEMBER_NONE.to_le_bytes());
        key.0[CHUNK_OFF..CHUNK_OFF + 4].copy_from_slice(&CHUNK_INDEX_NONE.to_le_bytes());
        key
    }

    pub fn kind(&self) -> Option<KeyKind> {
        KeyKind::from_tag(self.0[0])
    }

    pub fn member_id(&self) -> u32 {
        u32::from_le_bytes(self.0[MEMBER_OFF..MEMBER_OFF + 4].try_into().expect("key prefix"))
    }

    pub fn chunk_index(&self) -> u32 {
        u32::from_le_bytes(self.0[CHUNK_OFF..CHUNK_OFF + 4].try_into().expect("key prefix"))
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[PREFIX_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Deterministic home node for this key. Chunk affinity falls out of
    /// this: the same chunk key always hashes to the same node.
    pub fn home_node(&self, nodes: usize) -> usize {
        debug_assert!(nodes > 0);
        (fnv1a(&self.0) % nodes as u64) as usize
    }
}

// FNV-1a: stable across runs, cheap, good enough for node spreading.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind() {
            Some(KeyKind::Group) => "group",
            Some(KeyKind::Column) => "column",
            Some(KeyKind::Chunk) => "chunk",
            None => "?",
        };
        write!(f, "Key({kind}")?;
        if self.member_id() != MEMBER_NONE {
            write!(f, " m{}", self.member_id())?;
        }
        if self.chunk_index() != CHUNK_INDEX_NONE {
            write!(f, " c{}", self.chunk_index())?;
        }
        write!(f, " ")?;
        for b in self.payload().iter().take(4) {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}
