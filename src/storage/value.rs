//! Typed values stored in a [`Database`](super::Database).
//!
//! Every stored value is one of six variants. The variant of a live value
//! never changes in place; commands that expect a different variant fail
//! with [`StorageError::WrongType`] instead of converting.

use bytes::Bytes;
use ordered_float::OrderedFloat;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use super::StorageError;

/// Variant tag of a [`DatabaseValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    List,
    Set,
    Hash,
    ZSet,
    Bitset,
}

impl DataType {
    /// Name reported by the TYPE command and used as the snapshot type tag.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::List => "list",
            DataType::Set => "set",
            DataType::Hash => "hash",
            DataType::ZSet => "zset",
            DataType::Bitset => "bitset",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(DataType::String),
            "list" => Some(DataType::List),
            "set" => Some(DataType::Set),
            "hash" => Some(DataType::Hash),
            "zset" => Some(DataType::ZSet),
            "bitset" => Some(DataType::Bitset),
            _ => None,
        }
    }

    /// The empty instance of this variant, used as the merge default.
    pub fn empty(&self) -> DatabaseValue {
        match self {
            DataType::String => DatabaseValue::String(Bytes::new()),
            DataType::List => DatabaseValue::List(VecDeque::new()),
            DataType::Set => DatabaseValue::Set(HashSet::new()),
            DataType::Hash => DatabaseValue::Hash(HashMap::new()),
            DataType::ZSet => DatabaseValue::ZSet(SortedSet::new()),
            DataType::Bitset => DatabaseValue::Bitset(BitSet::new()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value held by the keyspace.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    /// Binary-safe string.
    String(Bytes),
    /// Ordered elements, duplicates allowed.
    List(VecDeque<Bytes>),
    /// Unordered unique members.
    Set(HashSet<Bytes>),
    /// Unique fields mapped to values.
    Hash(HashMap<Bytes, Bytes>),
    /// Unique members ordered by (score, member).
    ZSet(SortedSet),
    /// Growable bit vector.
    Bitset(BitSet),
}

impl DatabaseValue {
    pub fn string(value: impl Into<Bytes>) -> Self {
        DatabaseValue::String(value.into())
    }

    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        DatabaseValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn set<I, T>(members: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        DatabaseValue::Set(members.into_iter().map(Into::into).collect())
    }

    pub fn hash<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        DatabaseValue::Hash(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn zset<I, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (f64, T)>,
        T: Into<Bytes>,
    {
        let mut zset = SortedSet::new();
        for (score, member) in entries {
            zset.insert(member.into(), score);
        }
        DatabaseValue::ZSet(zset)
    }

    /// Builds a bitset with the given bit offsets set.
    pub fn bitset<I>(bits: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let mut set = BitSet::new();
        for bit in bits {
            set.set(bit, true);
        }
        DatabaseValue::Bitset(set)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            DatabaseValue::String(_) => DataType::String,
            DatabaseValue::List(_) => DataType::List,
            DatabaseValue::Set(_) => DataType::Set,
            DatabaseValue::Hash(_) => DataType::Hash,
            DatabaseValue::ZSet(_) => DataType::ZSet,
            DatabaseValue::Bitset(_) => DataType::Bitset,
        }
    }

    /// Byte length for strings and bitsets, element count for containers.
    pub fn size(&self) -> usize {
        match self {
            DatabaseValue::String(s) => s.len(),
            DatabaseValue::List(l) => l.len(),
            DatabaseValue::Set(s) => s.len(),
            DatabaseValue::Hash(h) => h.len(),
            DatabaseValue::ZSet(z) => z.len(),
            DatabaseValue::Bitset(b) => b.as_bytes().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Fails with `WrongType` unless this value is of the `expected` variant.
    pub fn check_type(&self, expected: DataType) -> Result<(), StorageError> {
        let found = self.data_type();
        if found == expected {
            Ok(())
        } else {
            Err(StorageError::WrongType { expected, found })
        }
    }

    pub fn as_string(&self) -> Result<&Bytes, StorageError> {
        match self {
            DatabaseValue::String(s) => Ok(s),
            other => Err(other.mismatch(DataType::String)),
        }
    }

    pub fn as_list(&self) -> Result<&VecDeque<Bytes>, StorageError> {
        match self {
            DatabaseValue::List(l) => Ok(l),
            other => Err(other.mismatch(DataType::List)),
        }
    }

    pub fn as_set(&self) -> Result<&HashSet<Bytes>, StorageError> {
        match self {
            DatabaseValue::Set(s) => Ok(s),
            other => Err(other.mismatch(DataType::Set)),
        }
    }

    pub fn as_hash(&self) -> Result<&HashMap<Bytes, Bytes>, StorageError> {
        match self {
            DatabaseValue::Hash(h) => Ok(h),
            other => Err(other.mismatch(DataType::Hash)),
        }
    }

    pub fn as_zset(&self) -> Result<&SortedSet, StorageError> {
        match self {
            DatabaseValue::ZSet(z) => Ok(z),
            other => Err(other.mismatch(DataType::ZSet)),
        }
    }

    pub fn as_bitset(&self) -> Result<&BitSet, StorageError> {
        match self {
            DatabaseValue::Bitset(b) => Ok(b),
            other => Err(other.mismatch(DataType::Bitset)),
        }
    }

    fn mismatch(&self, expected: DataType) -> StorageError {
        StorageError::WrongType {
            expected,
            found: self.data_type(),
        }
    }
}

/// Sorted set of unique members, each with an `f64` score.
///
/// Members are indexed twice: by name for score lookups and by
/// `(score, member)` for ordered iteration. Ties in score are broken by
/// lexicographic member order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    scores: HashMap<Bytes, OrderedFloat<f64>>,
    ordered: BTreeSet<(OrderedFloat<f64>, Bytes)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Adds or rescores a member. Returns true if the member is new.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        let score = OrderedFloat(score);
        match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(old, member.clone()));
                self.ordered.insert((score, member));
                false
            }
            None => {
                self.ordered.insert((score, member));
                true
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove_entry(member) {
            Some((member, score)) => {
                self.ordered.remove(&(score, member));
                true
            }
            None => false,
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).map(|s| s.into_inner())
    }

    /// Adds `delta` to the member's score (starting from 0) and returns the
    /// new score.
    pub fn increment(&mut self, member: Bytes, delta: f64) -> f64 {
        let score = self.score(&member).unwrap_or(0.0) + delta;
        self.insert(member, score);
        score
    }

    /// Members in ascending (score, member) order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Bytes, f64)> + '_ {
        self.ordered.iter().map(|(score, member)| (member, score.into_inner()))
    }
}

/// Growable bit vector stored as a byte buffer.
///
/// Bit `n` lives in byte `n / 8` under mask `0x80 >> (n % 8)`, the same
/// layout Redis uses for SETBIT, so the buffer can be persisted verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    bytes: Vec<u8>,
}

impl BitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn get(&self, offset: usize) -> bool {
        self.bytes
            .get(offset / 8)
            .map(|byte| byte & Self::mask(offset) != 0)
            .unwrap_or(false)
    }

    /// Sets or clears a bit, growing the buffer as needed. Returns the
    /// previous bit.
    pub fn set(&mut self, offset: usize, on: bool) -> bool {
        let index = offset / 8;
        if index >= self.bytes.len() {
            self.bytes.resize(index + 1, 0);
        }
        let previous = self.bytes[index] & Self::mask(offset) != 0;
        if on {
            self.bytes[index] |= Self::mask(offset);
        } else {
            self.bytes[index] &= !Self::mask(offset);
        }
        previous
    }

    /// Number of set bits.
    pub fn count(&self) -> u64 {
        self.bytes.iter().map(|b| u64::from(b.count_ones())).sum()
    }

    fn mask(offset: usize) -> u8 {
        0x80 >> (offset % 8)
    }
}
