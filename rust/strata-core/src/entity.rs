//! Typed `u32` handles and the arenas they index.
//!
//! Nodes, blocks and frame states are all addressed by small integer handles so
//! that side tables (operand bindings, per-block state) are plain vectors.

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// A typed index into an arena.
pub trait EntityRef: Copy + Eq + std::hash::Hash + std::fmt::Debug {
    fn new(index: u32) -> Self;
    fn index(self) -> u32;
}

/// Define a typed entity reference. The second argument is the prefix used by
/// its `Display` impl.
///
/// ```ignore
/// define_entity!(NodeId, "n");
/// ```
#[macro_export]
macro_rules! define_entity {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(u32);

        impl $crate::entity::EntityRef for $name {
            fn new(index: u32) -> Self {
                Self(index)
            }
            fn index(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

/// Append-only arena keyed by entity references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryMap<K: EntityRef, V> {
    elems: Vec<V>,
    #[serde(skip)]
    _phantom: PhantomData<K>,
}

impl<K: EntityRef, V> Default for PrimaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V> PrimaryMap<K, V> {
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            _phantom: PhantomData,
        }
    }

    pub fn push(&mut self, value: V) -> K {
        let key = K::new(self.elems.len() as u32);
        self.elems.push(value);
        key
    }

    /// The key the next `push` will return.
    pub fn next_key(&self) -> K {
        K::new(self.elems.len() as u32)
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.elems.get(key.index() as usize)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.elems.get_mut(key.index() as usize)
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.elems
            .iter()
            .enumerate()
            .map(|(i, v)| (K::new(i as u32), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = K> {
        (0..self.elems.len() as u32).map(K::new)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.elems.iter()
    }
}

impl<K: EntityRef, V> std::ops::Index<K> for PrimaryMap<K, V> {
    type Output = V;
    fn index(&self, key: K) -> &V {
        &self.elems[key.index() as usize]
    }
}

impl<K: EntityRef, V> std::ops::IndexMut<K> for PrimaryMap<K, V> {
    fn index_mut(&mut self, key: K) -> &mut V {
        &mut self.elems[key.index() as usize]
    }
}

/// Sparse side table keyed by entity references. Entries may be absent; the
/// backing vector grows on demand.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K: EntityRef, V> {
    elems: Vec<Option<V>>,
    _phantom: PhantomData<K>,
}

impl<K: EntityRef, V> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityRef, V> SecondaryMap<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-sizes the table for `capacity` keys so lookups never reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut elems = Vec::with_capacity(capacity);
        elems.resize_with(capacity, || None);
        Self {
            elems,
            _phantom: PhantomData,
        }
    }

    /// Stores `value` under `key`, returning the previous entry.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let idx = key.index() as usize;
        if idx >= self.elems.len() {
            self.elems.resize_with(idx + 1, || None);
        }
        self.elems[idx].replace(value)
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.elems.get(key.index() as usize).and_then(|v| v.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.elems
            .get_mut(key.index() as usize)
            .and_then(|v| v.as_mut())
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        self.elems
            .get_mut(key.index() as usize)
            .and_then(|v| v.take())
    }

    pub fn contains_key(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Number of present entries.
    pub fn count(&self) -> usize {
        self.elems.iter().filter(|v| v.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.elems
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (K::new(i as u32), v)))
    }
}
