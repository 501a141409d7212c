//! Global string interning for GFE.
//!
//! Operator type tags, attribute names, pattern-node names and subgraph
//! roles are compared constantly during matching; interning turns those
//! comparisons into integer equality and makes the identifiers `Copy`.
//!
//! [`Symbol`] is a 32-bit handle into a process-global interner. Two
//! symbols are equal iff their strings are equal. Symbols serialize as
//! their strings, so serialized graphs are stable across processes.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An interned string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct Interner {
    map: FxHashMap<&'static str, u32>,
    strings: Vec<&'static str>,
}

impl Interner {
    fn intern(&mut self, string: &str) -> u32 {
        if let Some(&id) = self.map.get(string) {
            return id;
        }
        // Leak the string: symbols live for the process lifetime.
        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let id = self.strings.len() as u32;
        self.strings.push(leaked);
        self.map.insert(leaked, id);
        id
    }
}

fn interner() -> &'static RwLock<Interner> {
    static INTERNER: OnceLock<RwLock<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| {
        RwLock::new(Interner {
            map: FxHashMap::default(),
            strings: Vec::new(),
        })
    })
}

impl Symbol {
    /// Interns a string, returning its symbol.
    #[must_use]
    pub fn intern(string: &str) -> Self {
        {
            let guard = interner().read();
            if let Some(&id) = guard.map.get(string) {
                return Self(id);
            }
        }
        Self(interner().write().intern(string))
    }

    /// Returns the interned string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        interner().read().strings[self.0 as usize]
    }

    /// Returns the raw interner id.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(string: &str) -> Self {
        Self::intern(string)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::intern(&s))
    }
}
