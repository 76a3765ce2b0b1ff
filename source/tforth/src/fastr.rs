use core::hash::{Hash, Hasher as _};
use core::{fmt, ops::Deref};
use hash32::{FnvHasher, Hasher};

/// A case-folded word name, carrying a precomputed length + hash.
///
/// Names are folded to ASCII lowercase when constructed, so all
/// comparisons (and dictionary lookups) are case insensitive.
#[derive(Clone)]
pub struct FaStr {
    text: Box<str>,
    len_hash: LenHash,
}

impl FaStr {
    pub fn new(name: &str) -> Self {
        let text: Box<str> = name.to_ascii_lowercase().into_boxed_str();
        let len_hash = LenHash::from_bstr(text.as_bytes());
        Self { text, len_hash }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn raw(&self) -> u32 {
        self.len_hash.inner
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl PartialEq for FaStr {
    fn eq(&self, other: &Self) -> bool {
        // First, check the hash
        if self.len_hash == other.len_hash {
            // The hash matches, but there might be collisions. Do the strcmp
            // to make sure
            self.as_bytes().eq(other.as_bytes())
        } else {
            // If the hash doesn't match, it's definitely not equal.
            false
        }
    }
}

impl Eq for FaStr {}

impl Hash for FaStr {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.len_hash.inner);
    }
}

impl Deref for FaStr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl fmt::Debug for FaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.text, f)
    }
}

impl fmt::Display for FaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LenHash {
    // 24..32: 8-bit len (saturating at 255)
    // 00..24: 24-bit FnvHash
    inner: u32,
}

impl LenHash {
    const HASH_MASK: u32 = 0x00FF_FFFF;
    const LEN_MASK: u32 = 0xFF00_0000;

    pub fn from_bstr(s: &[u8]) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write(s);
        let hash = hasher.finish32();
        let len = s.len().min(255) as u32;
        Self {
            inner: (len << 24) | (hash & Self::HASH_MASK),
        }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        ((self.inner & Self::LEN_MASK) >> 24) as usize
    }
}

/// FNV-1a over arbitrary bytes, as used for the `hash` object function.
pub fn fnv_hash(bytes: &[u8]) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish32()
}

#[cfg(test)]
pub mod test {
    use std::collections::HashMap;

    use super::FaStr;

    #[test]
    fn folds_case() {
        let a = FaStr::new("DUP");
        let b = FaStr::new("dup");
        let c = FaStr::new("Drop");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "dup");
        assert_eq!(c.len_hash.len(), 4);
    }

    #[test]
    fn map_key() {
        let mut map = HashMap::new();
        map.insert(FaStr::new("Hello"), 1);
        map.insert(FaStr::new("world"), 2);
        assert_eq!(map.get(&FaStr::new("HELLO")), Some(&1));
        assert_eq!(map.get(&FaStr::new("WORLD")), Some(&2));
        assert_eq!(map.get(&FaStr::new("nope")), None);
    }
}
