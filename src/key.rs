//! # Stable Cache-Key Derivation
//!
//! Derives a fixed-width, collision-resistant digest ([`CacheKey`]) from the
//! arguments of a cached call, so that heterogeneous argument lists can be
//! used as index keys without keeping the arguments alive.
//!
//! ## Encoding Rules
//!
//! | Input                     | Encoding                                          |
//! |---------------------------|---------------------------------------------------|
//! | Integers                  | Canonical decimal string, tag `int` (width-blind: |
//! |                           | `1u8` and `1i64` produce the same key)            |
//! | Floats                    | Shortest round-trip string, tag `float`           |
//! | `bool`, `char`, `str`     | Canonical form with their own type tag            |
//! | Tuples, slices, `Vec`     | Order-sensitive: element count then each element  |
//! | `HashSet`, `BTreeSet`     | Order-insensitive: element digests, sorted        |
//! | `HashMap`, `BTreeMap`     | Order-insensitive: entry-pair digests, sorted     |
//! | `Option`                  | Tagged `none` / `some` wrapper                    |
//! | [`Identity`]              | The referent's address                            |
//!
//! Every value is framed with a type tag and a length, so the integer `1`
//! and the string `"1"` can never collide, and neither can `("ab", "c")`
//! and `("a", "bc")`.
//!
//! ## Identity Fallback
//!
//! Types with no natural serialisation can be keyed by address with
//! [`Identity`]. This only deduplicates the *same* instance: two structurally
//! equal values at different addresses produce different keys. It never
//! fails, which makes it the deterministic last resort for otherwise
//! unencodable arguments.
//!
//! ## User Extension
//!
//! Custom types participate by implementing [`KeyPart`] in terms of the
//! [`KeyEncoder`] primitives ([`atom`](KeyEncoder::atom),
//! [`ordered`](KeyEncoder::ordered), [`unordered`](KeyEncoder::unordered)),
//! not by runtime reflection.
//!
//! ## Example
//!
//! ```
//! use flightcache::key::CacheKey;
//!
//! // Equal inputs, equal keys — across the whole run.
//! assert_eq!(CacheKey::of(&("user", 42)), CacheKey::of(&("user", 42)));
//!
//! // A type tag keeps the integer 1 and the string "1" apart.
//! assert_ne!(CacheKey::of(&1), CacheKey::of(&"1"));
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use sha2::{Digest, Sha256};

/// A stable 256-bit digest identifying one argument list.
///
/// Cheap to copy, compare and hash; used as the index key by the memo
/// wrappers and usable as the `K` of any [`Cache`](crate::cache::Cache).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derives the key for a single encodable value.
    pub fn of<P: KeyPart + ?Sized>(part: &P) -> CacheKey {
        let mut enc = KeyEncoder::new();
        enc.arg(part);
        enc.finish()
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey(")?;
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Incrementally hashes the positional arguments of a call into a
/// [`CacheKey`].
///
/// Created with a skip count to drop leading positional arguments from the
/// key (the receiver of a method call, typically); skipped arguments are
/// consumed by [`arg`](KeyEncoder::arg) without touching the digest.
pub struct KeyEncoder {
    hasher: Sha256,
    skip: usize,
    seen: usize,
}

impl KeyEncoder {
    /// Creates an encoder that keys every argument.
    pub fn new() -> Self {
        Self::with_skip(0)
    }

    /// Creates an encoder that ignores the first `skip` positional arguments.
    pub fn with_skip(skip: usize) -> Self {
        KeyEncoder {
            hasher: Sha256::new(),
            skip,
            seen: 0,
        }
    }

    /// Feeds one positional argument.
    ///
    /// The first `skip` calls are no-ops on the digest.
    pub fn arg<P: KeyPart + ?Sized>(&mut self, part: &P) {
        if self.seen < self.skip {
            self.seen += 1;
            return;
        }
        self.seen += 1;
        part.encode(self);
    }

    /// Finalizes the digest.
    pub fn finish(self) -> CacheKey {
        let hash = self.hasher.finalize();
        CacheKey(hash.into())
    }

    // -- primitives for KeyPart implementations ---------------------------

    /// Writes a leaf value: a type tag plus its canonical byte form.
    pub fn atom(&mut self, type_tag: &str, canonical: &[u8]) {
        self.header(type_tag, canonical.len());
        self.hasher.update(canonical);
    }

    /// Writes an order-sensitive container: a type tag, the element count,
    /// then each element in iteration order.
    pub fn ordered<'a, P, I>(&mut self, type_tag: &str, items: I)
    where
        P: KeyPart + ?Sized + 'a,
        I: ExactSizeIterator<Item = &'a P>,
    {
        self.header(type_tag, items.len());
        for item in items {
            item.encode(self);
        }
    }

    /// Writes an order-insensitive container: the supplied per-element
    /// digests are sorted before hashing, so insertion order cannot leak
    /// into the key.
    pub fn unordered(&mut self, type_tag: &str, mut digests: Vec<[u8; 32]>) {
        digests.sort_unstable();
        self.header(type_tag, digests.len());
        for digest in &digests {
            self.hasher.update(digest);
        }
    }

    /// Digest of a single value in isolation, for use as an element of an
    /// [`unordered`](KeyEncoder::unordered) container.
    pub fn digest_of<P: KeyPart + ?Sized>(part: &P) -> [u8; 32] {
        let mut sub = KeyEncoder::new();
        part.encode(&mut sub);
        sub.finish().0
    }

    fn header(&mut self, type_tag: &str, len: usize) {
        debug_assert!(type_tag.len() <= u8::MAX as usize);
        self.hasher.update([type_tag.len() as u8]);
        self.hasher.update(type_tag.as_bytes());
        self.hasher.update((len as u64).to_le_bytes());
    }
}

impl Default for KeyEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// A value that can contribute to a [`CacheKey`].
///
/// The contract is purity: equal inputs under the module's encoding rules
/// must produce equal digests for the lifetime of the process.
pub trait KeyPart {
    fn encode(&self, enc: &mut KeyEncoder);
}

/// Keys a value by the address of the referent.
///
/// The deterministic fallback for types with no stable serialisation: the
/// same instance always produces the same key, but structurally equal
/// instances at different addresses do not deduplicate.
pub struct Identity<'a, T>(pub &'a T);

impl<T> KeyPart for Identity<'_, T> {
    fn encode(&self, enc: &mut KeyEncoder) {
        let addr = self.0 as *const T as usize;
        enc.atom("identity", &addr.to_le_bytes());
    }
}

impl<P: KeyPart + ?Sized> KeyPart for &P {
    fn encode(&self, enc: &mut KeyEncoder) {
        (**self).encode(enc);
    }
}

macro_rules! impl_int_key_part {
    ($($ty:ty),*) => {
        $(
            impl KeyPart for $ty {
                fn encode(&self, enc: &mut KeyEncoder) {
                    let mut buf = [0u8; 40];
                    let mut cursor = std::io::Cursor::new(&mut buf[..]);
                    use std::io::Write;
                    // 40 bytes covers i128::MIN; write! into a fixed buffer
                    // cannot fail here
                    let _ = write!(cursor, "{}", self);
                    let len = cursor.position() as usize;
                    enc.atom("int", &buf[..len]);
                }
            }
        )*
    };
}

impl_int_key_part!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

macro_rules! impl_float_key_part {
    ($($ty:ty),*) => {
        $(
            impl KeyPart for $ty {
                fn encode(&self, enc: &mut KeyEncoder) {
                    // shortest round-trip form; NaN and signed zero encode
                    // distinctly but deterministically
                    enc.atom("float", format!("{self:?}").as_bytes());
                }
            }
        )*
    };
}

impl_float_key_part!(f32, f64);

impl KeyPart for bool {
    fn encode(&self, enc: &mut KeyEncoder) {
        let canonical: &[u8] = if *self { b"true" } else { b"false" };
        enc.atom("bool", canonical);
    }
}

impl KeyPart for char {
    fn encode(&self, enc: &mut KeyEncoder) {
        let mut buf = [0u8; 4];
        enc.atom("char", self.encode_utf8(&mut buf).as_bytes());
    }
}

impl KeyPart for str {
    fn encode(&self, enc: &mut KeyEncoder) {
        enc.atom("str", self.as_bytes());
    }
}

impl KeyPart for String {
    fn encode(&self, enc: &mut KeyEncoder) {
        self.as_str().encode(enc);
    }
}

impl KeyPart for () {
    fn encode(&self, enc: &mut KeyEncoder) {
        enc.atom("unit", b"");
    }
}

impl<P: KeyPart> KeyPart for Option<P> {
    fn encode(&self, enc: &mut KeyEncoder) {
        match self {
            None => enc.atom("none", b""),
            Some(value) => {
                enc.header("some", 1);
                value.encode(enc);
            }
        }
    }
}

impl<P: KeyPart> KeyPart for [P] {
    fn encode(&self, enc: &mut KeyEncoder) {
        enc.ordered("seq", self.iter());
    }
}

impl<P: KeyPart> KeyPart for Vec<P> {
    fn encode(&self, enc: &mut KeyEncoder) {
        self.as_slice().encode(enc);
    }
}

impl<P: KeyPart, const N: usize> KeyPart for [P; N] {
    fn encode(&self, enc: &mut KeyEncoder) {
        self.as_slice().encode(enc);
    }
}

impl<P: KeyPart, S> KeyPart for HashSet<P, S> {
    fn encode(&self, enc: &mut KeyEncoder) {
        let digests = self.iter().map(KeyEncoder::digest_of).collect();
        enc.unordered("set", digests);
    }
}

impl<P: KeyPart> KeyPart for BTreeSet<P> {
    fn encode(&self, enc: &mut KeyEncoder) {
        let digests = self.iter().map(KeyEncoder::digest_of).collect();
        enc.unordered("set", digests);
    }
}

impl<K: KeyPart, V: KeyPart, S> KeyPart for HashMap<K, V, S> {
    fn encode(&self, enc: &mut KeyEncoder) {
        let digests = self
            .iter()
            .map(|entry| KeyEncoder::digest_of(&entry))
            .collect();
        enc.unordered("map", digests);
    }
}

impl<K: KeyPart, V: KeyPart> KeyPart for BTreeMap<K, V> {
    fn encode(&self, enc: &mut KeyEncoder) {
        let digests = self
            .iter()
            .map(|entry| KeyEncoder::digest_of(&entry))
            .collect();
        enc.unordered("map", digests);
    }
}

macro_rules! impl_tuple_key_part {
    ($count:literal => $($name:ident : $idx:tt),+) => {
        impl<$($name: KeyPart),+> KeyPart for ($($name,)+) {
            fn encode(&self, enc: &mut KeyEncoder) {
                enc.header("tuple", $count);
                $(self.$idx.encode(enc);)+
            }
        }
    };
}

impl_tuple_key_part!(1 => A: 0);
impl_tuple_key_part!(2 => A: 0, B: 1);
impl_tuple_key_part!(3 => A: 0, B: 1, C: 2);
impl_tuple_key_part!(4 => A: 0, B: 1, C: 2, D: 3);
impl_tuple_key_part!(5 => A: 0, B: 1, C: 2, D: 3, E: 4);
impl_tuple_key_part!(6 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// An argument list that can be keyed as a whole.
///
/// Implemented for tuples of [`KeyPart`] arguments; used by the memo
/// wrappers, which feed each tuple element as one positional argument so
/// that `skip_args` drops leading arguments cleanly.
pub trait KeyArgs {
    /// Feeds every positional argument into the encoder.
    fn encode_args(&self, enc: &mut KeyEncoder);

    /// Derives the key over all arguments.
    fn cache_key(&self) -> CacheKey {
        self.cache_key_with_skip(0)
    }

    /// Derives the key, ignoring the first `skip` positional arguments.
    fn cache_key_with_skip(&self, skip: usize) -> CacheKey {
        let mut enc = KeyEncoder::with_skip(skip);
        self.encode_args(&mut enc);
        enc.finish()
    }
}

impl KeyArgs for () {
    fn encode_args(&self, _enc: &mut KeyEncoder) {}
}

macro_rules! impl_key_args {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: KeyPart),+> KeyArgs for ($($name,)+) {
            fn encode_args(&self, enc: &mut KeyEncoder) {
                $(enc.arg(&self.$idx);)+
            }
        }
    };
}

impl_key_args!(A: 0);
impl_key_args!(A: 0, B: 1);
impl_key_args!(A: 0, B: 1, C: 2);
impl_key_args!(A: 0, B: 1, C: 2, D: 3);
impl_key_args!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_key_args!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
