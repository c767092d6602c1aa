//! Headers container, with multi-valued and comma-folded flavours.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use bytes::Bytes;

use crate::ascii::{validate_header_name, validate_header_value, AsciiStr};
use crate::error::Parse;
use crate::Result;

pub use self::fold::FoldedHeaderMap;

mod fold;

/// An ordered, multi-valued map of header names to values.
///
/// Names compare case-insensitively; insertion order is preserved for
/// iteration, and repeated insertions of one name append values. Values
/// are raw octet strings.
#[derive(Clone, Default)]
pub struct HeaderMap {
    entries: Vec<Entry>,
}

#[derive(Clone)]
struct Entry {
    name: AsciiStr,
    value: Bytes,
}

/// Types usable as a header name argument.
pub trait IntoHeaderName {
    fn into_header_name(self) -> AsciiStr;
}

impl IntoHeaderName for AsciiStr {
    fn into_header_name(self) -> AsciiStr {
        self
    }
}

impl IntoHeaderName for &'static str {
    fn into_header_name(self) -> AsciiStr {
        AsciiStr::from_static(self)
    }
}

impl IntoHeaderName for String {
    fn into_header_name(self) -> AsciiStr {
        AsciiStr::from_bytes_unchecked(Bytes::from(self))
    }
}

impl HeaderMap {
    pub fn new() -> HeaderMap {
        HeaderMap::default()
    }

    pub fn with_capacity(n: usize) -> HeaderMap {
        HeaderMap {
            entries: Vec::with_capacity(n),
        }
    }

    /// Appends a value for `name`, validating both octet sequences.
    pub fn add<N, V>(&mut self, name: N, value: V) -> Result<&mut HeaderMap>
    where
        N: IntoHeaderName,
        V: Into<Bytes>,
    {
        let name = name.into_header_name();
        let value = value.into();
        validate_header_name(name.as_bytes())?;
        validate_header_value(&value)?;
        self.entries.push(Entry { name, value });
        Ok(self)
    }

    /// Appends without octet validation; decode-side use when header
    /// validation is switched off.
    pub(crate) fn add_unchecked(&mut self, name: AsciiStr, value: Bytes) -> &mut HeaderMap {
        self.entries.push(Entry { name, value });
        self
    }

    /// Encodes `n` in decimal and appends it.
    pub fn add_int<N>(&mut self, name: N, n: u64) -> Result<&mut HeaderMap>
    where
        N: IntoHeaderName,
    {
        let mut buf = itoa::Buffer::new();
        self.add(name, buf.format(n).to_string())
    }

    /// Encodes `t` as an HTTP-date and appends it.
    pub fn add_date<N>(&mut self, name: N, t: SystemTime) -> Result<&mut HeaderMap>
    where
        N: IntoHeaderName,
    {
        self.add(name, httpdate::fmt_http_date(t))
    }

    /// Removes every value for `name`, then appends `value`.
    pub fn set<N, V>(&mut self, name: N, value: V) -> Result<&mut HeaderMap>
    where
        N: IntoHeaderName,
        V: Into<Bytes>,
    {
        let name = name.into_header_name();
        self.remove_name(&name);
        self.add(name, value)
    }

    /// Removes every value for `name`, then appends each of `values`.
    pub fn set_all<N, V, I>(&mut self, name: N, values: I) -> Result<&mut HeaderMap>
    where
        N: IntoHeaderName,
        V: Into<Bytes>,
        I: IntoIterator<Item = V>,
    {
        let name = name.into_header_name();
        self.remove_name(&name);
        for value in values {
            self.add(name.clone(), value)?;
        }
        Ok(self)
    }

    /// Removes every value for `name`.
    pub fn remove<N>(&mut self, name: N) -> &mut HeaderMap
    where
        N: IntoHeaderName,
    {
        let name = name.into_header_name();
        self.remove_name(&name);
        self
    }

    fn remove_name(&mut self, name: &AsciiStr) {
        self.entries.retain(|e| e.name != *name);
    }

    pub fn clear(&mut self) -> &mut HeaderMap {
        self.entries.clear();
        self
    }

    /// The first value for `name`, if any.
    pub fn get<N>(&self, name: N) -> Option<&Bytes>
    where
        N: IntoHeaderName,
    {
        let name = name.into_header_name();
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    /// The first value for `name` as UTF-8 text, if any.
    pub fn get_str<N>(&self, name: N) -> Option<&str>
    where
        N: IntoHeaderName,
    {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// The first value for `name` parsed as a non-negative decimal.
    pub fn get_int<N>(&self, name: N) -> Option<u64>
    where
        N: IntoHeaderName,
    {
        self.get_str(name).and_then(|s| s.trim().parse().ok())
    }

    /// The first value for `name` parsed as an HTTP-date.
    pub fn get_date<N>(&self, name: N) -> Option<SystemTime>
    where
        N: IntoHeaderName,
    {
        self.get_str(name)
            .and_then(|s| httpdate::parse_http_date(s).ok())
    }

    /// Every value for `name`, preserving order. Possibly empty.
    pub fn get_all<N>(&self, name: N) -> Vec<&Bytes>
    where
        N: IntoHeaderName,
    {
        let name = name.into_header_name();
        self.entries
            .iter()
            .filter(|e| e.name == name)
            .map(|e| &e.value)
            .collect()
    }

    pub fn contains<N>(&self, name: N) -> bool
    where
        N: IntoHeaderName,
    {
        let name = name.into_header_name();
        self.entries.iter().any(|e| e.name == name)
    }

    /// Whether any stored value for `name` equals `value` whole, optionally
    /// ignoring ASCII case.
    pub fn contains_value<N>(&self, name: N, value: &str, ignore_case: bool) -> bool
    where
        N: IntoHeaderName,
    {
        let name = name.into_header_name();
        self.entries
            .iter()
            .filter(|e| e.name == name)
            .any(|e| octets_eq(&e.value, value.as_bytes(), ignore_case))
    }

    /// Whether any comma-separated token inside any stored value for
    /// `name` equals `token` after trimming optional whitespace.
    ///
    /// The trim rule here differs from [`contains_value`]: each candidate
    /// between commas is stripped of surrounding ASCII whitespace before
    /// the comparison, and a value without commas is one candidate.
    ///
    /// [`contains_value`]: HeaderMap::contains_value
    pub fn contains_token<N>(&self, name: N, token: &str, ignore_case: bool) -> bool
    where
        N: IntoHeaderName,
    {
        let name = name.into_header_name();
        self.entries.iter().filter(|e| e.name == name).any(|e| {
            e.value.split(|&b| b == b',').any(|candidate| {
                octets_eq(trim_octets(candidate), token.as_bytes(), ignore_case)
            })
        })
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&AsciiStr, &Bytes)> {
        self.entries.iter().map(|e| (&e.name, &e.value))
    }

    /// Distinct names, in first-insertion order.
    pub fn names(&self) -> Vec<&AsciiStr> {
        let mut names: Vec<&AsciiStr> = Vec::new();
        for e in &self.entries {
            if !names.iter().any(|n| **n == e.name) {
                names.push(&e.name);
            }
        }
        names
    }

    /// Number of stored `(name, value)` pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends the last stored value for the most recent name with an
    /// obs-fold continuation, joined by a single space.
    pub(crate) fn fold_last_value(&mut self, continuation: &[u8]) -> bool {
        match self.entries.last_mut() {
            Some(entry) => {
                let mut folded = Vec::with_capacity(entry.value.len() + continuation.len() + 1);
                folded.extend_from_slice(&entry.value);
                folded.push(b' ');
                folded.extend_from_slice(continuation);
                entry.value = Bytes::from(folded);
                true
            }
            None => false,
        }
    }

    /// Parses the single value for `name` as a non-negative decimal.
    ///
    /// Multiple values must agree; a disagreement or a non-digit octet is
    /// an invalid content-length.
    pub(crate) fn content_length_of(&self, name: &'static str) -> Option<std::result::Result<u64, Parse>> {
        let values = self.get_all(name);
        if values.is_empty() {
            return None;
        }
        let mut parsed: Option<u64> = None;
        for value in values {
            let s = match std::str::from_utf8(value) {
                Ok(s) => s.trim(),
                Err(_) => return Some(Err(Parse::ContentLengthInvalid)),
            };
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Some(Err(Parse::ContentLengthInvalid));
            }
            let n = match s.parse::<u64>() {
                Ok(n) => n,
                Err(_) => return Some(Err(Parse::ContentLengthInvalid)),
            };
            match parsed {
                Some(prev) if prev != n => return Some(Err(Parse::ContentLengthInvalid)),
                _ => parsed = Some(n),
            }
        }
        parsed.map(Ok)
    }
}

fn octets_eq(a: &[u8], b: &[u8], ignore_case: bool) -> bool {
    if ignore_case {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn trim_octets(mut octets: &[u8]) -> &[u8] {
    while let Some((first, rest)) = octets.split_first() {
        if first.is_ascii_whitespace() {
            octets = rest;
        } else {
            break;
        }
    }
    while let Some((last, rest)) = octets.split_last() {
        if last.is_ascii_whitespace() {
            octets = rest;
        } else {
            break;
        }
    }
    octets
}

/// Equality compares the *set* of `(name, value)` pairs, names
/// case-insensitively, values exactly; ordering does not participate.
impl PartialEq for HeaderMap {
    fn eq(&self, other: &HeaderMap) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        let mut matched = vec![false; other.entries.len()];
        'outer: for e in &self.entries {
            for (i, o) in other.entries.iter().enumerate() {
                if !matched[i] && e.name == o.name && e.value == o.value {
                    matched[i] = true;
                    continue 'outer;
                }
            }
            return false;
        }
        true
    }
}

impl Eq for HeaderMap {}

impl Hash for HeaderMap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // order-independent so that Hash agrees with the set equality
        let mut acc: u64 = 0;
        for e in &self.entries {
            let mut h = std::collections::hash_map::DefaultHasher::new();
            e.name.hash(&mut h);
            e.value.hash(&mut h);
            acc = acc.wrapping_add(h.finish());
        }
        state.write_u64(acc);
        state.write_usize(self.entries.len());
    }
}

impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.iter() {
            map.entry(
                &String::from_utf8_lossy(name.as_bytes()),
                &String::from_utf8_lossy(value),
            );
        }
        map.finish()
    }
}
