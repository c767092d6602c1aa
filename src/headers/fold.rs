//! Comma-folded single-field header store.
//!
//! Wraps a [`HeaderMap`] so each name holds exactly one physical value at
//! any instant; logical values are CSV-escaped into it and recovered on
//! read. This is a capability layered over the plain store, not a
//! subtype of it.

use bytes::Bytes;

use super::{HeaderMap, IntoHeaderName};
use crate::Result;

/// A header store that folds repeated values into one comma-separated
/// field per name, for single-field encoding such as trailer emission.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct FoldedHeaderMap {
    inner: HeaderMap,
}

impl FoldedHeaderMap {
    pub fn new() -> FoldedHeaderMap {
        FoldedHeaderMap::default()
    }

    /// Appends `value` to the single stored field for `name`, escaping it
    /// per the CSV rule first.
    pub fn add<N, V>(&mut self, name: N, value: V) -> Result<&mut FoldedHeaderMap>
    where
        N: IntoHeaderName,
        V: AsRef<[u8]>,
    {
        let name = name.into_header_name();
        let escaped = escape_csv(value.as_ref());
        match self.inner.get(name.clone()).cloned() {
            Some(existing) => {
                let mut joined = Vec::with_capacity(existing.len() + escaped.len() + 1);
                joined.extend_from_slice(&existing);
                joined.push(b',');
                joined.extend_from_slice(&escaped);
                self.inner.set(name, joined)?;
            }
            None => {
                self.inner.add(name, escaped)?;
            }
        }
        Ok(self)
    }

    /// Replaces the field for `name` with the escaped `value`.
    pub fn set<N, V>(&mut self, name: N, value: V) -> Result<&mut FoldedHeaderMap>
    where
        N: IntoHeaderName,
        V: AsRef<[u8]>,
    {
        self.inner.set(name, escape_csv(value.as_ref()))?;
        Ok(self)
    }

    pub fn remove<N>(&mut self, name: N) -> &mut FoldedHeaderMap
    where
        N: IntoHeaderName,
    {
        self.inner.remove(name);
        self
    }

    pub fn contains<N>(&self, name: N) -> bool
    where
        N: IntoHeaderName,
    {
        self.inner.contains(name)
    }

    /// The unescaped logical values for `name`, split on unquoted commas.
    pub fn get_all<N>(&self, name: N) -> Vec<Bytes>
    where
        N: IntoHeaderName,
    {
        match self.inner.get(name) {
            Some(field) => split_unquoted(field)
                .into_iter()
                .map(|piece| Bytes::from(unescape_csv(piece)))
                .collect(),
            None => Vec::new(),
        }
    }

    /// The folded wire form, as stored.
    pub fn inner(&self) -> &HeaderMap {
        &self.inner
    }
}

/// Escapes one logical value: wrapped in double quotes when it contains a
/// comma, quote, CR or LF; embedded quotes are doubled.
fn escape_csv(value: &[u8]) -> Vec<u8> {
    let needs_quoting = value
        .iter()
        .any(|&b| matches!(b, b',' | b'"' | b'\r' | b'\n'));
    if !needs_quoting {
        return value.to_vec();
    }
    let mut out = Vec::with_capacity(value.len() + 2);
    out.push(b'"');
    for &b in value {
        if b == b'"' {
            out.push(b'"');
        }
        out.push(b);
    }
    out.push(b'"');
    out
}

fn unescape_csv(piece: &[u8]) -> Vec<u8> {
    if piece.len() >= 2 && piece[0] == b'"' && piece[piece.len() - 1] == b'"' {
        let inner = &piece[1..piece.len() - 1];
        let mut out = Vec::with_capacity(inner.len());
        let mut i = 0;
        while i < inner.len() {
            if inner[i] == b'"' && inner.get(i + 1) == Some(&b'"') {
                i += 1;
            }
            out.push(inner[i]);
            i += 1;
        }
        out
    } else {
        piece.to_vec()
    }
}

fn split_unquoted(field: &[u8]) -> Vec<&[u8]> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut i = 0;
    while i < field.len() {
        match field[i] {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                pieces.push(&field[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    pieces.push(&field[start..]);
    pieces
}
