//! # httpwire
//!
//! A streaming HTTP/1.x wire codec: incremental request/response decoding
//! and encoding, bounded message aggregation with `Expect: 100-continue`
//! negotiation, a content-codec sandwich for transparent body
//! transformation, protocol upgrade handshakes, and a
//! `multipart/form-data` / `application/x-www-form-urlencoded` body
//! decoder and encoder with tiered memory/disk part storage.
//!
//! The codec sits between a raw duplex byte transport and an application
//! handler pipeline. Inbound, it consumes arbitrary byte fragments and
//! produces a stream of typed objects: a [`MessageHead`], zero or more
//! content chunks, and one terminal object that may carry trailing
//! headers. Outbound it does the reverse. Every state machine here is
//! single-threaded and suspends cleanly on partial input; run one
//! instance per connection.
//!
//! ```
//! use bytes::BytesMut;
//! use httpwire::codec::{Decoder, DecoderConfig};
//! use httpwire::HttpObject;
//!
//! let mut decoder = Decoder::request(DecoderConfig::default());
//! let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\nHost: h\r\n\r\n"[..]);
//! let mut out = Vec::new();
//! decoder.decode(&mut buf, &mut out).unwrap();
//!
//! assert!(matches!(out[0], HttpObject::Head(_)));
//! assert!(out[1].is_last());
//! ```

#[macro_use]
extern crate tracing;

pub use crate::error::{Error, Result};
pub use crate::headers::{FoldedHeaderMap, HeaderMap};
pub use crate::message::{FullMessage, HttpObject, MessageHead, RequestLine, StartLine, StatusLine};
pub use crate::method::Method;
pub use crate::status::{StatusClass, StatusCode};
pub use crate::version::{Version, HTTP_10, HTTP_11};

pub mod ascii;
pub mod codec;
mod error;
pub mod headers;
mod message;
mod method;
pub mod multipart;
mod status;
mod version;
