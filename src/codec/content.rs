//! Transparent body transformation around the codec.
//!
//! A [`ContentDecoder`] sits after the message decoder and runs body
//! bytes through a pluggable transformer (a gzip inflater, say) while
//! rewriting the framing headers so the message stays self-consistent: a
//! transformed body loses its `Content-Length` and becomes chunked. The
//! outbound [`ContentEncoder`] mirrors it, correlating each response with
//! the `Accept-Encoding` of the request that caused it.

use std::collections::VecDeque;

use bytes::BytesMut;

use crate::error::{Error, User};
use crate::headers::HeaderMap;
use crate::message::{HttpObject, MessageHead};
use crate::method::Method;
use crate::status::StatusCode;
use crate::version::HTTP_10;
use crate::Result;

/// A byte-to-byte body transformer.
///
/// `push` consumes a fragment and appends whatever output is ready;
/// `finish` flushes the tail once input ends. Implementations are used
/// for one body and dropped.
pub trait ContentTransform {
    fn push(&mut self, input: &[u8], out: &mut BytesMut) -> Result<()>;
    fn finish(&mut self, out: &mut BytesMut) -> Result<()>;
}

/// Supplies transformers per encoding token.
///
/// Inbound, `encoding` is the message's `Content-Encoding`; outbound it
/// is the correlated request's `Accept-Encoding`. Returning `None` passes
/// the body through untouched.
pub trait TransformFactory {
    fn transform(&mut self, encoding: &str) -> Option<NewTransform>;
}

/// A transformer plus the encoding the transformed body is in.
///
/// An `identity` target removes the `Content-Encoding` header; anything
/// else replaces it.
pub struct NewTransform {
    pub transform: Box<dyn ContentTransform>,
    pub encoding: String,
}

const IDENTITY: &str = "identity";

/// Inbound half of the sandwich: decompresses message bodies.
pub struct ContentDecoder<F> {
    factory: F,
    active: Option<Box<dyn ContentTransform>>,
}

impl<F: TransformFactory> ContentDecoder<F> {
    pub fn new(factory: F) -> ContentDecoder<F> {
        ContentDecoder {
            factory,
            active: None,
        }
    }

    /// Feeds one decoded object through the sandwich.
    pub fn process(&mut self, obj: HttpObject, out: &mut Vec<HttpObject>) -> Result<()> {
        match obj {
            HttpObject::Head(head) => {
                // interim responses carry no body to transform
                if head.status() == Some(StatusCode::CONTINUE) {
                    out.push(HttpObject::Head(head));
                    return Ok(());
                }
                self.begin(head, out)
            }
            HttpObject::Chunk(data) => match self.active {
                Some(ref mut transform) => {
                    let mut produced = BytesMut::new();
                    transform
                        .push(&data, &mut produced)
                        .map_err(content_error)?;
                    if !produced.is_empty() {
                        out.push(HttpObject::Chunk(produced.freeze()));
                    }
                    Ok(())
                }
                None => {
                    out.push(HttpObject::Chunk(data));
                    Ok(())
                }
            },
            HttpObject::Last(trailers) => {
                if let Some(mut transform) = self.active.take() {
                    let mut produced = BytesMut::new();
                    transform.finish(&mut produced).map_err(content_error)?;
                    if !produced.is_empty() {
                        out.push(HttpObject::Chunk(produced.freeze()));
                    }
                }
                out.push(HttpObject::Last(trailers));
                Ok(())
            }
            other => {
                out.push(other);
                Ok(())
            }
        }
    }

    fn begin(&mut self, mut head: MessageHead, out: &mut Vec<HttpObject>) -> Result<()> {
        let encoding = head
            .headers
            .get_str("content-encoding")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| IDENTITY.to_string());

        match self.factory.transform(&encoding) {
            Some(new) => {
                trace!("decoding {} body", encoding);
                rewrite_framing(&mut head.headers, &new.encoding)?;
                self.active = Some(new.transform);
                // a head-only copy goes downstream so content can follow
                out.push(HttpObject::Head(head));
                Ok(())
            }
            None => {
                out.push(HttpObject::Head(head));
                Ok(())
            }
        }
    }
}

/// Outbound half: compresses response bodies against the requests'
/// `Accept-Encoding`, queued in arrival order.
pub struct ContentEncoder<F> {
    factory: F,
    accept_queue: VecDeque<Accept>,
    active: Option<Box<dyn ContentTransform>>,
}

enum Accept {
    Value(String),
    /// HEAD and CONNECT responses must never be transformed.
    PassThrough,
}

impl<F: TransformFactory> ContentEncoder<F> {
    pub fn new(factory: F) -> ContentEncoder<F> {
        ContentEncoder {
            factory,
            accept_queue: VecDeque::new(),
            active: None,
        }
    }

    /// Correlates an inbound request with the response that will answer
    /// it. Call once per decoded request head.
    pub fn record_request(&mut self, head: &MessageHead) {
        let accept = match head.method() {
            Some(&Method::Head) | Some(&Method::Connect) => Accept::PassThrough,
            _ => Accept::Value(
                head.headers
                    .get_str("accept-encoding")
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| IDENTITY.to_string()),
            ),
        };
        self.accept_queue.push_back(accept);
    }

    /// Feeds one outbound object through the sandwich.
    pub fn process(&mut self, obj: HttpObject, out: &mut Vec<HttpObject>) -> Result<()> {
        match obj {
            HttpObject::Head(head) => self.begin(head, out),
            HttpObject::Chunk(data) => match self.active {
                Some(ref mut transform) => {
                    let mut produced = BytesMut::new();
                    transform
                        .push(&data, &mut produced)
                        .map_err(content_error)?;
                    if !produced.is_empty() {
                        out.push(HttpObject::Chunk(produced.freeze()));
                    }
                    Ok(())
                }
                None => {
                    out.push(HttpObject::Chunk(data));
                    Ok(())
                }
            },
            HttpObject::Last(trailers) => {
                if let Some(mut transform) = self.active.take() {
                    let mut produced = BytesMut::new();
                    transform.finish(&mut produced).map_err(content_error)?;
                    if !produced.is_empty() {
                        out.push(HttpObject::Chunk(produced.freeze()));
                    }
                }
                out.push(HttpObject::Last(trailers));
                Ok(())
            }
            other => {
                out.push(other);
                Ok(())
            }
        }
    }

    fn begin(&mut self, mut head: MessageHead, out: &mut Vec<HttpObject>) -> Result<()> {
        let code = head
            .status()
            .map(|status| status.as_u16())
            .unwrap_or(200);

        // interim responses answer nothing from the queue
        if code < 200 {
            out.push(HttpObject::Head(head));
            return Ok(());
        }

        let accept = match self.accept_queue.pop_front() {
            Some(accept) => accept,
            None => return Err(User::MoreResponsesThanRequests.into()),
        };

        let pass_through =
            matches!(accept, Accept::PassThrough) || code == 204 || code == 304 || head.version == HTTP_10;
        if pass_through {
            out.push(HttpObject::Head(head));
            return Ok(());
        }

        let accept = match accept {
            Accept::Value(value) => value,
            Accept::PassThrough => unreachable!("handled above"),
        };

        match self.factory.transform(&accept) {
            Some(new) => {
                trace!("encoding body as {}", new.encoding);
                rewrite_framing(&mut head.headers, &new.encoding)?;
                self.active = Some(new.transform);
                out.push(HttpObject::Head(head));
                Ok(())
            }
            None => {
                out.push(HttpObject::Head(head));
                Ok(())
            }
        }
    }
}

/// A transformed body has an unknown length: drop `Content-Length`, go
/// chunked, and make `Content-Encoding` tell the truth.
fn rewrite_framing(headers: &mut HeaderMap, target_encoding: &str) -> Result<()> {
    headers.remove("content-length");
    headers.set("transfer-encoding", "chunked")?;
    if target_encoding == IDENTITY {
        headers.remove("content-encoding");
    } else {
        headers.set("content-encoding", target_encoding.to_string())?;
    }
    Ok(())
}

fn content_error(err: Error) -> Error {
    Error::new_content().with(err)
}
