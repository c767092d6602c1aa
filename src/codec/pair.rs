//! Combined decoder/encoder pairs with request/response correlation.

use std::collections::VecDeque;

use bytes::BytesMut;

use super::decode::{Decoder, DecoderConfig};
use super::encode::Encoder;
use crate::error::User;
use crate::message::HttpObject;
use crate::method::Method;
use crate::Result;

/// Server-side codec: decodes requests, encodes responses.
///
/// Keeps a FIFO of inbound request methods so each outbound response can
/// be framed against the request it answers; a response to `HEAD` is
/// always-empty no matter what its headers claim. Encoding more
/// responses than requests were seen is an error.
pub struct ServerCodec {
    decoder: Decoder,
    encoder: Encoder,
    methods: VecDeque<Method>,
}

impl ServerCodec {
    pub fn new(config: DecoderConfig) -> ServerCodec {
        ServerCodec {
            decoder: Decoder::request(config),
            encoder: Encoder::new(),
            methods: VecDeque::new(),
        }
    }

    pub fn decode(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<()> {
        let seen = out.len();
        self.decoder.decode(src, out)?;
        self.record_methods(&out[seen..]);
        Ok(())
    }

    pub fn decode_eof(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<()> {
        let seen = out.len();
        self.decoder.decode_eof(src, out)?;
        self.record_methods(&out[seen..]);
        Ok(())
    }

    fn record_methods(&mut self, objects: &[HttpObject]) {
        for obj in objects {
            if let Some(method) = obj.head().and_then(|head| head.method()) {
                self.methods.push_back(method.clone());
            }
        }
    }

    pub fn encode(&mut self, msg: &HttpObject, dst: &mut BytesMut) -> Result<()> {
        if let HttpObject::Head(ref head) = *msg {
            // interim responses answer nothing; the final response
            // consumes the correlated method
            let informational = head.status().map(|s| s.is_informational()).unwrap_or(false);
            if !informational {
                let method = self
                    .methods
                    .pop_front()
                    .ok_or(User::MoreResponsesThanRequests)?;
                self.encoder.set_head_request(method == Method::Head);
            }
        }
        self.encoder.encode(msg, dst)
    }

    pub fn request_reset(&mut self) {
        self.decoder.request_reset();
    }

    pub fn is_upgraded(&self) -> bool {
        self.decoder.is_upgraded()
    }
}

/// Client-side codec: encodes requests, decodes responses.
///
/// Encoded request methods feed the response decoder so `HEAD` and
/// `CONNECT` answers are framed correctly.
pub struct ClientCodec {
    decoder: Decoder,
    encoder: Encoder,
}

impl ClientCodec {
    pub fn new(config: DecoderConfig) -> ClientCodec {
        ClientCodec {
            decoder: Decoder::response(config),
            encoder: Encoder::new(),
        }
    }

    pub fn encode(&mut self, msg: &HttpObject, dst: &mut BytesMut) -> Result<()> {
        if let HttpObject::Head(ref head) = *msg {
            if let Some(method) = head.method() {
                self.decoder.observe_method(method.clone());
            }
        }
        self.encoder.encode(msg, dst)
    }

    pub fn decode(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<()> {
        self.decoder.decode(src, out)
    }

    pub fn decode_eof(&mut self, src: &mut BytesMut, out: &mut Vec<HttpObject>) -> Result<()> {
        self.decoder.decode_eof(src, out)
    }

    pub fn request_reset(&mut self) {
        self.decoder.request_reset();
    }

    pub fn is_upgraded(&self) -> bool {
        self.decoder.is_upgraded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderMap;
    use crate::message::MessageHead;
    use crate::status::StatusCode;

    #[test]
    fn head_response_body_suppressed() {
        let mut codec = ServerCodec::new(DecoderConfig::default());
        let mut buf = BytesMut::from(&b"HEAD /x HTTP/1.1\r\nHost: h\r\n\r\n"[..]);
        let mut objects = Vec::new();
        codec.decode(&mut buf, &mut objects).unwrap();

        let mut head = MessageHead::response(StatusCode::OK);
        head.headers.add_int("content-length", 5).unwrap();
        let mut dst = BytesMut::new();
        codec.encode(&HttpObject::Head(head), &mut dst).unwrap();
        codec
            .encode(
                &HttpObject::Chunk(bytes::Bytes::from_static(b"hello")),
                &mut dst,
            )
            .unwrap();
        codec
            .encode(&HttpObject::Last(HeaderMap::new()), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n".as_ref());
    }

    #[test]
    fn more_responses_than_requests_fails() {
        let mut codec = ServerCodec::new(DecoderConfig::default());
        let head = MessageHead::response(StatusCode::OK);
        let mut dst = BytesMut::new();
        let err = codec.encode(&HttpObject::Head(head), &mut dst).unwrap_err();
        assert!(err.is_user());
    }

    #[test]
    fn interim_response_does_not_consume_the_queue() {
        let mut codec = ServerCodec::new(DecoderConfig::default());
        let mut buf =
            BytesMut::from(&b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nok"[..]);
        let mut objects = Vec::new();
        codec.decode(&mut buf, &mut objects).unwrap();

        let mut dst = BytesMut::new();
        codec
            .encode(
                &HttpObject::Head(MessageHead::response(StatusCode::CONTINUE)),
                &mut dst,
            )
            .unwrap();
        codec
            .encode(&HttpObject::Last(HeaderMap::new()), &mut dst)
            .unwrap();
        // the real response still finds its correlated method
        codec
            .encode(
                &HttpObject::Head(MessageHead::response(StatusCode::OK)),
                &mut dst,
            )
            .unwrap();
    }

    #[test]
    fn client_codec_frames_head_responses() {
        let mut codec = ClientCodec::new(DecoderConfig::default());
        let head = MessageHead::request(Method::Head, "/x");
        let mut dst = BytesMut::new();
        codec.encode(&HttpObject::Head(head), &mut dst).unwrap();
        codec
            .encode(&HttpObject::Last(HeaderMap::new()), &mut dst)
            .unwrap();

        let mut buf =
            BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n"[..]);
        let mut out = Vec::new();
        codec.decode(&mut buf, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[1].is_last());
    }
}
