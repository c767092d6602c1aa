//! Collects a streamed message into one bounded full message.

use bytes::{Bytes, BytesMut};

use super::encode::Encoder;
use super::{Context, Event};
use crate::error::Error;
use crate::headers::HeaderMap;
use crate::message::{FullMessage, HttpObject, MessageHead};
use crate::status::StatusCode;
use crate::Result;

/// Bounds and switches for an [`Aggregator`].
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub max_content_length: usize,
    pub close_on_expectation_failed: bool,
}

impl AggregatorConfig {
    pub fn new(max_content_length: usize) -> AggregatorConfig {
        AggregatorConfig {
            max_content_length,
            close_on_expectation_failed: false,
        }
    }

    pub fn close_on_expectation_failed(mut self, close: bool) -> Self {
        self.close_on_expectation_failed = close;
        self
    }
}

/// Re-assembles decoder output into [`FullMessage`]s, negotiating
/// `Expect: 100-continue` and enforcing `max_content_length`.
///
/// The aggregator owns the composite content it accumulates; a discarded
/// message drops its buffer on the spot.
pub struct Aggregator {
    config: AggregatorConfig,
    current: Option<Aggregating>,
    discarding: bool,
}

struct Aggregating {
    head: MessageHead,
    content: BytesMut,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Aggregator {
        Aggregator {
            config,
            current: None,
            discarding: false,
        }
    }

    /// Feeds one decoded object; completed messages land in `out`.
    pub fn aggregate(
        &mut self,
        obj: HttpObject,
        ctx: &mut dyn Context,
        out: &mut Vec<FullMessage>,
    ) -> Result<()> {
        match obj {
            HttpObject::Head(head) => self.begin(head, ctx),
            HttpObject::Chunk(data) => self.append(data, ctx),
            HttpObject::Last(trailers) => self.finish(trailers, ctx, out),
            HttpObject::Invalid(cause) => {
                self.current = None;
                self.discarding = false;
                Err(cause)
            }
        }
    }

    fn begin(&mut self, mut head: MessageHead, ctx: &mut dyn Context) -> Result<()> {
        self.discarding = false;
        self.current = None;

        let declared = match head.headers.content_length_of("content-length") {
            Some(Ok(n)) => Some(n),
            _ => None,
        };

        if head.is_request() {
            match expectation(&head.headers) {
                Expectation::None => {}
                Expectation::Unsupported => {
                    debug!("unsupported expectation; responding 417");
                    ctx.fire_event(Event::ExpectationFailed);
                    let _ = ctx.write(simple_response(StatusCode::EXPECTATION_FAILED, true));
                    ctx.reset_decoder();
                    if self.config.close_on_expectation_failed {
                        ctx.close();
                    }
                    self.discarding = true;
                    return Ok(());
                }
                Expectation::Continue => {
                    if declared.unwrap_or(0) > self.config.max_content_length as u64 {
                        debug!("100-continue with oversize body; responding 413");
                        ctx.fire_event(Event::ContentOversized);
                        let _ = ctx.write(simple_response(
                            StatusCode::REQUEST_ENTITY_TOO_LARGE,
                            true,
                        ));
                        ctx.reset_decoder();
                        if self.config.close_on_expectation_failed {
                            ctx.close();
                        }
                        self.discarding = true;
                        return Ok(());
                    }
                    // fire-and-forget; failure surfaces on the next write
                    let _ = ctx.write(simple_response(StatusCode::CONTINUE, false));
                    head.headers.remove("expect");
                }
            }
        }

        if let Some(declared) = declared {
            if declared > self.config.max_content_length as u64 {
                return self.handle_oversized(head, false, ctx);
            }
        }

        self.current = Some(Aggregating {
            head,
            content: BytesMut::new(),
        });
        Ok(())
    }

    fn append(&mut self, data: Bytes, ctx: &mut dyn Context) -> Result<()> {
        if self.discarding {
            return Ok(());
        }
        let over = match self.current {
            Some(ref mut agg) => {
                if agg.content.len() + data.len() > self.config.max_content_length {
                    true
                } else {
                    agg.content.extend_from_slice(&data);
                    false
                }
            }
            None => return Err(crate::error::User::UnexpectedMessage.into()),
        };
        if over {
            let agg = self.current.take().expect("aggregating message");
            // content was flowing, so the peer has already started sending
            return self.handle_oversized(agg.head, true, ctx);
        }
        Ok(())
    }

    fn finish(
        &mut self,
        trailers: HeaderMap,
        _ctx: &mut dyn Context,
        out: &mut Vec<FullMessage>,
    ) -> Result<()> {
        if self.discarding {
            self.discarding = false;
            return Ok(());
        }
        let mut agg = match self.current.take() {
            Some(agg) => agg,
            None => return Err(crate::error::User::UnexpectedMessage.into()),
        };
        if !agg.head.headers.contains("content-length") {
            agg.head
                .headers
                .add_int("content-length", agg.content.len() as u64)?;
        }
        out.push(FullMessage {
            head: agg.head,
            content: agg.content.freeze(),
            trailers,
        });
        Ok(())
    }

    /// The oversize policy: a request draws a `413` (closing the
    /// connection when the peer cannot be trusted to stop sending), a
    /// response closes immediately and raises locally.
    fn handle_oversized(
        &mut self,
        head: MessageHead,
        content_started: bool,
        ctx: &mut dyn Context,
    ) -> Result<()> {
        ctx.fire_event(Event::ContentOversized);
        if head.is_request() {
            let close_conn = content_started || !is_keep_alive(&head);
            let mut response = MessageHead::response(StatusCode::REQUEST_ENTITY_TOO_LARGE);
            response.headers.add_int("content-length", 0)?;
            if close_conn {
                response.headers.add("connection", "close")?;
            }
            debug!("oversized request; responding 413 (close={})", close_conn);
            let wrote = ctx.write(encode_response(response));
            ctx.reset_decoder();
            if close_conn || wrote.is_err() {
                ctx.close();
            }
            self.discarding = true;
            Ok(())
        } else {
            debug!("oversized response; closing");
            ctx.close();
            Err(Error::new_too_large())
        }
    }
}

enum Expectation {
    None,
    Continue,
    Unsupported,
}

fn expectation(headers: &HeaderMap) -> Expectation {
    let values = headers.get_all("expect");
    if values.is_empty() {
        return Expectation::None;
    }
    let mut expectation = Expectation::None;
    for value in values {
        for token in value.split(|&b| b == b',') {
            let token = trim_ascii(token);
            if token.is_empty() {
                continue;
            }
            if token.eq_ignore_ascii_case(b"100-continue") {
                expectation = Expectation::Continue;
            } else {
                return Expectation::Unsupported;
            }
        }
    }
    expectation
}

fn trim_ascii(mut octets: &[u8]) -> &[u8] {
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

fn is_keep_alive(head: &MessageHead) -> bool {
    if head.headers.contains_token("connection", "close", true) {
        return false;
    }
    if head.headers.contains_token("connection", "keep-alive", true) {
        return true;
    }
    head.version.keep_alive_default()
}

fn simple_response(code: StatusCode, zero_length: bool) -> Bytes {
    let mut head = MessageHead::response(code);
    if zero_length {
        head.headers
            .add_int("content-length", 0)
            .expect("static header");
    }
    encode_response(head)
}

fn encode_response(head: MessageHead) -> Bytes {
    let mut encoder = Encoder::new();
    let mut dst = BytesMut::new();
    encoder
        .encode(&HttpObject::Head(head), &mut dst)
        .expect("fresh encoder accepts a head");
    dst.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoder, DecoderConfig};
    use crate::method::Method;

    #[derive(Default)]
    struct TestContext {
        written: Vec<Bytes>,
        closed: bool,
        resets: usize,
        events: Vec<Event>,
    }

    impl Context for TestContext {
        fn write(&mut self, bytes: Bytes) -> std::io::Result<()> {
            self.written.push(bytes);
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn fire_event(&mut self, event: Event) {
            self.events.push(event);
        }

        fn reset_decoder(&mut self) {
            self.resets += 1;
        }
    }

    fn run(max: usize, input: &[u8]) -> (Vec<FullMessage>, TestContext, Result<()>) {
        let mut decoder = Decoder::request(DecoderConfig::default());
        let mut aggregator = Aggregator::new(AggregatorConfig::new(max));
        let mut ctx = TestContext::default();
        let mut buf = bytes::BytesMut::from(input);
        let mut objects = Vec::new();
        decoder.decode(&mut buf, &mut objects).unwrap();
        let mut out = Vec::new();
        let mut result = Ok(());
        for obj in objects {
            result = aggregator.aggregate(obj, &mut ctx, &mut out);
            if result.is_err() {
                break;
            }
        }
        (out, ctx, result)
    }

    #[test]
    fn aggregates_fixed_length_request() {
        let (out, ctx, result) =
            run(1024, b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        result.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].content[..], b"hello");
        assert_eq!(out[0].head.method(), Some(&Method::Post));
        assert!(ctx.written.is_empty());
    }

    #[test]
    fn backfills_content_length_for_chunked() {
        let (out, _, result) = run(
            1024,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nfoo\r\n0\r\n\r\n",
        );
        result.unwrap();
        assert_eq!(out[0].head.headers.get_str("content-length"), Some("3"));
    }

    #[test]
    fn trailers_absorbed() {
        let (out, _, result) = run(
            1024,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nfoo\r\n0\r\nX-T: 1\r\n\r\n",
        );
        result.unwrap();
        assert_eq!(out[0].trailers.get_str("x-t"), Some("1"));
    }

    #[test]
    fn expect_continue_within_bound() {
        let (out, ctx, result) = run(
            1024,
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nExpect: 100-continue\r\n\r\nhello",
        );
        result.unwrap();
        assert_eq!(ctx.written.len(), 1);
        assert!(ctx.written[0].starts_with(b"HTTP/1.1 100 Continue\r\n"));
        assert_eq!(out.len(), 1);
        // the expectation was honoured, so it does not reach the handler
        assert!(!out[0].head.headers.contains("expect"));
    }

    #[test]
    fn expect_continue_oversize_draws_413() {
        let (out, ctx, result) = run(
            4,
            b"POST / HTTP/1.1\r\nContent-Length: 10\r\nExpect: 100-continue\r\n\r\n",
        );
        result.unwrap();
        assert!(out.is_empty());
        assert_eq!(
            &ctx.written[0][..],
            b"HTTP/1.1 413 Request Entity Too Large\r\ncontent-length: 0\r\n\r\n".as_ref()
        );
        assert_eq!(ctx.resets, 1);
        assert!(matches!(ctx.events[0], Event::ContentOversized));
    }

    #[test]
    fn foreign_expectation_draws_417() {
        let (out, ctx, result) = run(
            1024,
            b"POST / HTTP/1.1\r\nContent-Length: 5\r\nExpect: fortune\r\n\r\nhello",
        );
        result.unwrap();
        assert!(out.is_empty());
        assert!(ctx.written[0].starts_with(b"HTTP/1.1 417 Expectation Failed\r\n"));
        assert!(matches!(ctx.events[0], Event::ExpectationFailed));
        assert_eq!(ctx.resets, 1);
        assert!(!ctx.closed);
    }

    #[test]
    fn declared_oversize_draws_413_and_reset() {
        let (out, ctx, result) =
            run(4, b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789");
        result.unwrap();
        assert!(out.is_empty());
        assert!(ctx.written[0].starts_with(b"HTTP/1.1 413 Request Entity Too Large\r\n"));
        assert_eq!(ctx.resets, 1);
    }

    #[test]
    fn running_tally_oversize_is_caught() {
        // chunked body with no declared length crosses the bound mid-stream
        let (out, ctx, result) = run(
            4,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n6\r\nabcdef\r\n0\r\n\r\n",
        );
        result.unwrap();
        assert!(out.is_empty());
        assert!(ctx.written[0].starts_with(b"HTTP/1.1 413"));
        // content had started flowing, so the connection goes down
        assert!(ctx.closed);
    }

    #[test]
    fn accumulated_content_never_exceeds_max() {
        for max in [0usize, 1, 3, 5, 64] {
            let (out, _, _) = run(
                max,
                b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
            );
            for msg in &out {
                assert!(msg.content.len() <= max);
            }
        }
    }

    #[test]
    fn close_on_expectation_failed() {
        let mut decoder = Decoder::request(DecoderConfig::default());
        let config = AggregatorConfig::new(4).close_on_expectation_failed(true);
        let mut aggregator = Aggregator::new(config);
        let mut ctx = TestContext::default();
        let mut buf = bytes::BytesMut::from(
            &b"POST / HTTP/1.1\r\nContent-Length: 10\r\nExpect: 100-continue\r\n\r\n"[..],
        );
        let mut objects = Vec::new();
        decoder.decode(&mut buf, &mut objects).unwrap();
        let mut out = Vec::new();
        for obj in objects {
            aggregator.aggregate(obj, &mut ctx, &mut out).unwrap();
        }
        assert!(ctx.closed);
    }
}
