//! Server-side protocol upgrade handshake.
//!
//! Sits in-line on the decode side, buffers the first full request, and
//! if the peer asked for a protocol some registered codec can speak,
//! writes `101 Switching Protocols` and hands the connection off. A
//! request that does not (or cannot) upgrade passes through untouched.

use bytes::BytesMut;

use super::aggregate::{Aggregator, AggregatorConfig};
use super::encode::Encoder;
use super::{Context, Event};
use crate::headers::HeaderMap;
use crate::message::{FullMessage, HttpObject, MessageHead};
use crate::status::StatusCode;
use crate::Result;

/// One upgradable target protocol.
pub trait UpgradeCodec {
    /// Header names that must be listed in `Connection` and present on
    /// the request, beyond `Upgrade` itself.
    fn required_headers(&self) -> &[&'static str];

    /// Fills protocol-specific response headers. Returning false aborts
    /// the upgrade and the request passes through.
    fn prepare_response(&self, request: &FullMessage, headers: &mut HeaderMap) -> bool;

    /// Takes over the pipeline. Runs only after the `101` write succeeded
    /// and the HTTP source codec was removed.
    fn upgrade_to(&mut self, ctx: &mut dyn Context, request: &FullMessage);
}

/// Creates codecs for `Upgrade` tokens, first match wins.
pub trait UpgradeCodecFactory {
    fn new_codec(&self, protocol: &str) -> Option<Box<dyn UpgradeCodec>>;
}

/// The HTTP codec being upgraded away from; `upgrade_from` unhooks it.
pub trait SourceCodec {
    fn upgrade_from(&mut self, ctx: &mut dyn Context);
}

/// The in-line handshake handler.
pub struct UpgradeHandler<F, S> {
    factory: F,
    source: S,
    aggregator: Aggregator,
    removed: bool,
}

impl<F, S> UpgradeHandler<F, S>
where
    F: UpgradeCodecFactory,
    S: SourceCodec,
{
    pub fn new(factory: F, source: S) -> UpgradeHandler<F, S> {
        UpgradeHandler::with_max_content_length(factory, source, 0)
    }

    /// An upgrade request normally has no body, hence the default bound
    /// of zero.
    pub fn with_max_content_length(factory: F, source: S, max: usize) -> UpgradeHandler<F, S> {
        UpgradeHandler {
            factory,
            source,
            aggregator: Aggregator::new(AggregatorConfig::new(max)),
            removed: false,
        }
    }

    /// True once the handshake finished (either way); the caller should
    /// unhook the handler from its pipeline.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Feeds decoded objects. Requests that do not upgrade are appended
    /// to `out` for the application.
    pub fn process(
        &mut self,
        obj: HttpObject,
        ctx: &mut dyn Context,
        out: &mut Vec<FullMessage>,
    ) -> Result<()> {
        let mut full = Vec::new();
        self.aggregator.aggregate(obj, ctx, &mut full)?;
        for request in full {
            match self.try_upgrade(request, ctx)? {
                Some(request) => out.push(request),
                None => {}
            }
            self.removed = true;
        }
        Ok(())
    }

    /// Returns the request back when it should pass through.
    fn try_upgrade(
        &mut self,
        request: FullMessage,
        ctx: &mut dyn Context,
    ) -> Result<Option<FullMessage>> {
        let upgrade = match request.head.headers.get_str("upgrade") {
            Some(value) => value.to_string(),
            None => return Ok(Some(request)),
        };

        let (protocol, mut codec) = match self.select_codec(&upgrade) {
            Some(selected) => selected,
            None => {
                debug!("no codec for upgrade {:?}", upgrade);
                return Ok(Some(request));
            }
        };

        if !self.handshake_headers_present(&request, codec.as_ref()) {
            debug!("upgrade to {} missing required headers", protocol);
            return Ok(Some(request));
        }

        let mut response = MessageHead::response(StatusCode::SWITCHING_PROTOCOLS);
        response.headers.add("connection", "Upgrade")?;
        response.headers.add("upgrade", protocol.clone())?;
        response.headers.add_int("content-length", 0)?;
        if !codec.prepare_response(&request, &mut response.headers) {
            debug!("codec declined upgrade to {}", protocol);
            return Ok(Some(request));
        }

        let mut wire = BytesMut::new();
        Encoder::new().encode(&HttpObject::Head(response), &mut wire)?;
        if ctx.write(wire.freeze()).is_err() {
            debug!("upgrade response write failed; closing");
            ctx.close();
            return Ok(None);
        }

        // commit order matters: the old codec leaves before the new one
        // arrives, and the event fires last
        self.source.upgrade_from(ctx);
        codec.upgrade_to(ctx, &request);
        ctx.fire_event(Event::Upgraded { protocol, request });
        Ok(None)
    }

    fn select_codec(&self, upgrade: &str) -> Option<(String, Box<dyn UpgradeCodec>)> {
        for token in upgrade.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Some(codec) = self.factory.new_codec(token) {
                return Some((token.to_string(), codec));
            }
        }
        None
    }

    fn handshake_headers_present(&self, request: &FullMessage, codec: &dyn UpgradeCodec) -> bool {
        let headers = &request.head.headers;
        if !headers.contains_token("connection", "upgrade", true) {
            return false;
        }
        for required in codec.required_headers() {
            if !headers.contains_token("connection", required, true) {
                return false;
            }
            if !headers.contains(required.to_string()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoder, DecoderConfig};
    use bytes::Bytes;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FancyCodec {
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl UpgradeCodec for FancyCodec {
        fn required_headers(&self) -> &[&'static str] {
            &["x-fancy-seed"]
        }

        fn prepare_response(&self, _request: &FullMessage, headers: &mut HeaderMap) -> bool {
            headers.add("x-fancy-ack", "1").unwrap();
            true
        }

        fn upgrade_to(&mut self, _ctx: &mut dyn Context, _request: &FullMessage) {
            self.log.borrow_mut().push("upgrade_to");
        }
    }

    struct FancyFactory {
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl UpgradeCodecFactory for FancyFactory {
        fn new_codec(&self, protocol: &str) -> Option<Box<dyn UpgradeCodec>> {
            if protocol == "fancy" {
                Some(Box::new(FancyCodec {
                    log: self.log.clone(),
                }))
            } else {
                None
            }
        }
    }

    struct LoggingSource {
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl SourceCodec for LoggingSource {
        fn upgrade_from(&mut self, _ctx: &mut dyn Context) {
            self.log.borrow_mut().push("upgrade_from");
        }
    }

    struct TestContext {
        written: Vec<Bytes>,
        fail_writes: bool,
        closed: bool,
        events: Vec<Event>,
    }

    impl TestContext {
        fn new(fail_writes: bool) -> TestContext {
            TestContext {
                written: Vec::new(),
                fail_writes,
                closed: false,
                events: Vec::new(),
            }
        }
    }

    impl Context for TestContext {
        fn write(&mut self, bytes: Bytes) -> std::io::Result<()> {
            if self.fail_writes {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "down"));
            }
            self.written.push(bytes);
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn fire_event(&mut self, event: Event) {
            self.events.push(event);
        }

        fn reset_decoder(&mut self) {}
    }

    fn run(input: &[u8], ctx: &mut TestContext) -> (Vec<FullMessage>, Rc<RefCell<Vec<&'static str>>>, bool) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut handler = UpgradeHandler::new(
            FancyFactory { log: log.clone() },
            LoggingSource { log: log.clone() },
        );
        let mut decoder = Decoder::request(DecoderConfig::default());
        let mut buf = BytesMut::from(input);
        let mut objects = Vec::new();
        decoder.decode(&mut buf, &mut objects).unwrap();
        let mut out = Vec::new();
        for obj in objects {
            handler.process(obj, ctx, &mut out).unwrap();
        }
        (out, log, handler.is_removed())
    }

    #[test]
    fn successful_upgrade() {
        let mut ctx = TestContext::new(false);
        let (out, log, removed) = run(
            b"GET / HTTP/1.1\r\nUpgrade: fancy\r\nConnection: Upgrade, x-fancy-seed\r\nX-Fancy-Seed: 42\r\n\r\n",
            &mut ctx,
        );
        assert!(out.is_empty());
        assert!(removed);
        let response = std::str::from_utf8(&ctx.written[0]).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("upgrade: fancy\r\n"));
        assert!(response.contains("x-fancy-ack: 1\r\n"));
        // source codec leaves before the target arrives
        assert_eq!(&log.borrow()[..], ["upgrade_from", "upgrade_to"]);
        assert!(matches!(ctx.events[0], Event::Upgraded { ref protocol, .. } if protocol == "fancy"));
    }

    #[test]
    fn missing_connection_token_passes_through() {
        let mut ctx = TestContext::new(false);
        let (out, log, _) = run(
            b"GET / HTTP/1.1\r\nUpgrade: fancy\r\nConnection: Upgrade\r\nX-Fancy-Seed: 42\r\n\r\n",
            &mut ctx,
        );
        assert_eq!(out.len(), 1);
        assert!(ctx.written.is_empty());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn unknown_protocol_passes_through() {
        let mut ctx = TestContext::new(false);
        let (out, _, removed) = run(
            b"GET / HTTP/1.1\r\nUpgrade: shiny\r\nConnection: Upgrade\r\n\r\n",
            &mut ctx,
        );
        assert_eq!(out.len(), 1);
        assert!(removed);
    }

    #[test]
    fn plain_request_passes_through() {
        let mut ctx = TestContext::new(false);
        let (out, _, removed) = run(b"GET /index HTTP/1.1\r\nHost: h\r\n\r\n", &mut ctx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].head.start.request().unwrap().target, "/index");
        assert!(removed);
    }

    #[test]
    fn failed_write_closes_and_fires_nothing() {
        let mut ctx = TestContext::new(true);
        let (out, log, _) = run(
            b"GET / HTTP/1.1\r\nUpgrade: fancy\r\nConnection: Upgrade, x-fancy-seed\r\nX-Fancy-Seed: 42\r\n\r\n",
            &mut ctx,
        );
        assert!(out.is_empty());
        assert!(ctx.closed);
        assert!(ctx.events.is_empty());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn second_token_can_win() {
        let mut ctx = TestContext::new(false);
        let (_, log, _) = run(
            b"GET / HTTP/1.1\r\nUpgrade: shiny, fancy\r\nConnection: Upgrade, x-fancy-seed\r\nX-Fancy-Seed: 1\r\n\r\n",
            &mut ctx,
        );
        assert_eq!(&log.borrow()[..], ["upgrade_from", "upgrade_to"]);
    }
}
