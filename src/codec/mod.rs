//! The streaming HTTP/1.x codec and its pipeline handlers.

pub use self::aggregate::{Aggregator, AggregatorConfig};
pub use self::content::{
    ContentDecoder, ContentEncoder, ContentTransform, NewTransform, TransformFactory,
};
pub use self::decode::{Decoder, DecoderConfig};
pub use self::encode::Encoder;
pub use self::pair::{ClientCodec, ServerCodec};
pub use self::upgrade::{SourceCodec, UpgradeCodec, UpgradeCodecFactory, UpgradeHandler};

mod aggregate;
mod content;
mod decode;
mod encode;
mod line;
mod pair;
mod upgrade;

use bytes::Bytes;

use crate::message::FullMessage;

/// Events a handler can fire toward the application.
#[derive(Debug)]
pub enum Event {
    /// An `Expect` header failed negotiation; the rejection response has
    /// already been written.
    ExpectationFailed,
    /// An inbound message crossed the aggregator bound; the `413` has
    /// already been written for requests.
    ContentOversized,
    /// An upgrade handshake completed; the pipeline now speaks
    /// `protocol`. Carries the request that initiated it.
    Upgraded {
        protocol: String,
        request: FullMessage,
    },
}

/// The narrow slice of a pipeline the handlers in this module call back
/// into: flush-writes toward the peer, connection close, user events, and
/// decoder reset.
///
/// Writes are fire-and-forget from the handler's point of view; an `Err`
/// only matters where a contract says so (the upgrade commit).
pub trait Context {
    fn write(&mut self, bytes: Bytes) -> std::io::Result<()>;
    fn close(&mut self);
    fn fire_event(&mut self, event: Event);
    fn reset_decoder(&mut self);
}
