//! Protocol constants.

use crate::protocol::external::types::ProtocolVersion;

/// The protocol version we speak.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion(70015);

/// The oldest protocol version we will talk to.
///
/// Peers below this lack `sendheaders`/`feefilter` and the bloom filter
/// service bit semantics we rely on.
pub const MIN_PEER_VERSION: ProtocolVersion = ProtocolVersion(70001);

/// The user agent string advertised in version messages.
pub const USER_AGENT: &str = "/kestrel:0.1.0/";

/// The hard cap on a message payload.
pub const MAX_PROTOCOL_MESSAGE_LEN: usize = 32 * 1024 * 1024;

/// How many `getdata` requests may be outstanding on one peer.
pub const MAX_INFLIGHT_REQUESTS: usize = 128;

/// How many messages may queue for sending to one peer before its
/// producers are backpressured.
pub const OUTBOUND_QUEUE_LEN: usize = 64;

/// How many headers a peer may send per `headers` message.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2000;

/// How many recently-sent version nonces to remember for self-connection
/// detection.
pub const SELF_CONNECTION_NONCES: usize = 16;
