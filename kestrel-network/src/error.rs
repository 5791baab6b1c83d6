use thiserror::Error;

/// Why a peer session ended.
///
/// Misbehavior variants mark the peer as hostile for address-book scoring;
/// `Io` and `Closed` are neutral.
#[derive(Error, Debug)]
pub enum PeerError {
    /// The framing magic did not match our network.
    #[error("message magic did not match the configured network")]
    WrongMagic,
    /// A payload failed its checksum.
    #[error("message checksum mismatch")]
    BadChecksum,
    /// A payload length field exceeded the protocol maximum.
    #[error("oversized message payload")]
    OversizedPayload,
    /// The peer sent something indecipherable.
    #[error("malformed message: {0}")]
    Malformed(#[from] kestrel_chain::SerializationError),
    /// The peer sent a message its negotiated version should not produce.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),
    /// The peer failed to answer a ping in time.
    #[error("ping timed out")]
    PingTimeout,
    /// The download peer stopped making progress.
    #[error("chain download stalled")]
    Stalled,
    /// The remote closed or the transport failed.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    /// We closed the session deliberately.
    #[error("connection closed locally")]
    Closed,
}

impl PeerError {
    /// Whether this close reason counts against the peer.
    pub fn is_misbehavior(&self) -> bool {
        !matches!(self, PeerError::Io(_) | PeerError::Closed)
    }
}

/// Why a handshake did not produce a ready peer.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The TCP dial or exchange took too long.
    #[error("handshake timed out")]
    Timeout,
    /// The peer's advertised version is below our minimum.
    #[error("remote version {0} is below the minimum supported version")]
    ObsoleteVersion(u32),
    /// The peer replied with something other than version/verack.
    #[error("unexpected handshake message")]
    UnexpectedMessage,
    /// The peer echoed one of our own nonces: we dialed ourselves.
    #[error("connected to self")]
    ConnectedToSelf,
    /// Transport failure mid-handshake.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    /// Codec failure mid-handshake.
    #[error("malformed handshake message: {0}")]
    Malformed(#[from] kestrel_chain::SerializationError),
}
