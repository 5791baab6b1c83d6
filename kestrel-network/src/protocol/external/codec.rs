//! A Tokio codec mapping byte streams to Bitcoin message streams.

use std::fmt;
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use kestrel_chain::{
    block,
    parameters::{Magic, Network},
    serialization::{
        read_limited_bytes, sha256d, BitcoinDeserialize, BitcoinSerialize,
        SerializationError as Error,
    },
};

use crate::constants;
use crate::meta_addr::MetaAddr;

use super::{
    command::Command,
    inv::InventoryHash,
    message::{GetBlocks, GetHeaders, MerkleBlockMessage, Message, RejectReason, VersionMessage},
    types::*,
};

/// The length of a Bitcoin message header.
const HEADER_LEN: usize = 24usize;

/// A codec which produces Bitcoin messages from byte streams and vice versa.
pub struct Codec {
    builder: Builder,
    state: DecodeState,
}

/// Configures and constructs a [`Codec`].
pub struct Builder {
    /// The magic framing every message on this network.
    network: Network,
    /// The negotiated protocol version.
    version: ProtocolVersion,
    /// The largest payload this codec will produce or accept.
    max_len: usize,
    /// Peer label attached to byte-count metrics.
    metrics_label: Option<String>,
}

impl Codec {
    /// Return a builder for constructing a [`Codec`].
    pub fn builder() -> Builder {
        Builder {
            network: Network::Mainnet,
            version: constants::CURRENT_VERSION,
            max_len: constants::MAX_PROTOCOL_MESSAGE_LEN,
            metrics_label: None,
        }
    }

    /// Switch the codec's protocol version, e.g. after version negotiation.
    pub fn reconfigure_version(&mut self, version: ProtocolVersion) {
        self.builder.version = version;
    }
}

impl Builder {
    /// Finalize the builder and return a [`Codec`].
    pub fn finish(self) -> Codec {
        Codec {
            builder: self,
            state: DecodeState::Head,
        }
    }

    /// Configure the codec for the given [`Network`].
    pub fn for_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Configure the codec for the given protocol version.
    pub fn for_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Configure the codec's maximum accepted payload size, in bytes.
    #[allow(dead_code)]
    pub fn with_max_body_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }

    /// Configure the codec for the given peer address.
    pub fn with_metrics_label(mut self, metrics_label: String) -> Self {
        self.metrics_label = Some(metrics_label);
        self
    }
}

// ======== Encoding =========

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        use Error::Parse;

        let mut body = Vec::new();
        self.write_body(&item, &mut body)?;

        if body.len() > self.builder.max_len {
            return Err(Parse("body length exceeded maximum size"));
        }

        if let Some(label) = self.builder.metrics_label.clone() {
            metrics::counter!("bytes.written", (body.len() + HEADER_LEN) as u64, "addr" => label);
        }

        let command = item.command();
        tracing::trace!(%item, len = body.len(), "encoding message");

        let mut header = [0u8; HEADER_LEN];
        let mut header_writer = Cursor::new(&mut header[..]);
        header_writer.write_all(&Magic::from(self.builder.network).0[..])?;
        header_writer.write_all(&command.bytes())?;
        header_writer.write_u32::<LittleEndian>(body.len() as u32)?;
        header_writer.write_all(&sha256d::Checksum::from(&body[..]).0)?;

        dst.reserve(HEADER_LEN + body.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

impl Codec {
    /// Write the body of the message into the given writer. Writing the
    /// body first lets the header carry its checksum.
    fn write_body<W: Write>(&self, msg: &Message, mut writer: W) -> Result<(), Error> {
        match msg {
            Message::Version(inner) => inner.bitcoin_serialize(&mut writer)?,
            Message::Verack => { /* Empty payload -- no-op */ }
            Message::Ping(nonce) => nonce.bitcoin_serialize(&mut writer)?,
            Message::Pong(nonce) => nonce.bitcoin_serialize(&mut writer)?,
            Message::Reject {
                message,
                ccode,
                reason,
                data,
            } => {
                message.bitcoin_serialize(&mut writer)?;
                writer.write_u8(*ccode as u8)?;
                reason.bitcoin_serialize(&mut writer)?;
                if let Some(data) = data {
                    writer.write_all(data)?;
                }
            }
            Message::Addr(addrs) => addrs.bitcoin_serialize(&mut writer)?,
            Message::GetAddr => { /* Empty payload -- no-op */ }
            Message::Block(block) => block.bitcoin_serialize(&mut writer)?,
            Message::GetBlocks(get_blocks) => {
                self.builder.version.bitcoin_serialize(&mut writer)?;
                get_blocks.bitcoin_serialize(&mut writer)?
            }
            Message::GetHeaders(get_headers) => {
                self.builder.version.bitcoin_serialize(&mut writer)?;
                get_headers.bitcoin_serialize(&mut writer)?
            }
            Message::Headers(headers) => headers.bitcoin_serialize(&mut writer)?,
            Message::Inv(hashes) => hashes.bitcoin_serialize(&mut writer)?,
            Message::GetData(hashes) => hashes.bitcoin_serialize(&mut writer)?,
            Message::NotFound(hashes) => hashes.bitcoin_serialize(&mut writer)?,
            Message::Tx(transaction) => transaction.bitcoin_serialize(&mut writer)?,
            Message::Mempool => { /* Empty payload -- no-op */ }
            Message::FilterLoad {
                filter,
                hash_functions_count,
                tweak,
                flags,
            } => {
                filter.0.bitcoin_serialize(&mut writer)?;
                writer.write_u32::<LittleEndian>(*hash_functions_count)?;
                tweak.bitcoin_serialize(&mut writer)?;
                writer.write_u8(*flags)?;
            }
            Message::FilterAdd { data } => data.bitcoin_serialize(&mut writer)?,
            Message::FilterClear => { /* Empty payload -- no-op */ }
            Message::MerkleBlock(inner) => inner.bitcoin_serialize(&mut writer)?,
            Message::FeeFilter(rate) => rate.bitcoin_serialize(&mut writer)?,
            Message::SendHeaders => { /* Empty payload -- no-op */ }
        }
        Ok(())
    }
}

// ======== Decoding =========

enum DecodeState {
    Head,
    Body {
        body_len: usize,
        command: Command,
        checksum: sha256d::Checksum,
    },
}

impl fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeState::Head => write!(f, "DecodeState::Head"),
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => f
                .debug_struct("DecodeState::Body")
                .field("body_len", &body_len)
                .field("command", &command)
                .field("checksum", &checksum)
                .finish(),
        }
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        use Error::Parse;
        match self.state {
            DecodeState::Head => {
                // Wait until the buffer holds a complete header.
                if src.len() < HEADER_LEN {
                    // Not enough buffered yet; ask for more.
                    return Ok(None);
                }

                // Split the header off the front of the buffer.
                let header = src.split_to(HEADER_LEN);

                // Parse the fixed header fields.
                let mut header_reader = Cursor::new(&header);
                let magic = Magic(<[u8; 4]>::bitcoin_deserialize(&mut header_reader)?);
                let command = Command::bitcoin_deserialize(&mut header_reader)?;
                let body_len = header_reader.read_u32::<LittleEndian>()? as usize;
                let checksum =
                    sha256d::Checksum(<[u8; 4]>::bitcoin_deserialize(&mut header_reader)?);

                if magic != Magic::from(self.builder.network) {
                    return Err(Parse("supplied magic did not meet expectations"));
                }
                if body_len > self.builder.max_len {
                    return Err(Parse("body length exceeded maximum size"));
                }

                if let Some(label) = self.builder.metrics_label.clone() {
                    metrics::counter!("bytes.read", (body_len + HEADER_LEN) as u64, "addr" => label);
                }

                // Reserve room for the body plus the next header.
                src.reserve(body_len + HEADER_LEN);

                self.state = DecodeState::Body {
                    body_len,
                    command,
                    checksum,
                };

                // The body may already be buffered; try it immediately.
                self.decode(src)
            }
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => {
                if src.len() < body_len {
                    // Need to wait for the full body.
                    return Ok(None);
                }

                // Take the body and reset to Head, or the next header
                // would be misread as part of this body.
                let body = src.split_to(body_len);
                self.state = DecodeState::Head;

                if checksum != sha256d::Checksum::from(&body[..]) {
                    return Err(Parse(
                        "supplied message checksum does not match computed checksum",
                    ));
                }

                let mut body_reader = Cursor::new(&body);
                // Convention: deserialize the message directly unless it
                // requires context from the codec; then use a read_* method.
                let msg = match command {
                    Command::Addr => {
                        Message::Addr(Vec::<MetaAddr>::bitcoin_deserialize(&mut body_reader)?)
                    }
                    Command::Version => {
                        Message::Version(VersionMessage::bitcoin_deserialize(&mut body_reader)?)
                    }
                    Command::Verack => Message::Verack,
                    Command::GetBlocks => self.read_getblocks(&mut body_reader)?,
                    Command::GetData => Message::GetData(
                        <Vec<InventoryHash>>::bitcoin_deserialize(&mut body_reader)?,
                    ),
                    Command::Block => Message::Block(
                        <std::sync::Arc<block::Block>>::bitcoin_deserialize(&mut body_reader)?,
                    ),
                    Command::GetHeaders => self.read_getheaders(&mut body_reader)?,
                    Command::Headers => {
                        let headers =
                            <Vec<block::CountedHeader>>::bitcoin_deserialize(&mut body_reader)?;
                        if headers.len() > constants::MAX_HEADERS_PER_MESSAGE {
                            return Err(Parse("headers message exceeds the protocol limit"));
                        }
                        Message::Headers(headers)
                    }
                    Command::Inv => {
                        Message::Inv(<Vec<InventoryHash>>::bitcoin_deserialize(&mut body_reader)?)
                    }
                    Command::MemPool => Message::Mempool,
                    Command::MerkleBlock => Message::MerkleBlock(
                        MerkleBlockMessage::bitcoin_deserialize(&mut body_reader)?,
                    ),
                    Command::NotFound => Message::NotFound(
                        <Vec<InventoryHash>>::bitcoin_deserialize(&mut body_reader)?,
                    ),
                    Command::Tx => Message::Tx(
                        <std::sync::Arc<kestrel_chain::transaction::Transaction>>::bitcoin_deserialize(
                            &mut body_reader,
                        )?,
                    ),
                    Command::FeeFilter => {
                        Message::FeeFilter(u64::bitcoin_deserialize(&mut body_reader)?)
                    }
                    Command::FilterAdd => self.read_filteradd(&mut body_reader)?,
                    Command::FilterClear => Message::FilterClear,
                    Command::FilterLoad => self.read_filterload(&mut body_reader, body_len)?,
                    Command::GetAddr => Message::GetAddr,
                    Command::Ping => Message::Ping(Nonce::bitcoin_deserialize(&mut body_reader)?),
                    Command::Pong => Message::Pong(Nonce::bitcoin_deserialize(&mut body_reader)?),
                    Command::Reject => self.read_reject(&mut body_reader)?,
                    Command::SendHeaders => Message::SendHeaders,
                };
                tracing::trace!(%msg, "finished message decoding");
                Ok(Some(msg))
            }
        }
    }
}

impl Codec {
    fn read_reject<R: Read>(&self, mut reader: R) -> Result<Message, Error> {
        Ok(Message::Reject {
            message: String::bitcoin_deserialize(&mut reader)?,
            ccode: match reader.read_u8()? {
                0x01 => RejectReason::Malformed,
                0x10 => RejectReason::Invalid,
                0x11 => RejectReason::Obsolete,
                0x12 => RejectReason::Duplicate,
                0x40 => RejectReason::Nonstandard,
                0x41 => RejectReason::Dust,
                0x42 => RejectReason::InsufficientFee,
                0x43 => RejectReason::Checkpoint,
                0x50 => RejectReason::Other,
                _ => return Err(Error::Parse("invalid RejectReason value in ccode field")),
            },
            reason: String::bitcoin_deserialize(&mut reader)?,
            // There's no length field for the data; implementations supply
            // either a 32-byte hash of the rejected object or nothing, so
            // try to read 32 bytes and accept absence.
            data: <[u8; 32]>::bitcoin_deserialize(&mut reader).ok(),
        })
    }

    fn read_getblocks<R: Read>(&self, mut reader: R) -> Result<Message, Error> {
        let received_version = ProtocolVersion::bitcoin_deserialize(&mut reader)?;
        let get_blocks = GetBlocks::bitcoin_deserialize(&mut reader)?;
        if self.builder.version == received_version {
            Ok(Message::GetBlocks(get_blocks))
        } else {
            Err(Error::Parse("getblocks version did not match negotiation"))
        }
    }

    fn read_getheaders<R: Read>(&self, mut reader: R) -> Result<Message, Error> {
        let received_version = ProtocolVersion::bitcoin_deserialize(&mut reader)?;
        let get_headers = GetHeaders::bitcoin_deserialize(&mut reader)?;
        if self.builder.version == received_version {
            Ok(Message::GetHeaders(get_headers))
        } else {
            Err(Error::Parse("getheaders version did not match negotiation"))
        }
    }

    fn read_filterload<R: Read>(&self, mut reader: R, body_len: usize) -> Result<Message, Error> {
        const MAX_FILTER_LENGTH: usize = 36000;
        // filter length prefix is part of the vec encoding; the remainder
        // is the function count, tweak, and flags.
        const FILTERLOAD_REMAINDER_LENGTH: usize = 4 + 4 + 1;

        if body_len < FILTERLOAD_REMAINDER_LENGTH + 1
            || body_len > MAX_FILTER_LENGTH + FILTERLOAD_REMAINDER_LENGTH + 5
        {
            return Err(Error::Parse("invalid filterload message body length"));
        }

        let filter_bytes = read_limited_bytes(&mut reader, MAX_FILTER_LENGTH as u64)?;

        Ok(Message::FilterLoad {
            filter: Filter(filter_bytes),
            hash_functions_count: reader.read_u32::<LittleEndian>()?,
            tweak: Tweak(reader.read_u32::<LittleEndian>()?),
            flags: reader.read_u8()?,
        })
    }

    fn read_filteradd<R: Read>(&self, mut reader: R) -> Result<Message, Error> {
        // Filter elements are capped at 520 bytes.
        Ok(Message::FilterAdd {
            data: read_limited_bytes(&mut reader, 520)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::prelude::*;
    use tokio::runtime::Runtime;

    fn roundtrip(message: Message) -> Message {
        let rt = Runtime::new().unwrap();

        use tokio_util::codec::{FramedRead, FramedWrite};
        let bytes = rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(&mut bytes, Codec::builder().finish());
                fw.send(message.clone())
                    .await
                    .expect("message should be serialized");
            }
            bytes
        });

        rt.block_on(async {
            let mut fr = FramedRead::new(Cursor::new(&bytes), Codec::builder().finish());
            fr.next()
                .await
                .expect("a next message should be available")
                .expect("that message should deserialize")
        })
    }

    #[test]
    fn version_message_round_trip() {
        kestrel_test::init();
        use std::net::{IpAddr, Ipv4Addr, SocketAddr};
        let services = PeerServices::NODE_NETWORK;

        let v = Message::Version(VersionMessage::new(
            crate::constants::CURRENT_VERSION,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 6)), 8333),
            services,
            services,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), 8333),
            Nonce(0x9082_4908_8927_9238),
            "Beaver".to_owned(),
            block::Height(540_000),
            true,
        ));

        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn small_messages_round_trip() {
        kestrel_test::init();

        for message in vec![
            Message::Verack,
            Message::GetAddr,
            Message::Mempool,
            Message::SendHeaders,
            Message::FilterClear,
            Message::Ping(Nonce(1)),
            Message::Pong(Nonce(2)),
            Message::FeeFilter(1000),
            Message::Inv(vec![InventoryHash::Tx(
                kestrel_chain::transaction::Hash([9; 32]),
            )]),
            Message::GetData(vec![InventoryHash::FilteredBlock(block::Hash([7; 32]))]),
            Message::NotFound(vec![InventoryHash::Block(block::Hash([8; 32]))]),
            Message::FilterAdd {
                data: vec![1, 2, 3],
            },
        ] {
            assert_eq!(roundtrip(message.clone()), message);
        }
    }

    #[test]
    fn filterload_message_round_trip() {
        kestrel_test::init();

        let v = Message::FilterLoad {
            filter: Filter(vec![0xAA; 512]),
            hash_functions_count: 11,
            tweak: Tweak(0x1234_5678),
            flags: 1,
        };

        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn getheaders_round_trip() {
        kestrel_test::init();

        let v = Message::GetHeaders(GetHeaders {
            block_locator_hashes: vec![block::Hash([1; 32]), block::Hash([2; 32])],
            stop_hash: None,
        });
        assert_eq!(roundtrip(v.clone()), v);

        let v = Message::GetBlocks(GetBlocks {
            block_locator_hashes: vec![block::Hash([3; 32])],
            stop_hash: Some(block::Hash([4; 32])),
        });
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        kestrel_test::init();

        let rt = Runtime::new().unwrap();
        use tokio_util::codec::{FramedRead, FramedWrite};

        let mut bytes = rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(&mut bytes, Codec::builder().finish());
                fw.send(Message::Ping(Nonce(77)))
                    .await
                    .expect("message should be serialized");
            }
            bytes
        });

        // Flip one payload byte: the checksum no longer matches.
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        rt.block_on(async {
            let mut fr = FramedRead::new(Cursor::new(&bytes), Codec::builder().finish());
            fr.next()
                .await
                .expect("a next message should be available")
                .expect_err("corrupted message should not decode")
        });
    }

    #[test]
    fn wrong_magic_rejected() {
        kestrel_test::init();

        let rt = Runtime::new().unwrap();
        use tokio_util::codec::{FramedRead, FramedWrite};

        let bytes = rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(
                    &mut bytes,
                    Codec::builder()
                        .for_network(Network::Testnet)
                        .finish(),
                );
                fw.send(Message::Ping(Nonce(77)))
                    .await
                    .expect("message should be serialized");
            }
            bytes
        });

        rt.block_on(async {
            let mut fr = FramedRead::new(Cursor::new(&bytes), Codec::builder().finish());
            fr.next()
                .await
                .expect("a next message should be available")
                .expect_err("mainnet codec should reject testnet magic")
        });
    }

    #[test]
    fn oversized_payload_rejected() {
        kestrel_test::init();

        let rt = Runtime::new().unwrap();
        use tokio_util::codec::{FramedRead, FramedWrite};

        let msg = Message::FilterAdd {
            data: vec![0xCC; 512],
        };
        let bytes = rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(&mut bytes, Codec::builder().finish());
                fw.send(msg).await.expect("message should be serialized");
            }
            bytes
        });

        rt.block_on(async {
            let mut fr = FramedRead::new(
                Cursor::new(&bytes),
                Codec::builder().with_max_body_len(100).finish(),
            );
            fr.next()
                .await
                .expect("a next message should be available")
                .expect_err("payload above the codec limit should not decode")
        });
    }
}
