//! Message command names: 12 bytes of zero-padded ASCII on the wire.

use kestrel_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A recognized message type.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Addr,
    Block,
    FeeFilter,
    FilterAdd,
    FilterClear,
    FilterLoad,
    GetAddr,
    GetBlocks,
    GetData,
    GetHeaders,
    Headers,
    Inv,
    MemPool,
    MerkleBlock,
    NotFound,
    Ping,
    Pong,
    Reject,
    SendHeaders,
    Tx,
    Verack,
    Version,
}

impl Command {
    /// The wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Addr => "addr",
            Command::Block => "block",
            Command::FeeFilter => "feefilter",
            Command::FilterAdd => "filteradd",
            Command::FilterClear => "filterclear",
            Command::FilterLoad => "filterload",
            Command::GetAddr => "getaddr",
            Command::GetBlocks => "getblocks",
            Command::GetData => "getdata",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::Inv => "inv",
            Command::MemPool => "mempool",
            Command::MerkleBlock => "merkleblock",
            Command::NotFound => "notfound",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Reject => "reject",
            Command::SendHeaders => "sendheaders",
            Command::Tx => "tx",
            Command::Verack => "verack",
            Command::Version => "version",
        }
    }

    /// The zero-padded 12-byte form.
    pub fn bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        let name = self.name().as_bytes();
        bytes[..name.len()].copy_from_slice(name);
        bytes
    }

    fn from_bytes(bytes: &[u8; 12]) -> Result<Command, SerializationError> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(12);
        // Trailing padding must be all zeroes.
        if bytes[end..].iter().any(|&b| b != 0) {
            return Err(SerializationError::Parse("non-zero command padding"));
        }
        match &bytes[..end] {
            b"addr" => Ok(Command::Addr),
            b"block" => Ok(Command::Block),
            b"feefilter" => Ok(Command::FeeFilter),
            b"filteradd" => Ok(Command::FilterAdd),
            b"filterclear" => Ok(Command::FilterClear),
            b"filterload" => Ok(Command::FilterLoad),
            b"getaddr" => Ok(Command::GetAddr),
            b"getblocks" => Ok(Command::GetBlocks),
            b"getdata" => Ok(Command::GetData),
            b"getheaders" => Ok(Command::GetHeaders),
            b"headers" => Ok(Command::Headers),
            b"inv" => Ok(Command::Inv),
            b"mempool" => Ok(Command::MemPool),
            b"merkleblock" => Ok(Command::MerkleBlock),
            b"notfound" => Ok(Command::NotFound),
            b"ping" => Ok(Command::Ping),
            b"pong" => Ok(Command::Pong),
            b"reject" => Ok(Command::Reject),
            b"sendheaders" => Ok(Command::SendHeaders),
            b"tx" => Ok(Command::Tx),
            b"verack" => Ok(Command::Verack),
            b"version" => Ok(Command::Version),
            _ => Err(SerializationError::Parse("unknown command")),
        }
    }
}

impl BitcoinSerialize for Command {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.bytes().bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Command {
    fn bitcoin_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        let bytes = <[u8; 12]>::bitcoin_deserialize(reader)?;
        Command::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_commands() {
        let all = [
            Command::Addr,
            Command::Block,
            Command::FeeFilter,
            Command::FilterAdd,
            Command::FilterClear,
            Command::FilterLoad,
            Command::GetAddr,
            Command::GetBlocks,
            Command::GetData,
            Command::GetHeaders,
            Command::Headers,
            Command::Inv,
            Command::MemPool,
            Command::MerkleBlock,
            Command::NotFound,
            Command::Ping,
            Command::Pong,
            Command::Reject,
            Command::SendHeaders,
            Command::Tx,
            Command::Verack,
            Command::Version,
        ];
        for command in all.iter() {
            let bytes = command.bitcoin_serialize_to_vec().unwrap();
            assert_eq!(bytes.len(), 12);
            assert_eq!(&Command::bitcoin_deserialize(&bytes[..]).unwrap(), command);
        }
    }

    #[test]
    fn unknown_and_padding_rejected() {
        assert!(Command::bitcoin_deserialize(&b"nonsense\0\0\0\0"[..]).is_err());
        assert!(Command::bitcoin_deserialize(&b"ping\0\0\0\0\0\0\0x"[..]).is_err());
    }
}
