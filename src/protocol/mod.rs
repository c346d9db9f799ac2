pub mod parser;
pub mod wire;

pub use parser::{ParserStats, WireParser};
pub use wire::{encode_packet, DecodedPacket, PacketHeader, HEADER_SIZE, MAGIC, TCP_CHANNELS};
