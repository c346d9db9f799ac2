use super::wire::{read_amplitude, DecodedPacket, PacketHeader, HEADER_SIZE, MAGIC, TCP_CHANNELS};
use crate::core::Sample;
use log::{debug, warn};

/// Counters describing what the parser did with the bytes it was fed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParserStats {
    pub packets_decoded: u64,
    pub packets_dropped: u64,
    pub bytes_discarded: u64,
    pub resyncs: u64,
}

/// Stream framer for the TCP sample protocol.
///
/// Bytes are accumulated across calls to [`WireParser::feed`]. Whenever the head
/// of the accumulator is not a packet header the parser scans forward for the
/// next magic value and discards everything before it. Incomplete packets stay
/// buffered until the rest of their payload arrives.
///
/// When no magic is found the accumulator is discarded except for a trailing run
/// of bytes that could still be the start of a magic value, so a header split
/// across two reads is not lost.
#[derive(Debug, Default)]
pub struct WireParser {
    pending: Vec<u8>,
    stats: ParserStats,
}

impl WireParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every packet that became complete
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodedPacket> {
        self.pending.extend_from_slice(bytes);
        self.drain_packets()
    }

    /// Bytes held back waiting for the rest of a packet
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Drop any buffered partial packet (used when the connection goes away)
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn drain_packets(&mut self) -> Vec<DecodedPacket> {
        let mut packets = Vec::new();

        while let Some(header) = PacketHeader::decode(&self.pending) {
            if header.magic != MAGIC {
                warn!("Invalid packet magic {:#010x}, resynchronising", header.magic);
                self.resync();
                continue;
            }

            let Some(packet_size) = header.packet_size() else {
                warn!("Packet of {} points cannot be addressed, skipping header", header.point_count);
                self.discard(4);
                continue;
            };

            if self.pending.len() < packet_size {
                // Wait for the rest of the payload
                break;
            }

            let decoded = decode_body(&header, &self.pending[HEADER_SIZE..packet_size]);
            self.pending.drain(..packet_size);

            match decoded {
                Some(packet) => {
                    debug!(
                        "Decoded packet - channel: {} points: {} start: {}",
                        packet.channel,
                        packet.samples.len(),
                        packet.start_time
                    );
                    self.stats.packets_decoded += 1;
                    packets.push(packet);
                }
                None => self.stats.packets_dropped += 1,
            }
        }

        packets
    }

    fn resync(&mut self) {
        self.stats.resyncs += 1;
        let magic = MAGIC.to_le_bytes();

        if let Some(pos) = self.pending.windows(4).skip(1).position(|w| w == magic) {
            self.discard(pos + 1);
            return;
        }

        let keep = partial_magic_suffix(&self.pending, &magic);
        let drop = self.pending.len() - keep;
        self.discard(drop);
    }

    fn discard(&mut self, count: usize) {
        self.pending.drain(..count);
        self.stats.bytes_discarded += count as u64;
    }
}

/// Length of the longest tail of `bytes` that is a proper prefix of `magic`
fn partial_magic_suffix(bytes: &[u8], magic: &[u8; 4]) -> usize {
    (1..magic.len())
        .rev()
        .find(|&len| bytes.len() >= len && bytes[bytes.len() - len..] == magic[..len])
        .unwrap_or(0)
}

fn decode_body(header: &PacketHeader, body: &[u8]) -> Option<DecodedPacket> {
    if !TCP_CHANNELS.contains(&header.channel) {
        warn!("Dropped packet for unsupported channel {}", header.channel);
        return None;
    }
    if !(header.sample_rate.is_finite() && header.sample_rate > 0.0) {
        warn!("Dropped packet with sample rate {}", header.sample_rate);
        return None;
    }

    let samples = (0..header.point_count as usize)
        .map(|i| {
            Sample::new(
                header.start_time + i as f64 / header.sample_rate,
                read_amplitude(body, i),
            )
        })
        .collect();

    Some(DecodedPacket {
        channel: header.channel as usize,
        sample_rate: header.sample_rate,
        start_time: header.start_time,
        samples,
    })
}
