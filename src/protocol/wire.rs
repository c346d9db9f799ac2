use crate::core::{ChannelId, Sample};
use std::ops::RangeInclusive;

/// "DATA" read as a little-endian u32
pub const MAGIC: u32 = 0x4441_5441;

/// Packed header: magic, channel, point count (u32 each), sample rate, start time (f64 each)
pub const HEADER_SIZE: usize = 28;

/// Channels a remote producer may address over TCP
pub const TCP_CHANNELS: RangeInclusive<u32> = 1..=2;

const AMPLITUDE_SIZE: usize = std::mem::size_of::<f64>();

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketHeader {
    pub magic: u32,
    pub channel: u32,
    pub point_count: u32,
    pub sample_rate: f64,
    pub start_time: f64,
}

impl PacketHeader {
    pub fn new(channel: u32, point_count: u32, sample_rate: f64, start_time: f64) -> Self {
        Self {
            magic: MAGIC,
            channel,
            point_count,
            sample_rate,
            start_time,
        }
    }

    /// Interpret the first `HEADER_SIZE` bytes; `None` if fewer are available
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }

        Some(Self {
            magic: read_u32(bytes, 0),
            channel: read_u32(bytes, 4),
            point_count: read_u32(bytes, 8),
            sample_rate: read_f64(bytes, 12),
            start_time: read_f64(bytes, 20),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.channel.to_le_bytes());
        out.extend_from_slice(&self.point_count.to_le_bytes());
        out.extend_from_slice(&self.sample_rate.to_le_bytes());
        out.extend_from_slice(&self.start_time.to_le_bytes());
    }

    /// Total bytes of header plus amplitude payload
    pub fn packet_size(&self) -> Option<usize> {
        (self.point_count as usize)
            .checked_mul(AMPLITUDE_SIZE)?
            .checked_add(HEADER_SIZE)
    }
}

/// A packet that passed validation, with timestamps synthesised from its header
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub channel: ChannelId,
    pub sample_rate: f64,
    pub start_time: f64,
    pub samples: Vec<Sample>,
}

/// Serialise one packet the way a remote producer sends it
pub fn encode_packet(channel: u32, sample_rate: f64, start_time: f64, amplitudes: &[f64]) -> Vec<u8> {
    let header = PacketHeader::new(channel, amplitudes.len() as u32, sample_rate, start_time);
    let mut out = Vec::with_capacity(HEADER_SIZE + amplitudes.len() * AMPLITUDE_SIZE);
    header.write_to(&mut out);
    for amplitude in amplitudes {
        out.extend_from_slice(&amplitude.to_le_bytes());
    }
    out
}

/// Amplitude `index` of a packet body
pub(crate) fn read_amplitude(body: &[u8], index: usize) -> f64 {
    read_f64(body, index * AMPLITUDE_SIZE)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(raw)
}
