use crate::core::Sample;
use crate::hal::types::SLOT_SIZE;
use anyhow::Result;

/// Widen a 24-bit two's-complement ADC code held in the low bits of a 32-bit slot.
///
/// The top byte of the slot is ignored.
pub fn sign_extend_24(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

/// Raw 32-bit word of `local_channel` within one scan (little-endian)
pub fn read_slot(scan: &[u8], local_channel: usize) -> u32 {
    let offset = local_channel * SLOT_SIZE;
    let mut raw = [0u8; SLOT_SIZE];
    raw.copy_from_slice(&scan[offset..offset + SLOT_SIZE]);
    u32::from_le_bytes(raw)
}

/// Split `scans` interleaved scans into one code stream per requested local channel.
///
/// Output order follows `channels`.
pub fn demux_block(bytes: &[u8], step: usize, scans: usize, channels: &[usize]) -> Result<Vec<Vec<i32>>> {
    let mut codes: Vec<Vec<i32>> = channels.iter().map(|_| Vec::with_capacity(scans)).collect();

    let Some(&highest) = channels.iter().max() else {
        return Ok(codes);
    };
    if scans == 0 {
        return Ok(codes);
    }

    let scan_span = (highest + 1) * SLOT_SIZE;
    if step < scan_span {
        anyhow::bail!("Scan step {} too small for channel {}", step, highest);
    }
    let required = (scans - 1) * step + scan_span;
    if bytes.len() < required {
        anyhow::bail!(
            "Block holds {} bytes, {} scans need {}",
            bytes.len(),
            scans,
            required
        );
    }

    for i in 0..scans {
        let scan = &bytes[i * step..];
        for (k, &ch) in channels.iter().enumerate() {
            codes[k].push(sign_extend_24(read_slot(scan, ch)));
        }
    }

    Ok(codes)
}

/// Convert codes to physical samples on a gap-free timeline starting at `start_time`
pub fn codes_to_samples(codes: &[i32], scale: f64, start_time: f64, sample_rate: f64) -> Vec<Sample> {
    codes
        .iter()
        .enumerate()
        .map(|(i, &code)| Sample::new(start_time + i as f64 / sample_rate, code as f64 * scale))
        .collect()
}

/// Pack a 24-bit code into a 32-bit slot, filling the unused top byte with `pad`
pub fn pack_code_24(code: i32, pad: u8) -> u32 {
    (code as u32 & 0x00FF_FFFF) | (u32::from(pad) << 24)
}
