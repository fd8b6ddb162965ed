//! LZSS compression used by scripts and bitmap pixel planes.
//!
//! The stream is a sequence of groups, each starting with a flag byte read from the least
//! significant bit up. A set bit means a literal byte follows, a cleared bit means a two byte
//! back-reference into a 4096 byte ring buffer:
//!
//! | Byte | Bits 7-4             | Bits 3-0             |
//! |------|----------------------|----------------------|
//! | 0    | position bits 7-4    | position bits 3-0    |
//! | 1    | position bits 11-8   | length - 3           |
//!
//! The ring buffer starts zero filled. Entries carry its size and initial write cursor in their
//! index record, the defaults being a 4096 byte ring with the cursor at `0xFEE`.

use tracing::instrument;

use crate::error::{CompressionError, Result};

/// Default size of the ring buffer
pub const FRAME_SIZE: usize = 0x1000;

/// Longest match a reference can encode
pub const MAX_MATCH: usize = 18;

/// Shortest match worth encoding as a reference
pub const MIN_MATCH: usize = 3;

/// Default initial write cursor of the ring buffer
pub const FRAME_START: usize = FRAME_SIZE - MAX_MATCH;

const MAX_CHAIN: usize = 256;
const HASH_BITS: u32 = 13;
const NIL: usize = usize::MAX;

/// Ring buffer parameters of an LZSS stream
///
/// The size is always between 1 and 4096, see [`Frame::from_record`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    size: usize,
    init_pos: usize,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            size: FRAME_SIZE,
            init_pos: FRAME_START,
        }
    }
}

impl Frame {
    /// Frame described by an index record
    ///
    /// Sizes of zero or beyond what a reference can address fall back to the default frame.
    pub fn from_record(size: u16, init_pos: u16) -> Self {
        let size = usize::from(size);
        if size == 0 || size > FRAME_SIZE {
            return Self::default();
        }
        Self {
            size,
            init_pos: usize::from(init_pos) % size,
        }
    }

    /// Size of the ring buffer
    pub fn size(&self) -> usize {
        self.size
    }

    /// Position of the first byte written to the ring buffer
    pub fn init_pos(&self) -> usize {
        self.init_pos
    }
}

fn hash(data: &[u8]) -> usize {
    let value = u32::from(data[0]) << 16 | u32::from(data[1]) << 8 | u32::from(data[2]);
    (value.wrapping_mul(0x9E37_79B1) >> (32 - HASH_BITS)) as usize
}

/// Compress `data` into an LZSS stream using the default frame
pub fn compress(data: &[u8]) -> Vec<u8> {
    compress_with(data, Frame::default())
}

/// Compress `data` into an LZSS stream for the given frame
#[instrument(skip(data), fields(len = data.len()))]
pub fn compress_with(data: &[u8], frame: Frame) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 8 + 1);
    let mut head = vec![NIL; 1 << HASH_BITS];
    let mut prev = vec![NIL; data.len()];
    let max_distance = frame.size.saturating_sub(MAX_MATCH);

    let mut group = [0u8; 1 + 8 * 2];
    let mut group_len = 1;
    let mut bit = 0;
    let mut cursor = 0;

    while cursor < data.len() {
        let (match_pos, match_len) = longest_match(data, cursor, max_distance, &head, &prev);

        if match_len >= MIN_MATCH {
            let window = (frame.init_pos + match_pos) % frame.size;
            group[group_len] = (window & 0xFF) as u8;
            group[group_len + 1] = (((window >> 4) & 0xF0) | (match_len - MIN_MATCH)) as u8;
            group_len += 2;
        } else {
            group[0] |= 1 << bit;
            group[group_len] = data[cursor];
            group_len += 1;
        }

        let step = match_len.max(1);
        for position in cursor..cursor + step {
            if position + MIN_MATCH <= data.len() {
                let bucket = hash(&data[position..]);
                prev[position] = head[bucket];
                head[bucket] = position;
            }
        }
        cursor += step;

        bit += 1;
        if bit == 8 {
            output.extend_from_slice(&group[..group_len]);
            group = [0u8; 1 + 8 * 2];
            group_len = 1;
            bit = 0;
        }
    }

    if group_len > 1 {
        output.extend_from_slice(&group[..group_len]);
    }

    output
}

fn longest_match(
    data: &[u8],
    cursor: usize,
    max_distance: usize,
    head: &[usize],
    prev: &[usize],
) -> (usize, usize) {
    let limit = MAX_MATCH.min(data.len() - cursor);
    if limit < MIN_MATCH {
        return (0, 0);
    }

    let mut best = (0, 0);
    let mut candidate = head[hash(&data[cursor..])];
    let mut chain = 0;

    while candidate != NIL && cursor - candidate <= max_distance && chain < MAX_CHAIN {
        let length = data[candidate..]
            .iter()
            .zip(&data[cursor..cursor + limit])
            .take_while(|(a, b)| a == b)
            .count();

        if length > best.1 {
            best = (candidate, length);
            if length == limit {
                break;
            }
        }

        candidate = prev[candidate];
        chain += 1;
    }

    best
}

/// Expand an LZSS stream using the default frame
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    decompress_with(data, Frame::default())
}

/// Expand an LZSS stream
///
/// Empty input yields empty output. A stream that ends in the middle of a literal or between
/// groups is accepted, one that cuts a reference in half is not.
#[instrument(skip(data), fields(len = data.len()), err)]
pub fn decompress_with(data: &[u8], frame: Frame) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut window = vec![0u8; frame.size];
    let mut cursor = frame.init_pos;
    let mut flags: u32 = 0;
    let mut position = 0;

    while position < data.len() {
        flags >>= 1;
        if flags & 0x100 == 0 {
            flags = u32::from(data[position]) | 0xFF00;
            position += 1;
            if position == data.len() {
                break;
            }
        }

        if flags & 1 == 1 {
            let byte = data[position];
            position += 1;
            output.push(byte);
            window[cursor] = byte;
            cursor = (cursor + 1) % frame.size;
        } else {
            let (Some(&low), Some(&high)) = (data.get(position), data.get(position + 1)) else {
                return Err(CompressionError::TruncatedReference(position).into());
            };
            position += 2;

            let start = usize::from(low) | (usize::from(high & 0xF0) << 4);
            let length = usize::from(high & 0x0F) + MIN_MATCH;
            for k in 0..length {
                let byte = window[(start + k) % frame.size];
                output.push(byte);
                window[cursor] = byte;
                cursor = (cursor + 1) % frame.size;
            }
        }
    }

    Ok(output)
}
