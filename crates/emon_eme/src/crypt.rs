//! Keyed byte stream transform used for the index, script headers and bitmap headers.
//!
//! A [`Schedule`] is the 40 byte key stored in front of the index. It holds eight opcodes
//! followed by eight little-endian stage keys, stage `i` using `schedule[i]` and the key at
//! `8 + 4 * i`.
//!
//! | Opcode | Primitive                  | Encrypt                          | Decrypt                          |
//! |--------|----------------------------|----------------------------------|----------------------------------|
//! | 1      | Word XOR                   | `word ^= key`                    | `word ^= key`                    |
//! | 2      | Chained XOR                | feed forward the produced word   | feed forward the word just read  |
//! | 4      | Bit permutation per word   | gather through an inverse table  | scatter bit `i` to `(i+1)*key`   |
//! | 8      | Byte permutation of buffer | gather `out[j] = in[x(j+1)]`     | scatter `out[x(j+1)] = in[j]`    |
//!
//! Encryption runs the stages in order, decryption runs them backwards. Word primitives only
//! touch `len / 4` words so trailing bytes are left as they are, while the byte permutation
//! spans the whole buffer.
//!
//! The permutations are only reversible when the stage key is coprime with 32 (bits) or with
//! the buffer length (bytes). Other keys lose data exactly like the engine does.

use std::fmt;

use rand::Rng;

use crate::error::{FormatError, Result};

/// Size of a serialized [`Schedule`]
pub const SCHEDULE_SIZE: usize = 40;

const STAGES: usize = 8;

/// A single primitive of the pipeline
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    /// XOR every word with the key
    Xor,
    /// XOR every word with the previous ciphertext word, seeded by the key
    ChainedXor,
    /// Permute the bits of every word
    BitPermute,
    /// Permute the bytes of the whole buffer
    BytePermute,
}

impl Operation {
    /// Every operation, in opcode order
    pub const ALL: [Operation; 4] = [
        Operation::Xor,
        Operation::ChainedXor,
        Operation::BitPermute,
        Operation::BytePermute,
    ];

    /// Map an opcode to its operation, unknown opcodes are skipped by the pipeline
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            1 => Some(Operation::Xor),
            2 => Some(Operation::ChainedXor),
            4 => Some(Operation::BitPermute),
            8 => Some(Operation::BytePermute),
            _ => None,
        }
    }

    /// The opcode stored in a schedule
    pub fn opcode(self) -> u8 {
        match self {
            Operation::Xor => 1,
            Operation::ChainedXor => 2,
            Operation::BitPermute => 4,
            Operation::BytePermute => 8,
        }
    }
}

/// The 40 byte cipher key of an archive
///
/// ```
/// use emon_eme::crypt::Schedule;
///
/// let mut key = [0u8; 40];
/// key[0] = 1; // XOR in stage 0
/// key[8..12].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
/// let schedule = Schedule::from_bytes(key);
///
/// let mut data = *b"12345678";
/// schedule.encrypt(&mut data);
/// assert_ne!(&data, b"12345678");
/// schedule.decrypt(&mut data);
/// assert_eq!(&data, b"12345678");
/// ```
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Schedule([u8; SCHEDULE_SIZE]);

impl Default for Schedule {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schedule({})", self.to_hex())
    }
}

impl Schedule {
    /// The all-zero schedule, which leaves data untouched
    pub const fn zeroed() -> Self {
        Schedule([0u8; SCHEDULE_SIZE])
    }

    /// Wrap raw key bytes
    pub const fn from_bytes(bytes: [u8; SCHEDULE_SIZE]) -> Self {
        Schedule(bytes)
    }

    /// Copy a key out of a slice which must be exactly 40 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; SCHEDULE_SIZE] = bytes
            .try_into()
            .map_err(|_| FormatError::InvalidKeyLength(bytes.len()))?;
        Ok(Schedule(key))
    }

    /// Parse a hex encoded key, as stored in the metadata sidecar
    pub fn from_hex(hex: &str) -> Result<Self> {
        Self::from_slice(&hex::decode(hex.trim())?)
    }

    /// Upper case hex encoding of the key
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; SCHEDULE_SIZE] {
        &self.0
    }

    /// Whether every byte of the key is zero
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Opcode and key of a stage
    pub fn stage(&self, index: usize) -> (u8, u32) {
        let start = STAGES + 4 * index;
        let key = u32::from_le_bytes([
            self.0[start],
            self.0[start + 1],
            self.0[start + 2],
            self.0[start + 3],
        ]);
        (self.0[index], key)
    }

    /// Create a random schedule
    ///
    /// Stage keys are kept coprime with 2 and 3, which keeps both permutations reversible for
    /// every buffer size the archive encrypts (4, 12, 32 and 96 bytes).
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut key = [0u8; SCHEDULE_SIZE];
        for stage in 0..STAGES {
            key[stage] = Operation::ALL[rng.gen_range(0..Operation::ALL.len())].opcode();

            let mut value: u32 = rng.gen();
            while value % 2 == 0 || value % 3 == 0 {
                value = rng.gen();
            }
            key[STAGES + 4 * stage..STAGES + 4 * stage + 4].copy_from_slice(&value.to_le_bytes());
        }
        Schedule(key)
    }

    /// Run the pipeline forwards over `buffer`
    pub fn encrypt(&self, buffer: &mut [u8]) {
        for stage in 0..STAGES {
            let (opcode, key) = self.stage(stage);
            match Operation::from_opcode(opcode) {
                Some(Operation::Xor) => xor_words(buffer, key),
                Some(Operation::ChainedXor) => chain_encrypt(buffer, key),
                Some(Operation::BitPermute) => {
                    let table = inverse_bit_table(key);
                    map_words(buffer, |word| gather_bits(word, &table));
                }
                Some(Operation::BytePermute) => gather_bytes(buffer, key),
                None => {}
            }
        }
    }

    /// Run the pipeline backwards over `buffer`
    pub fn decrypt(&self, buffer: &mut [u8]) {
        for stage in (0..STAGES).rev() {
            let (opcode, key) = self.stage(stage);
            match Operation::from_opcode(opcode) {
                Some(Operation::Xor) => xor_words(buffer, key),
                Some(Operation::ChainedXor) => chain_decrypt(buffer, key),
                Some(Operation::BitPermute) => map_words(buffer, |word| scatter_bits(word, key)),
                Some(Operation::BytePermute) => scatter_bytes(buffer, key),
                None => {}
            }
        }
    }
}

fn map_words(buffer: &mut [u8], mut f: impl FnMut(u32) -> u32) {
    for chunk in buffer.chunks_exact_mut(4) {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&f(word).to_le_bytes());
    }
}

fn xor_words(buffer: &mut [u8], key: u32) {
    map_words(buffer, |word| word ^ key);
}

fn chain_encrypt(buffer: &mut [u8], key: u32) {
    let mut prev = key;
    map_words(buffer, |word| {
        prev ^= word;
        prev
    });
}

fn chain_decrypt(buffer: &mut [u8], key: u32) {
    let mut prev = key;
    map_words(buffer, |word| {
        let plain = word ^ prev;
        prev = word;
        plain
    });
}

/// Bit `i` of the input lands on bit `(i + 1) * key mod 32`, colliding bits are OR'd together
pub(crate) fn scatter_bits(word: u32, key: u32) -> u32 {
    let mut shift = 0u32;
    let mut result = 0u32;
    for i in 0..32 {
        shift = shift.wrapping_add(key);
        result |= ((word >> i) & 1) << (shift & 31);
    }
    result
}

fn inverse_bit_table(key: u32) -> [u32; 32] {
    let mut inverse = [0u32; 32];
    let mut shift = 0u32;
    for i in 0..32 {
        shift = shift.wrapping_add(key);
        inverse[(shift & 31) as usize] = i;
    }
    inverse
}

pub(crate) fn gather_bits(word: u32, inverse: &[u32; 32]) -> u32 {
    inverse
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, target)| acc | (((word >> i) & 1) << target))
}

fn permutation(length: usize, key: u32) -> impl Iterator<Item = usize> {
    let step = u64::from(key) % length as u64;
    let mut x = 0u64;
    (0..length).map(move |_| {
        x = (x + step) % length as u64;
        x as usize
    })
}

fn gather_bytes(buffer: &mut [u8], key: u32) {
    if buffer.is_empty() {
        return;
    }
    let table: Vec<u8> = permutation(buffer.len(), key).map(|x| buffer[x]).collect();
    buffer.copy_from_slice(&table);
}

fn scatter_bytes(buffer: &mut [u8], key: u32) {
    if buffer.is_empty() {
        return;
    }
    let mut table = vec![0u8; buffer.len()];
    for (byte, x) in buffer.iter().zip(permutation(buffer.len(), key)) {
        table[x] = *byte;
    }
    buffer.copy_from_slice(&table);
}
