use rand::Rng;
use rand_core::RngCore;
use std::fmt::Debug;

/// Maximum length of a chunk inserted, replaced or deleted by the havoc-style operators.
const MAX_CHUNK_LEN: usize = 10;
/// Bound of the signed delta applied by [`ArithmeticBytes`].
const ARITH_MAX: i8 = 35;
/// Probability that a havoc operator copies a slice of the input instead of synthesizing bytes.
const HAVOC_SELF_SPLICE_PROBABILITY: f64 = 0.75;
/// Bit and byte run widths the bit-flip, arithmetic and interesting-value operators choose from.
const WIDTHS: [usize; 3] = [1, 2, 4];

const INTERESTING_8: [u8; 9] = [0, 1, 16, 32, 64, 100, 127, 128, 255];
const INTERESTING_16: [u16; 7] = [0, 256, 512, 1024, 0x7FFF, 0x8000, 0xFFFF];
const INTERESTING_32: [u32; 4] = [0x0000_0000, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF];

/// A `Mutator` transforms an input into a new, potentially modified input.
///
/// Mutation never fails: every strategy must cope with empty or short inputs by
/// leaving them unchanged or applying a transform that is safe on them.
pub trait Mutator {
    fn mutate(&mut self, input: &[u8], rng: &mut dyn RngCore) -> Vec<u8>;
}

/// A single, independent byte-level mutation strategy.
pub trait MutationOperator: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Applies the operator once, in place. Must not panic on any input, including empty.
    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore);
}

fn random_printable(rng: &mut dyn RngCore) -> u8 {
    rng.random_range(32u8..=127u8)
}

fn random_printable_run(rng: &mut dyn RngCore, len: usize) -> Vec<u8> {
    (0..len).map(|_| random_printable(rng)).collect()
}

fn random_width(rng: &mut dyn RngCore) -> usize {
    WIDTHS[rng.random_range(0..WIDTHS.len())]
}

/// XORs `n` consecutive bits starting at `bit_pos`.
///
/// Bit `p` is bit `p % 8` (least significant first) of byte `p / 8`. Bits past the
/// end of `data` are ignored.
pub fn flip_bits(data: &mut [u8], bit_pos: usize, n: usize) {
    for current_bit in bit_pos..bit_pos + n {
        if let Some(byte) = data.get_mut(current_bit / 8) {
            *byte ^= 1 << (current_bit % 8);
        }
    }
}

/// Inserts one random printable byte (32..=127) anywhere, including at the end.
#[derive(Debug, Default, Clone, Copy)]
pub struct InsertRandomByte;

impl MutationOperator for InsertRandomByte {
    fn name(&self) -> &'static str {
        "insert_random_byte"
    }

    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore) {
        let pos = rng.random_range(0..=data.len());
        let byte = random_printable(rng);
        data.insert(pos, byte);
    }
}

/// Flips a run of 1, 2 or 4 bits that lies entirely inside the buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlipRandomBits;

impl MutationOperator for FlipRandomBits {
    fn name(&self) -> &'static str {
        "flip_random_bits"
    }

    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore) {
        if data.is_empty() {
            return;
        }
        let n = random_width(rng);
        let total_bits = data.len() * 8;
        if total_bits < n {
            return;
        }
        let bit_pos = rng.random_range(0..=total_bits - n);
        flip_bits(data, bit_pos, n);
    }
}

/// Adds a random delta in `[-35, 35]` to each of 1, 2 or 4 consecutive bytes, wrapping mod 256.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArithmeticBytes;

impl MutationOperator for ArithmeticBytes {
    fn name(&self) -> &'static str {
        "arithmetic_bytes"
    }

    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore) {
        if data.is_empty() {
            return;
        }
        let n = random_width(rng);
        if data.len() < n {
            return;
        }
        let pos = rng.random_range(0..=data.len() - n);
        for byte in &mut data[pos..pos + n] {
            let delta = rng.random_range(-ARITH_MAX..=ARITH_MAX);
            *byte = byte.wrapping_add_signed(delta);
        }
    }
}

/// Overwrites 1, 2 or 4 bytes with a boundary value of that width, little endian.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterestingBytes;

impl MutationOperator for InterestingBytes {
    fn name(&self) -> &'static str {
        "interesting_bytes"
    }

    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore) {
        if data.is_empty() {
            return;
        }
        let n = random_width(rng);
        if data.len() < n {
            return;
        }
        let pos = rng.random_range(0..=data.len() - n);
        match n {
            1 => data[pos] = INTERESTING_8[rng.random_range(0..INTERESTING_8.len())],
            2 => {
                let value = INTERESTING_16[rng.random_range(0..INTERESTING_16.len())];
                data[pos..pos + 2].copy_from_slice(&value.to_le_bytes());
            }
            _ => {
                let value = INTERESTING_32[rng.random_range(0..INTERESTING_32.len())];
                data[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
    }
}

/// AFL-style havoc insert: splices in 1..=10 bytes without deleting anything.
///
/// Three times out of four (on non-empty input) the segment is copied from elsewhere
/// in the same input; otherwise it is fresh printable bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct HavocInsert;

impl MutationOperator for HavocInsert {
    fn name(&self) -> &'static str {
        "havoc_insert"
    }

    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore) {
        let pos = rng.random_range(0..=data.len());
        let insert_len = rng.random_range(1..=MAX_CHUNK_LEN);
        let snippet = if rng.random_bool(HAVOC_SELF_SPLICE_PROBABILITY) && !data.is_empty() {
            let start = rng.random_range(0..data.len());
            let end = data.len().min(start + insert_len);
            data[start..end].to_vec()
        } else {
            random_printable_run(rng, insert_len)
        };
        data.splice(pos..pos, snippet);
    }
}

/// AFL-style havoc replace: overwrites 1..=min(10, len) bytes in place.
///
/// Three times out of four (when the input is longer than the span) the new bytes are
/// a same-length slice of the input itself; otherwise fresh printable bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct HavocReplace;

impl MutationOperator for HavocReplace {
    fn name(&self) -> &'static str {
        "havoc_replace"
    }

    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore) {
        if data.is_empty() {
            return;
        }
        let replace_len = rng.random_range(1..=MAX_CHUNK_LEN.min(data.len()));
        let pos = rng.random_range(0..=data.len() - replace_len);
        let snippet = if rng.random_bool(HAVOC_SELF_SPLICE_PROBABILITY) && data.len() > replace_len
        {
            let start = rng.random_range(0..=data.len() - replace_len);
            data[start..start + replace_len].to_vec()
        } else {
            random_printable_run(rng, replace_len)
        };
        data[pos..pos + replace_len].copy_from_slice(&snippet);
    }
}

/// Removes a contiguous chunk of 1..=min(10, len) bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeleteRandomChunk;

impl MutationOperator for DeleteRandomChunk {
    fn name(&self) -> &'static str {
        "delete_random_chunk"
    }

    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore) {
        if data.is_empty() {
            return;
        }
        let delete_len = rng.random_range(1..=MAX_CHUNK_LEN.min(data.len()));
        let pos = rng.random_range(0..=data.len() - delete_len);
        data.drain(pos..pos + delete_len);
    }
}

/// Removes exactly one byte. Not part of the default pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeleteRandomByte;

impl MutationOperator for DeleteRandomByte {
    fn name(&self) -> &'static str {
        "delete_random_byte"
    }

    fn apply(&self, data: &mut Vec<u8>, rng: &mut dyn RngCore) {
        if data.is_empty() {
            return;
        }
        let pos = rng.random_range(0..data.len());
        data.remove(pos);
    }
}

/// The mutation engine: a fixed pool of operators, one of which is picked uniformly
/// at random and applied once per `mutate` call.
#[derive(Debug)]
pub struct HavocMutator {
    operators: Vec<Box<dyn MutationOperator>>,
}

impl HavocMutator {
    /// The default pool: insert, bit flip, arithmetic, interesting values,
    /// havoc insert, havoc replace and chunk delete.
    pub fn new() -> Self {
        Self::with_operators(vec![
            Box::new(InsertRandomByte),
            Box::new(FlipRandomBits),
            Box::new(ArithmeticBytes),
            Box::new(InterestingBytes),
            Box::new(HavocInsert),
            Box::new(HavocReplace),
            Box::new(DeleteRandomChunk),
        ])
    }

    /// A mutator over a custom pool. With an empty pool `mutate` returns its input unchanged.
    pub fn with_operators(operators: Vec<Box<dyn MutationOperator>>) -> Self {
        Self { operators }
    }

    pub fn operator_names(&self) -> Vec<&'static str> {
        self.operators.iter().map(|operator| operator.name()).collect()
    }
}

impl Default for HavocMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutator for HavocMutator {
    fn mutate(&mut self, input: &[u8], rng: &mut dyn RngCore) -> Vec<u8> {
        let mut data = input.to_vec();
        if self.operators.is_empty() {
            return data;
        }
        let index = rng.random_range(0..self.operators.len());
        self.operators[index].apply(&mut data, rng);
        data
    }
}
