use crate::buffer::KeyBuf;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Hex digits in a formatted key.
pub const KEY_LEN: usize = 16;
/// Bytes in a generated value: two 8-digit hex fields plus padding.
pub const VALUE_LEN: usize = 82;
/// Number of distinct keys a hot-set reader cycles through.
pub const HOT_SET_SIZE: usize = 16;

/// Per-thread generator seed. Same run seed and index, same stream.
pub fn thread_seed(run_seed: u64, thread_index: u64) -> u64 {
    run_seed.wrapping_add(thread_index)
}

/// Fill `out` with the low `out.len()` hex digits of `value`, zero-padded.
fn write_hex(value: u64, out: &mut [u8]) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let digits = out.len();
    for (i, b) in out.iter_mut().enumerate() {
        let shift = (digits - 1 - i) * 4;
        *b = HEX[((value >> shift) & 0xf) as usize];
    }
}

/// Write `seq` as a zero-padded lowercase hex key into `buf`.
pub fn format_key(seq: u64, buf: &mut KeyBuf) {
    // KEY_LEN never exceeds the key buffer's capacity
    let Ok(out) = buf.set_len_mut(KEY_LEN) else {
        unreachable!("key buffer smaller than {KEY_LEN}");
    };
    write_hex(seq, out);
}

/// Produces row values: `%08x` of a 31-bit random, `%08x` of a random in
/// `0..16`, then spaces.
pub struct ValueGen {
    rng: SmallRng,
}

impl ValueGen {
    pub fn new(seed: u64) -> Self {
        ValueGen { rng: SmallRng::seed_from_u64(seed) }
    }

    pub fn fill(&mut self, out: &mut [u8; VALUE_LEN]) {
        let a: u32 = self.rng.random_range(0..1u32 << 31);
        let b: u32 = self.rng.random_range(0..16);
        write_hex(a.into(), &mut out[..8]);
        write_hex(b.into(), &mut out[8..16]);
        out[16..].fill(b' ');
    }
}

/// How a reader picks the next key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Re-read a small fixed set sampled once at start.
    HotSet,
    /// Fresh uniform key over the whole dataset each time.
    Uniform,
}

pub enum KeySelector {
    HotSet { keys: [u64; HOT_SET_SIZE], rng: SmallRng },
    Uniform { rows: u64, rng: SmallRng },
}

impl KeySelector {
    pub fn new(policy: SelectionPolicy, rows: u64, seed: u64) -> Self {
        assert!(rows > 0, "cannot select keys from an empty dataset");
        let mut rng = SmallRng::seed_from_u64(seed);
        match policy {
            SelectionPolicy::HotSet => {
                let keys = std::array::from_fn(|_| rng.random_range(0..rows));
                KeySelector::HotSet { keys, rng }
            }
            SelectionPolicy::Uniform => KeySelector::Uniform { rows, rng },
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        match self {
            KeySelector::HotSet { keys, rng } => keys[rng.random_range(0..HOT_SET_SIZE)],
            KeySelector::Uniform { rows, rng } => rng.random_range(0..*rows),
        }
    }

    pub fn hot_keys(&self) -> Option<&[u64; HOT_SET_SIZE]> {
        match self {
            KeySelector::HotSet { keys, .. } => Some(keys),
            KeySelector::Uniform { .. } => None,
        }
    }
}
