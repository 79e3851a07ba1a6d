//! Hash partitioning for the shuffle.
//!
//! Maps a key to a worker index. Integer keys hash to themselves; string keys
//! go through a fixed polynomial hash so that repeated partitioning of the same
//! keys lands on the same workers across runs.

/// Multiplier of the legacy string hash.
const STRING_HASH_MULTIPLIER: u64 = 1_000_003;

/// A key that can route a record to a worker.
///
/// The hash is an `i128` so that every built-in integer key, `u64::MAX`
/// included, is taken as-is before the modulo.
pub trait PartitionKey {
  /// Returns the deterministic hash of this key.
  fn partition_hash(&self) -> i128;
}

macro_rules! impl_integer_key {
  ($($t:ty),*) => {
    $(
      impl PartitionKey for $t {
        fn partition_hash(&self) -> i128 {
          i128::from(*self)
        }
      }
    )*
  };
}

impl_integer_key!(i8, i16, i32, i64, i128, u8, u16, u32, u64);

impl PartitionKey for isize {
  fn partition_hash(&self) -> i128 {
    *self as i128
  }
}

impl PartitionKey for usize {
  fn partition_hash(&self) -> i128 {
    *self as i128
  }
}

impl PartitionKey for str {
  fn partition_hash(&self) -> i128 {
    i128::from(hash_string(self))
  }
}

impl PartitionKey for String {
  fn partition_hash(&self) -> i128 {
    i128::from(hash_string(self))
  }
}

impl PartitionKey for char {
  fn partition_hash(&self) -> i128 {
    let mut buf = [0u8; 4];
    i128::from(hash_string(self.encode_utf8(&mut buf)))
  }
}

impl<K: PartitionKey + ?Sized> PartitionKey for &K {
  fn partition_hash(&self) -> i128 {
    (**self).partition_hash()
  }
}

/// Legacy polynomial string hash.
///
/// Seeds with the first code point shifted left by 7, then folds every code
/// point as `value = (1000003 * value mod 2^32) ^ code_point`, XORs in the
/// length in code points, and remaps `-1` to `-2`. The empty string hashes to 0.
pub fn hash_string(s: &str) -> i64 {
  let mut chars = s.chars();
  let Some(first) = chars.next() else {
    return 0;
  };
  let mut value = u64::from(u32::from(first)) << 7;
  let mut len = 0u64;
  for c in s.chars() {
    value = (STRING_HASH_MULTIPLIER.wrapping_mul(value) & 0xFFFF_FFFF) ^ u64::from(u32::from(c));
    len += 1;
  }
  let value = (value ^ len) as i64;
  if value == -1 { -2 } else { value }
}

/// Returns the worker index for `key` in a pool of `workers`.
///
/// Negative hashes wrap around, so the result is always in `0..workers`.
///
/// # Panics
///
/// Panics if `workers` is zero.
pub fn worker_index<K: PartitionKey + ?Sized>(key: &K, workers: usize) -> usize {
  key.partition_hash().rem_euclid(workers as i128) as usize
}
