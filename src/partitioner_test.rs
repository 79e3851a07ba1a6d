//! Tests for the partition hash.

use crate::partitioner::{PartitionKey, hash_string, worker_index};
use proptest::prelude::*;

/// Straight transcription of the hash with explicit 32-bit masking, used to
/// cross-check the implementation.
fn reference_hash(s: &str) -> i64 {
  let codes: Vec<u64> = s.chars().map(|c| c as u64).collect();
  if codes.is_empty() {
    return 0;
  }
  let mut value = codes[0] << 7;
  for &code in &codes {
    value = ((1_000_003u64 * value) % (1u64 << 32)) ^ code;
  }
  (value ^ codes.len() as u64) as i64
}

#[test]
fn test_empty_string_hashes_to_zero() {
  assert_eq!(hash_string(""), 0);
  assert_eq!(worker_index("", 4), 0);
}

#[test]
fn test_single_char() {
  // 'a' = 97: seed 97 << 7 = 12416; (1000003 * 12416) mod 2^32 = 12416037248 mod 2^32
  let expected = ((1_000_003u64 * 12_416) % (1u64 << 32)) ^ 97 ^ 1;
  assert_eq!(hash_string("a"), expected as i64);
  assert_eq!('a'.partition_hash(), i128::from(hash_string("a")));
}

#[test]
fn test_known_strings_match_reference() {
  for s in ["key", "hello world", "apple", "banana", "cherry", "ünïcødé", "日本語"] {
    assert_eq!(hash_string(s), reference_hash(s), "hash of {:?}", s);
  }
}

#[test]
fn test_string_kinds_agree() {
  let owned = String::from("shuffle");
  assert_eq!(owned.partition_hash(), "shuffle".partition_hash());
  assert_eq!((&owned).partition_hash(), i128::from(hash_string("shuffle")));
}

#[test]
fn test_integers_hash_to_themselves() {
  assert_eq!(42u64.partition_hash(), 42);
  assert_eq!((-7i32).partition_hash(), -7);
  assert_eq!(worker_index(&10u32, 4), 2);
  assert_eq!(worker_index(&3usize, 4), 3);
}

#[test]
fn test_large_unsigned_keys_are_not_wrapped() {
  assert_eq!((1u64 << 63).partition_hash(), 1i128 << 63);
  assert_eq!(worker_index(&(1u64 << 63), 3), 2);
  assert_eq!(worker_index(&u64::MAX, 5), 0);
  assert_eq!(worker_index(&u64::MAX, 7), (u64::MAX % 7) as usize);
  assert_eq!(worker_index(&usize::MAX, 3), usize::MAX % 3);
}

#[test]
fn test_negative_keys_wrap() {
  assert_eq!(worker_index(&-1i64, 4), 3);
  assert_eq!(worker_index(&-8i64, 4), 0);
}

proptest! {
  #[test]
  fn test_hash_is_non_negative_and_bounded(s in ".{0,40}") {
    let h = hash_string(&s);
    prop_assert!(h >= 0);
    prop_assert!(h < (1i64 << 32));
    prop_assert_eq!(h, reference_hash(&s));
  }

  #[test]
  fn test_worker_index_in_range(s in "[a-z0-9]{0,16}", workers in 1usize..64) {
    let idx = worker_index(s.as_str(), workers);
    prop_assert!(idx < workers);
    prop_assert_eq!(idx, worker_index(s.as_str(), workers));
  }

  #[test]
  fn test_unsigned_index_is_plain_modulo(n in any::<u64>(), workers in 1usize..64) {
    prop_assert_eq!(worker_index(&n, workers) as u64, n % workers as u64);
  }

  #[test]
  fn test_integer_index_is_modulo(n in any::<i64>(), workers in 1usize..64) {
    prop_assert_eq!(worker_index(&n, workers) as i64, n.rem_euclid(workers as i64));
  }
}
