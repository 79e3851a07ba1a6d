//! Batching utility.
//!
//! Splits a finite sequence into fixed-size chunks so bulk transfers pay the
//! per-message cost once per chunk instead of once per record. Works on lazy
//! iterators ([`batches`]) and on materialized slices ([`slice_batches`]).
//! Every chunk holds exactly `size` records except possibly the last, and no
//! chunk is ever empty.

/// Iterator adapter yielding `Vec`s of at most `size` items.
#[derive(Debug, Clone)]
pub struct Batches<I> {
  inner: I,
  size: usize,
}

impl<I: Iterator> Iterator for Batches<I> {
  type Item = Vec<I::Item>;

  fn next(&mut self) -> Option<Self::Item> {
    let mut chunk = Vec::with_capacity(self.size);
    for item in self.inner.by_ref() {
      chunk.push(item);
      if chunk.len() >= self.size {
        break;
      }
    }
    if chunk.is_empty() { None } else { Some(chunk) }
  }
}

/// Chunks a lazily produced sequence.
///
/// A `size` of zero is treated as one.
pub fn batches<I: IntoIterator>(items: I, size: usize) -> Batches<I::IntoIter> {
  Batches {
    inner: items.into_iter(),
    size: size.max(1),
  }
}

/// Chunks a materialized sequence, cloning each chunk out of the slice.
///
/// A `size` of zero is treated as one.
pub fn slice_batches<T: Clone>(items: &[T], size: usize) -> impl Iterator<Item = Vec<T>> + '_ {
  items.chunks(size.max(1)).map(<[T]>::to_vec)
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  #[test]
  fn test_lazy_batches_keep_remainder() {
    let chunks: Vec<Vec<u32>> = batches((0..7).map(|x| x * 2), 3).collect();
    assert_eq!(chunks, vec![vec![0, 2, 4], vec![6, 8, 10], vec![12]]);
  }

  #[test]
  fn test_empty_input_yields_nothing() {
    assert_eq!(batches(Vec::<u8>::new(), 4).count(), 0);
    assert_eq!(slice_batches::<u8>(&[], 4).count(), 0);
  }

  #[test]
  fn test_zero_size_is_one() {
    let chunks: Vec<Vec<char>> = batches("abc".chars(), 0).collect();
    assert_eq!(chunks, vec![vec!['a'], vec!['b'], vec!['c']]);
  }

  #[test]
  fn test_slice_batches_exact_multiple() {
    let data = vec!["a", "b", "c", "d"];
    let chunks: Vec<Vec<&str>> = slice_batches(&data, 2).collect();
    assert_eq!(chunks, vec![vec!["a", "b"], vec!["c", "d"]]);
  }

  proptest! {
    #[test]
    fn test_batches_concatenate_to_input(data in prop::collection::vec(any::<i32>(), 0..200), size in 1usize..50) {
      let lazy: Vec<Vec<i32>> = batches(data.clone(), size).collect();
      let eager: Vec<Vec<i32>> = slice_batches(&data, size).collect();
      prop_assert_eq!(&lazy, &eager);
      prop_assert!(lazy.iter().all(|c| !c.is_empty() && c.len() <= size));
      let flat: Vec<i32> = lazy.into_iter().flatten().collect();
      prop_assert_eq!(flat, data);
    }
  }
}
