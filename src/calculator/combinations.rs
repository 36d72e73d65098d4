//! Locus subsets and antigen cross products for haplotype aggregation.
//!
//! Loci in use are numbered by their position in the frequency-bearing
//! vocabulary; a subset is a bitmask over those positions and its level is the
//! popcount. With at most [`MAX_LEVELS`] loci there are never more than 31 subsets.

use crate::error::AggregationError;

/// Highest haplotype level (S1..S5) the frequency formula defines
pub const MAX_LEVELS: usize = 5;

/// Bitmasks `1..2^n` grouped by popcount: entry `level - 1` holds the masks of
/// that level in increasing numeric order.
pub fn subsets_by_level(n: usize) -> Result<Vec<Vec<u32>>, AggregationError> {
    if n > MAX_LEVELS {
        return Err(AggregationError::LevelOutOfRange {
            level: n,
            max: MAX_LEVELS,
        });
    }

    let mut levels = vec![Vec::new(); n];
    for mask in 1u32..(1u32 << n) {
        levels[mask.count_ones() as usize - 1].push(mask);
    }
    Ok(levels)
}

/// Positions of the set bits of `mask`, lowest first
pub fn mask_members(mask: u32) -> impl Iterator<Item = usize> {
    (0..u32::BITS as usize).filter(move |&bit| mask & (1u32 << bit) != 0)
}

/// Total number of cross-product elements over every non-empty subset of lists
/// with the given sizes: `prod(1 + size) - 1`. `None` on overflow.
pub fn combination_count(sizes: &[usize]) -> Option<usize> {
    sizes
        .iter()
        .try_fold(1usize, |acc, &size| acc.checked_mul(size.checked_add(1)?))
        .map(|total| total - 1)
}

/// Lazy cartesian product over ordered lists.
///
/// Elements come out in odometer order: the first list varies slowest, so the
/// locus order of the input is preserved inside every element.
pub struct CartesianProduct<'a, T> {
    lists: Vec<&'a [T]>,
    indices: Vec<usize>,
    done: bool,
}

impl<'a, T> CartesianProduct<'a, T> {
    pub fn new(lists: Vec<&'a [T]>) -> Self {
        let done = lists.is_empty() || lists.iter().any(|list| list.is_empty());
        let indices = vec![0; lists.len()];
        Self {
            lists,
            indices,
            done,
        }
    }
}

impl<'a, T> Iterator for CartesianProduct<'a, T> {
    type Item = Vec<&'a T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let item = self
            .indices
            .iter()
            .zip(&self.lists)
            .map(|(&i, list)| &list[i])
            .collect();

        // advance the odometer from the last position
        let mut position = self.lists.len();
        loop {
            if position == 0 {
                self.done = true;
                break;
            }
            position -= 1;
            self.indices[position] += 1;
            if self.indices[position] < self.lists[position].len() {
                break;
            }
            self.indices[position] = 0;
        }

        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsets_grouped_by_level() {
        let levels = subsets_by_level(3).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec![0b001, 0b010, 0b100]);
        assert_eq!(levels[1], vec![0b011, 0b101, 0b110]);
        assert_eq!(levels[2], vec![0b111]);

        let total: usize = subsets_by_level(MAX_LEVELS).unwrap().iter().map(Vec::len).sum();
        assert_eq!(total, 31);
        assert!(subsets_by_level(0).unwrap().is_empty());
    }

    #[test]
    fn test_subsets_reject_too_many_loci() {
        assert!(matches!(
            subsets_by_level(MAX_LEVELS + 1),
            Err(AggregationError::LevelOutOfRange { level: 6, max: MAX_LEVELS })
        ));
    }

    #[test]
    fn test_mask_members() {
        assert_eq!(mask_members(0b10110).collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[test]
    fn test_product_preserves_list_order() {
        let a = vec!["A23", "A9"];
        let b = vec!["B57", "B5701", "B5703"];
        let product: Vec<String> = CartesianProduct::new(vec![&a[..], &b[..]])
            .map(|combo| combo.into_iter().copied().collect::<Vec<_>>().join(";"))
            .collect();

        assert_eq!(
            product,
            vec![
                "A23;B57",
                "A23;B5701",
                "A23;B5703",
                "A9;B57",
                "A9;B5701",
                "A9;B5703"
            ]
        );
    }

    #[test]
    fn test_product_with_empty_list_is_empty() {
        let a = vec!["A9"];
        let empty: Vec<&str> = Vec::new();
        assert_eq!(CartesianProduct::new(vec![&a[..], &empty[..]]).count(), 0);
        assert_eq!(CartesianProduct::<&str>::new(Vec::new()).count(), 0);
    }

    #[test]
    fn test_combination_count() {
        // {A: 3, B: 2}: 3 + 2 + 3 * 2
        assert_eq!(combination_count(&[3, 2]), Some(11));
        assert_eq!(combination_count(&[]), Some(0));
        assert_eq!(combination_count(&[usize::MAX, 2]), None);
    }
}
