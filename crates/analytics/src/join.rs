//! Cross-store join helpers.

use std::collections::HashMap;
use std::hash::Hash;

/// Left outer join of `left` onto a keyed `right` side.
///
/// Every left row is yielded exactly once, in input order, paired with the
/// matching right value or `None`.
pub fn left_join<'r, L, K, R, F>(
    left: impl IntoIterator<Item = L>,
    right: &'r HashMap<K, R>,
    key: F,
) -> impl Iterator<Item = (L, Option<&'r R>)>
where
    K: Eq + Hash + 'r,
    F: Fn(&L) -> &K,
{
    left.into_iter().map(move |row| {
        let matched = right.get(key(&row));
        (row, matched)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_left_join_keeps_unmatched_rows() {
        let right: HashMap<&str, u32> = [("a", 1), ("c", 3)].into();
        let joined: Vec<(&str, Option<&u32>)> =
            left_join(["a", "b", "c"], &right, |l| l).collect();
        assert_eq!(joined, vec![("a", Some(&1)), ("b", None), ("c", Some(&3))]);
    }

    #[test]
    fn test_left_join_of_empty_left_is_empty() {
        let right: HashMap<String, u32> = [("a".to_owned(), 1)].into();
        assert_eq!(left_join(Vec::<String>::new(), &right, |l| l).count(), 0);
    }
}
