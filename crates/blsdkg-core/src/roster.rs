//! Roster set operations and byte chunking

use crate::wire::Operator;

/// Operators present only in the new roster (by id), in the new roster's order.
pub fn disjoint_new_operators(old: &[Operator], new: &[Operator]) -> Vec<Operator> {
    new.iter()
        .filter(|op| !old.iter().any(|o| o.id == op.id))
        .cloned()
        .collect()
}

/// Operators present only in the old roster (by id), in the old roster's order.
pub fn disjoint_old_operators(old: &[Operator], new: &[Operator]) -> Vec<Operator> {
    old.iter()
        .filter(|op| !new.iter().any(|n| n.id == op.id))
        .cloned()
        .collect()
}

/// Split `buf` into `chunk`-sized slices. The final slice carries any
/// remainder; callers validate length divisibility themselves.
pub fn split_bytes(buf: &[u8], chunk: usize) -> Vec<&[u8]> {
    buf.chunks(chunk).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: u64) -> Operator {
        Operator { id, pubkey: vec![] }
    }

    #[test]
    fn test_disjoint_operators() {
        let old: Vec<_> = [1, 2, 3, 4, 5].map(op).to_vec();
        let new: Vec<_> = [3, 4, 5, 6, 7].map(op).to_vec();

        assert_eq!(disjoint_new_operators(&old, &new), [6, 7].map(op).to_vec());
        assert_eq!(disjoint_old_operators(&old, &new), [1, 2].map(op).to_vec());
    }

    #[test]
    fn test_disjoint_preserves_order() {
        let old: Vec<_> = [9, 1, 7].map(op).to_vec();
        let new: Vec<_> = [4, 7, 2].map(op).to_vec();

        assert_eq!(disjoint_new_operators(&old, &new), [4, 2].map(op).to_vec());
        assert_eq!(disjoint_old_operators(&old, &new), [9, 1].map(op).to_vec());
    }

    #[test]
    fn test_disjoint_empty_inputs() {
        let ops: Vec<_> = [1, 2].map(op).to_vec();
        assert_eq!(disjoint_new_operators(&ops, &[]), vec![]);
        assert_eq!(disjoint_new_operators(&[], &ops), ops.clone());
        assert_eq!(disjoint_old_operators(&ops, &[]), ops);
    }

    #[test]
    fn test_split_bytes() {
        let buf = [0u8, 1, 2, 3, 4, 5];
        assert_eq!(split_bytes(&buf, 2), vec![&[0, 1][..], &[2, 3], &[4, 5]]);
        assert_eq!(split_bytes(&buf, 4), vec![&[0, 1, 2, 3][..], &[4, 5]]);
        assert!(split_bytes(&[], 4).is_empty());
    }
}
