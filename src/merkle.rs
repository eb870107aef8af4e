//! The hierarchical hash function.
//!
//! A node's hash is the MD5 of the lexicographically sorted concatenation of its
//! children's hashes. The same function is used at every level, with no per-level
//! prefix, so that the values stay bit-compatible with hashes already stored in the catalog.

use md5::{Digest, Md5};

/// `md5("")`, which is what [get_merkle_hash] returns for a node without children.
pub const EMPTY_HASH: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Compute the hash of a node from the hashes of its children.
///
/// The result does not depend on the order of `hashes`.
pub fn get_merkle_hash<I, S>(hashes: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<S> = hashes.into_iter().collect();
    sorted.sort_unstable_by(|a, b| a.as_ref().cmp(b.as_ref()));
    let mut hasher = Md5::new();
    for hash in &sorted {
        hasher.update(hash.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn md5_hex(s: &str) -> String {
        hex::encode(Md5::digest(s.as_bytes()))
    }

    #[rstest]
    fn test_empty_input() {
        let empty: [&str; 0] = [];
        assert_eq!(get_merkle_hash(empty), EMPTY_HASH);
        assert_eq!(md5_hex(""), EMPTY_HASH);
    }

    #[rstest]
    #[case(&["bb", "aa"], "aabb")]
    #[case(&["aa", "bb"], "aabb")]
    #[case(&["cc", "aa", "bb"], "aabbcc")]
    #[case(&["aa", "aa"], "aaaa")]
    fn test_sorted_concatenation(#[case] hashes: &[&str], #[case] concatenated: &str) {
        assert_eq!(get_merkle_hash(hashes), md5_hex(concatenated))
    }

    #[rstest]
    fn test_order_independent() {
        let hashes = [
            "5d41402abc4b2a76b9719d911017c592",
            "7d793037a0760186574b0282f2f435e7",
            "0cc175b9c0f1b6a831c399e269772661",
            "92eb5ffee6ae2fec3ad71c777531578f",
        ];
        let expected = get_merkle_hash(hashes);
        let mut permuted = hashes;
        for i in 0..permuted.len() {
            permuted.rotate_left(1);
            permuted.swap(0, i);
            assert_eq!(get_merkle_hash(permuted), expected);
        }
        assert_eq!(get_merkle_hash(hashes.iter().map(|s| s.to_string())), expected);
    }
}
