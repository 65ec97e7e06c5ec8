//! Short random identifiers for naming test resources.

use rand::Rng;

const BASE62_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Length of identifiers returned by [`unique_id`].
pub const UNIQUE_ID_LEN: usize = 6;

/// Returns a short base-62 identifier.
///
/// Six characters keep generated Kubernetes names well under the 63
/// character label limit while making collisions between concurrent runs
/// unlikely. Lower-case the result before using it in a Kubernetes name.
#[must_use]
pub fn unique_id() -> String {
    let mut rng = rand::thread_rng();
    (0..UNIQUE_ID_LEN)
        .map(|_| char::from(BASE62_CHARS[rng.gen_range(0..BASE62_CHARS.len())]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_unique_id_shape() {
        let id = unique_id();
        assert_eq!(id.len(), UNIQUE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_unique_id_varies() {
        let ids: HashSet<String> = (0..50).map(|_| unique_id()).collect();
        assert!(ids.len() > 45);
    }
}
