// SPDX-License-Identifier: MIT

//! Runtime id generation.
//!
//! Every runtime has an opaque 6 hex character id, randomly generated on
//! creation and then stable for the runtime's lifetime — it is persisted
//! alongside the runtime's config and is not regenerated on reload.

use rand::Rng;

/// Generate a random 6 hex character id, e.g. `"a3f9c1"`.
pub fn short_hex() -> String {
    let mut rng = rand::thread_rng();
    let n: u32 = rng.gen_range(0..=0xFFFFFF);
    format!("{:06x}", n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_six_lowercase_hex_chars() {
        for _ in 0..100 {
            let id = short_hex();
            assert_eq!(id.len(), 6);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn is_reasonably_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| short_hex()).collect();
        assert!(ids.len() > 990);
    }
}
