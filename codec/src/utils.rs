// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of a server-synthesized client id, in the style of a compact
/// random token rather than a formatted UUID.
const GENERATED_CLIENT_ID_LEN: usize = 23;

/// Produce a client id for a Connect packet that arrived with an empty one.
///
/// The wire format places no constraint on the shape of this string beyond
/// the usual UTF-8 string length limit, so a random alphanumeric token is as
/// good as a UUID and avoids pulling in another crate for it.
#[must_use]
pub fn random_client_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_client_id_len() {
        let id = random_client_id();
        assert_eq!(id.chars().count(), GENERATED_CLIENT_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
