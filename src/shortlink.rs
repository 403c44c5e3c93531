//! 短链接生成。

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Returns a random alphanumeric token of `len` characters.
pub fn generate_short_link(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
