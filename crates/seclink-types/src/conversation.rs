use md5::{Digest, Md5};

/// Stable thread key for a pair of participants.
///
/// The two ids are sorted before hashing, so `conversation_key(a, b)` and
/// `conversation_key(b, a)` always agree. The result is the 32-char hex MD5
/// of `"<lo>_<hi>"`; participant ids are not secret, only collisions matter.
pub fn conversation_key(user_a: &str, user_b: &str) -> String {
    let (lo, hi) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };

    let mut hasher = Md5::new();
    hasher.update(lo.as_bytes());
    hasher.update(b"_");
    hasher.update(hi.as_bytes());
    hex::encode(hasher.finalize())
}
