use sha1::{Digest, Sha1};

/// Escaped identities longer than this are replaced by their digest.
pub const MAX_ESCAPED_KEY_LEN: usize = 200;

/// Derives the store key for a request identity.
///
/// The identity is escaped as a query component (space becomes `+`). When the
/// escaped form is longer than [`MAX_ESCAPED_KEY_LEN`], the SHA-1 of the
/// unescaped identity is used instead, as 40 lowercase hex characters.
///
/// ```
/// use rttp_cache::cache::derive_key;
///
/// assert_eq!(derive_key("pages", "/a b?x=1"), "pages:%2Fa+b%3Fx%3D1");
/// assert_eq!(derive_key("pages", &"a".repeat(300)).len(), "pages:".len() + 40);
/// ```
pub fn derive_key(prefix: &str, request_uri: &str) -> String {
    let escaped = urlencoding::encode(request_uri).replace("%20", "+");
    let body = if escaped.len() > MAX_ESCAPED_KEY_LEN {
        hex::encode(Sha1::digest(request_uri.as_bytes()))
    } else {
        escaped
    };
    format!("{prefix}:{body}")
}
