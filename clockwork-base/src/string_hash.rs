use std::borrow::Cow;

// Zero is reserved for the empty string, everything else has the low bit set
const fn hash_str(s: &str) -> u128 {
    if s.is_empty() {
        0u128
    } else {
        const_fnv1a_hash::fnv1a_hash_str_128(s) | 1u128
    }
}

/// 128-bit FNV-1a hash of a (sanitized) resource name. Casing is ignored so that
/// "Textures/Stone.png" and "textures/stone.png" address the same resource.
pub fn hash_resource_name(name: &str) -> u128 {
    let name = if name.chars().any(char::is_uppercase) {
        Cow::Owned(name.to_lowercase())
    } else {
        Cow::Borrowed(name)
    };

    hash_str(&name)
}
