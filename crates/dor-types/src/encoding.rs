//! Percent-encoding for token sub-fields and storage leaf names.
//!
//! ASCII alphanumerics are always left as-is; every other byte outside the
//! caller's unreserved set becomes `%XX` with upper-case hex digits. The
//! encoding is canonical: [`percent_decode`] followed by [`percent_encode`]
//! with the same unreserved set reproduces the input only if the input was
//! produced by `percent_encode`, which is what [`is_canonical`] checks.

use crate::error::TypeError;

/// Punctuation left unescaped inside datastream token sub-fields.
pub const TOKEN_UNRESERVED: &[u8] = b"-_.~";

/// Punctuation left unescaped in storage leaf names.
///
/// `.` and `~` are escaped here so a leaf can never be `.` or `..`.
pub const LEAF_UNRESERVED: &[u8] = b"-_";

/// Percent-encode `input`, keeping ASCII alphanumerics and `unreserved`.
pub fn percent_encode(input: &str, unreserved: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    for &byte in input.as_bytes() {
        if byte.is_ascii_alphanumeric() || unreserved.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&hex::encode_upper([byte]));
        }
    }
    out
}

/// Decode `%XX` escapes. The result must be valid UTF-8.
pub fn percent_decode(input: &str) -> Result<String, TypeError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let digits = input.get(i + 1..i + 3).ok_or_else(|| TypeError::InvalidEncoding {
                input: input.to_string(),
                reason: format!("truncated escape at offset {i}"),
            })?;
            let decoded = hex::decode(digits).map_err(|e| TypeError::InvalidEncoding {
                input: input.to_string(),
                reason: format!("bad escape {digits:?}: {e}"),
            })?;
            out.extend_from_slice(&decoded);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| TypeError::InvalidEncoding {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// Returns `true` if `encoded` is exactly what [`percent_encode`] would
/// produce for its decoded form.
pub fn is_canonical(encoded: &str, unreserved: &[u8]) -> bool {
    match percent_decode(encoded) {
        Ok(decoded) => percent_encode(&decoded, unreserved) == encoded,
        Err(_) => false,
    }
}
