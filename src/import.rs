//! Composite import IDs.
//!
//! Objects nested under a parent are imported as `<parent>/<child>`.

use crate::error::ProviderError;

/// Separator between the parts of a composite ID.
pub const SEPARATOR: char = '/';

/// Join ID parts.
pub fn composite_id(parts: &[&str]) -> String {
    parts.join("/")
}

/// Split `id` into exactly `N` non-empty parts named by `labels`.
pub fn parse_composite_id<const N: usize>(id: &str, labels: [&str; N]) -> Result<[String; N], ProviderError> {
    let invalid = || {
        let expected: Vec<String> = labels.iter().map(|l| format!("<{}>", l)).collect();
        ProviderError::InvalidRequest(format!(
            "invalid import ID \"{}\": expected {}",
            id,
            expected.join(&SEPARATOR.to_string())
        ))
    };

    let parts: Vec<&str> = id.split(SEPARATOR).collect();
    if parts.len() != N || parts.iter().any(|p| p.trim().is_empty()) {
        return Err(invalid());
    }
    let owned: Vec<String> = parts.iter().map(|p| p.trim().to_string()).collect();
    owned.try_into().map_err(|_| invalid())
}
