use std::env;
use std::sync::OnceLock;

pub(crate) const WORLD_SIZE: &str = "TENSORCOST_WORLD_SIZE";
pub(crate) const MEMORY_UNIT: &str = "TENSORCOST_MEMORY_UNIT";
pub(crate) const PARALLELISM: &str = "TENSORCOST_PARALLELISM";
pub(crate) const FUSE_EPSILON: &str = "TENSORCOST_FUSE_EPSILON";
pub(crate) const PROFILE: &str = "TENSORCOST_PROFILE";

static TENSORCOST_PROFILE: OnceLock<bool> = OnceLock::new();

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Non-empty, trimmed value of `key`.
pub(crate) fn var(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

pub(crate) fn profile_enabled() -> bool {
    *TENSORCOST_PROFILE.get_or_init(|| var(PROFILE).map(|v| parse_bool(&v)).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
