use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

pub const PARAMS_DIR_VAR: &str = "WEEDCNN_PARAMS_DIR";
pub const PROFILE_VAR: &str = "WEEDCNN_PROFILE";

static WEEDCNN_PROFILE: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Whether newly built networks install a [`crate::profiling::TimerTree`]. Read once.
pub(crate) fn profile_enabled() -> bool {
    *WEEDCNN_PROFILE.get_or_init(|| match env::var(PROFILE_VAR) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Directory holding the JSON parameter files, if configured.
pub(crate) fn params_dir() -> Option<PathBuf> {
    match env::var_os(PARAMS_DIR_VAR) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn truthy_values_are_recognised() {
        for value in ["1", "true", " YES ", "on"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
