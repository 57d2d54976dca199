//! Well-known filesystem locations

use std::path::PathBuf;

use crate::backend::BackendKind;

/// Per-user cache directory for toolhost
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| std::env::temp_dir())
        .join("toolhost")
}

/// Directory holding backend server logs
pub fn default_log_dir() -> PathBuf {
    cache_dir().join("logs")
}

/// Log file that a spawned backend's stdout/stderr is redirected to
pub fn backend_log_file(kind: BackendKind) -> PathBuf {
    default_log_dir().join(format!("{}.log", kind))
}

/// Expand `~` and `$VAR` in a configured path; unexpandable input is kept as-is
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::full(raw).unwrap_or_else(|_| raw.into());
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_log_file_named_after_kind() {
        let path = backend_log_file(BackendKind::LlamaCpp);
        assert!(path.ends_with("toolhost/logs/llama-cpp.log"));
    }

    #[test]
    fn test_expand_path() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/models"), home.join("models"));
        }
        assert_eq!(
            expand_path("$TOOLHOST_SURELY_UNSET_VAR/bin"),
            PathBuf::from("$TOOLHOST_SURELY_UNSET_VAR/bin")
        );
        assert_eq!(expand_path("/opt/llama"), PathBuf::from("/opt/llama"));
    }
}
