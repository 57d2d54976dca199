//! Tracing setup shared by the toolhost binaries
//!
//! Logs go to stderr: stdout carries command output for the CLI and the
//! protocol stream for MCP servers.

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Library crate name, always enabled alongside the binary's own target
const LIBRARY_TARGET: &str = "toolhost";

/// Level for a `-v` count: info, then debug, then trace
pub fn verbosity_level(count: u8) -> Level {
    match count {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Filter used when `RUST_LOG` is unset.
///
/// Dependencies stay at warn so rmcp and reqwest chatter does not drown
/// the backend lifecycle messages.
pub fn default_directives(binary: &str, level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string(), format!("{}={}", LIBRARY_TARGET, level)];
    if binary != LIBRARY_TARGET {
        directives.push(format!("{}={}", binary, level));
    }
    directives.join(",")
}

/// Initialize tracing to stderr for `binary`.
///
/// A non-empty `RUST_LOG` replaces the default filter entirely.
/// `LOG_FORMAT=json` switches to structured output.
pub fn init_tracing(binary: &str, level: Level) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(custom) if !custom.trim().is_empty() => EnvFilter::try_new(custom)?,
        _ => EnvFilter::try_new(default_directives(binary, level))?,
    };

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(binary != LIBRARY_TARGET)
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_level() {
        assert_eq!(verbosity_level(0), Level::INFO);
        assert_eq!(verbosity_level(1), Level::DEBUG);
        assert_eq!(verbosity_level(5), Level::TRACE);
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives("toolhost", Level::DEBUG),
            "warn,toolhost=debug"
        );
        assert_eq!(
            default_directives("echo_mcp", Level::INFO),
            "warn,toolhost=info,echo_mcp=info"
        );
        assert!(EnvFilter::try_new(default_directives("echo_mcp", Level::TRACE)).is_ok());
    }
}
