//! Tracing setup for hosts and tests
//!
//! The library itself only emits `tracing` events. Hosts that have no
//! subscriber of their own can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG`, or by
/// `default_directive` (e.g. `"hyperlit_core=info"`) when it is unset.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let _ = init_tracing("warn");
        assert!(!init_tracing("warn"));
    }
}
