//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Install a `fmt` subscriber for the process.
///
/// `RUST_LOG` takes precedence; otherwise the configured level applies to this
/// crate and `warn` to everything else. Calling it again is harmless: the
/// first subscriber stays installed and `false` is returned.
pub fn init_tracing(app: &ApplicationConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&app.log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

fn default_directives(level: &str) -> String {
    format!("warn,fpwc_daq={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_scope_level_to_crate() {
        assert_eq!(default_directives("debug"), "warn,fpwc_daq=debug");
    }

    #[test]
    fn second_init_is_harmless() {
        let app = ApplicationConfig::default();
        let _ = init_tracing(&app);
        assert!(!init_tracing(&app));
    }
}
