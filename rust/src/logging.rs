/// Logging initialization.
///
/// Called once at the start of `App::new()`, before anything else. Safe to
/// call again (later `App`s in the same process are no-ops thanks to
/// `try_init`). `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shepherd_core=debug,info".into()),
        )
        .try_init();
}
