use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable that switches log output to JSON when set to `1`.
pub const LOG_JSON_ENV: &str = "SPV_KIT_LOG_JSON";

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG` (default
/// `info`). Calling it again is a no-op.
pub fn init_logging() {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let use_json = std::env::var(LOG_JSON_ENV)
		.map(|value| value == "1")
		.unwrap_or(false);

	if use_json {
		let _ = fmt::Subscriber::builder()
			.with_env_filter(env_filter)
			.json()
			.with_writer(std::io::stderr)
			.try_init();
	} else {
		let _ = fmt::Subscriber::builder()
			.with_env_filter(env_filter)
			.with_target(false)
			.with_thread_ids(false)
			.with_thread_names(false)
			.with_writer(std::io::stderr)
			.try_init();
	}
}
