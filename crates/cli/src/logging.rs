use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Logs go to stderr so `attach` can stream device bytes on stdout.
pub fn init_logging(verbosity: u8) {
	// 0 = warnings (malformed claim file, failed releases)
	// 1 (-v) = acquisitions and disconnects
	// 2 (-vv) = per-tick decisions
	// 3+ = everything, including broker traffic
	let filter = match verbosity {
		0 => "warn",
		1 => "info",
		2 => "info,portclaim=debug",
		_ => "trace",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
