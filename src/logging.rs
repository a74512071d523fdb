//! A `log::Log` implementation writing `[core N][LEVEL] message` lines
//! through the architecture's message-output primitive, replacing the
//! hand-rolled `printlog!`/`info!`/`debug!` macros of earlier kernel
//! generations now that the crate depends on the `log` facade directly.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::arch;

pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

/// Adapts the architecture's byte-sink to `core::fmt::Write` so `log`
/// records can be formatted without an intermediate heap allocation.
struct MessageBufWriter;

impl Write for MessageBufWriter {
	fn write_str(&mut self, s: &str) -> core::fmt::Result {
		arch::output_message_buf(s.as_bytes());
		Ok(())
	}
}

impl Log for KernelLogger {
	fn enabled(&self, metadata: &Metadata<'_>) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &Record<'_>) {
		if !self.enabled(record.metadata()) {
			return;
		}

		let core_id = arch::core_id();
		let level = level_tag(record.level());
		let mut out = MessageBufWriter;
		let _ = writeln!(out, "[core {core_id}][{level}] {}", record.args());
	}

	fn flush(&self) {}
}

fn level_tag(level: Level) -> &'static str {
	match level {
		Level::Error => "ERROR",
		Level::Warn => "WARN",
		Level::Info => "INFO",
		Level::Debug => "DEBUG",
		Level::Trace => "TRACE",
	}
}

/// Installs the kernel logger. Idempotent: a second call is a no-op, matching
/// `log::set_logger`'s own contract.
pub fn init(filter: LevelFilter) {
	log::set_max_level(filter);
	let _ = log::set_logger(&LOGGER);
}
