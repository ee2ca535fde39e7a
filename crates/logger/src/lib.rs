//! Logger
//!
//! A `log` backend forwarding formatted records to a sink chosen by the embedder, so that the
//! model stays free of any output device.

#![no_std]

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

/// Where formatted records go.
pub type Sink = fn(fmt::Arguments);

static LOGGER: LockedLogger = LockedLogger(Mutex::new(Logger { sink: discard }));
static IS_INITIALIZED: AtomicBool = AtomicBool::new(false);

struct LockedLogger(Mutex<Logger>);

struct Logger {
    sink: Sink,
}

fn discard(_args: fmt::Arguments) {}

impl log::Log for LockedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.0.lock().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.0.lock().log(record)
    }

    fn flush(&self) {}
}

impl Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            (self.sink)(core::format_args!(
                "[{} | {}] {}\n",
                record.level(),
                record.target(),
                record.args()
            ))
        }
    }
}

/// Installs the logger, records at or below `level` are written to `sink`.
///
/// Only the first call installs the logger, later calls are ignored.
pub fn init(level: LevelFilter, sink: Sink) {
    match IS_INITIALIZED.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(_) => {
            LOGGER.0.lock().sink = sink;
            match log::set_logger(&LOGGER) {
                Ok(()) => log::set_max_level(level),
                // Another logger was installed by the embedder, keep it.
                Err(_) => IS_INITIALIZED.store(false, Ordering::SeqCst),
            }
        }
        Err(_) => {
            log::warn!("Logger is already initialized, skipping init");
        }
    };
}
