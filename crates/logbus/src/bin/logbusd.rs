// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `logbusd` - the media driver daemon.
//!
//! Launches a driver and runs until interrupted.

use clap::Parser;
use log::{Level, Metadata, Record};
use logbus::config::{parse_duration_ns, ThreadingMode};
use logbus::driver::{DriverContext, MediaDriver};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "logbusd", version = logbus::VERSION, about = "logbus media driver")]
struct Args {
    /// Driver directory holding the control file and log buffers.
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Threading mode: dedicated, shared_network, or shared.
    #[arg(short = 'm', long, default_value = "dedicated")]
    threading_mode: String,

    /// Term buffer length in bytes (power of two).
    #[arg(long)]
    term_length: Option<usize>,

    /// MTU length in bytes.
    #[arg(long)]
    mtu: Option<usize>,

    /// Client liveness timeout (e.g. "5s", "500ms").
    #[arg(long)]
    client_liveness_timeout: Option<String>,

    /// Delete the driver directory on shutdown.
    #[arg(long)]
    delete_dir_on_shutdown: bool,

    /// Log level: error, warn, info, debug.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Minimal console logger behind the `log` facade.
struct ConsoleLogger {
    level: Level,
}

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("{:<5} {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logger(level: &str) {
    let level = match level.to_ascii_lowercase().as_str() {
        "error" => Level::Error,
        "warn" => Level::Warn,
        "debug" => Level::Debug,
        _ => Level::Info,
    };

    let logger = Box::leak(Box::new(ConsoleLogger { level }));
    if log::set_logger(logger).is_ok() {
        log::set_max_level(level.to_level_filter());
    }
}

fn main() -> std::process::ExitCode {
    let args = Args::parse();
    init_logger(&args.log_level);

    let Some(threading_mode) = ThreadingMode::parse(&args.threading_mode) else {
        eprintln!("unknown threading mode: {}", args.threading_mode);
        return std::process::ExitCode::FAILURE;
    };

    let mut ctx = DriverContext::new().threading_mode(threading_mode);
    if let Some(dir) = args.dir {
        ctx = ctx.dir(dir);
    }
    if let Some(term_length) = args.term_length {
        ctx = ctx.term_buffer_length(term_length);
    }
    if let Some(mtu) = args.mtu {
        ctx = ctx.mtu_length(mtu);
    }
    if let Some(timeout) = args.client_liveness_timeout.as_deref() {
        match parse_duration_ns(timeout) {
            Some(timeout_ns) => ctx = ctx.client_liveness_timeout_ns(timeout_ns),
            None => {
                eprintln!("unparsable client liveness timeout: {timeout}");
                return std::process::ExitCode::FAILURE;
            }
        }
    }
    ctx = ctx.dir_delete_on_shutdown(args.delete_dir_on_shutdown);

    let driver = match MediaDriver::launch(ctx) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("driver failed to launch: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    println!("logbusd {} up, dir: {}", logbus::VERSION, driver.dir().display());

    let handler = handle_signal as extern "C" fn(libc::c_int);
    // SAFETY: the handler only performs an atomic store, which is
    // async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }

    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    println!("logbusd shutting down");
    driver.close();
    std::process::ExitCode::SUCCESS
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}
