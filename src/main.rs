use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use netsift::cli::{Cli, OutputFormat};
use netsift::dns::PassthroughLookup;
use netsift::error::NetsiftError;
use netsift::options::Options;
use netsift::output;
use netsift::sniffer::Sniffer;

/// Global shutdown flag, set by signal handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

fn exit_code(err: &NetsiftError) -> i32 {
    match err {
        NetsiftError::Permission(_) => 1,
        NetsiftError::DeviceList(_)
        | NetsiftError::NoMatchingDevice(_)
        | NetsiftError::CaptureOpen { .. }
        | NetsiftError::BpfCompile { .. } => 2,
        NetsiftError::Diagnosis(_) => 3,
        _ => 4,
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let format = cli.format;
    let opts = cli.into_options();

    match run(opts, format) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(&e));
        }
    }
}

fn run(opts: Options, format: OutputFormat) -> Result<(), NetsiftError> {
    install_signal_handlers();

    let mut sniffer = Sniffer::new(opts.clone(), Arc::new(PassthroughLookup))?;

    let stdout = io::stdout();
    sniffer.run(&SHUTDOWN_REQUESTED, |snapshot| {
        let mut out = stdout.lock();
        if let Err(e) = output::write_snapshot(snapshot, &opts, format, &mut out) {
            log::warn!("snapshot write failed: {e}");
        }
        let _ = out.flush();
    });

    sniffer.close();
    Ok(())
}
