// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use pico_args::Arguments;
use tracing_appender::non_blocking::NonBlockingBuilder;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry, EnvFilter};

use tts160::alpaca::create_alpaca_server;
use tts160::mount::Mount;
use tts160::profile::Profile;

struct AppArgs {
    profile: PathBuf,
    port: Option<String>,
    log_dir: String,
    log_file: String,
}

fn main() {
    const HELP: &str = "\
    FLAGS:
      -h, --help                     Prints help information

    OPTIONS:
      --profile <path>               ./tts160.toml
      --port <device>                Serial device, overrides the profile's com_port
      --log_dir <path>               .
      --log_file <file>              tts160_log.txt
    ";

    let mut pargs = Arguments::from_env();
    if pargs.contains(["-h", "--help"]) {
        println!("{}", HELP);
        std::process::exit(0);
    }
    let args = AppArgs {
        profile: pargs.value_from_str("--profile").
            unwrap_or(PathBuf::from("./tts160.toml")),
        port: pargs.opt_value_from_str("--port").unwrap_or(None),
        log_dir: pargs.value_from_str("--log_dir").
            unwrap_or(".".to_string()),
        log_file: pargs.value_from_str("--log_file").
            unwrap_or("tts160_log.txt".to_string()),
    };

    // Set up logging.
    let file_appender = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&args.log_file)
        .max_log_files(10)
        .build(&args.log_dir) {
            Ok(appender) => appender,
            Err(e) => {
                eprintln!("Cannot log to {}: {}", args.log_dir, e);
                std::process::exit(1);
            }
        };

    // Create non-blocking writers for both the file and stdout
    let (non_blocking_file, _guard1) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(file_appender);
    let (non_blocking_stdout, _guard2) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(std::io::stdout());
    registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking_stdout))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking_file))
        .init();
    let remaining = pargs.finish();
    if !remaining.is_empty() {
        warn!("Ignoring unrecognized arguments {:?}", remaining);
    }

    let mut profile = match Profile::load(&args.profile) {
        Ok(profile) => profile,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        profile.com_port = port;
    }
    let mount = Arc::new(Mount::new(profile));

    let mount2 = mount.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Got control-c");
        if mount2.is_connected() {
            mount2.abort_slew();
            mount2.disconnect();
        }
        std::thread::sleep(Duration::from_secs(1));
        info!("Exiting");
        std::process::exit(-1);
    }) {
        warn!("Could not install control-c handler: {}", e);
    }

    async_main(mount);
}

#[tokio::main]
async fn async_main(mount: Arc<Mount>) {
    // If any thread panics, bail out.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Thread panicked: {}", panic_info);
        std::process::exit(1);
    }));

    let com_port = mount.profile().com_port.clone();
    let mount2 = mount.clone();
    match tokio::task::spawn_blocking(move || mount2.connect_serial()).await {
        Ok(Ok(())) => info!("Mount connected on {}", com_port),
        Ok(Err(e)) => warn!("Mount not connected on {}: {}; waiting for a client \
                             to connect", com_port, e),
        Err(e) => warn!("Connect task failed: {}", e),
    }

    let port = mount.profile().alpaca_port;
    info!("Serving Alpaca on port {}", port);
    let alpaca_server = create_alpaca_server(mount, port);
    if let Err(e) = alpaca_server.start().await {
        error!("Alpaca server failed: {:?}", e);
    }
}
