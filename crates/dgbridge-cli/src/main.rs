//! `dgbridge` – runs a bridge next to a demo signal graph.
//!
//! 1. Loads `~/.dgbridge/config.toml`, writing the defaults on first run.
//! 2. Builds the demo graph, a bus transport and a [`Bridge`] over them.
//! 3. Optionally serves the bus to rosbridge clients over WebSocket.
//! 4. Ticks the bridge at a fixed period, running shell lines between ticks,
//!    until `quit` or Ctrl-C.

mod config;
mod demo;
mod repl;

use colored::Colorize;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use std::time::Instant;

use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use dgbridge_middleware::{BridgeContext, BusTransport, ExportOptions, RosbridgeServer};
use dgbridge_perception::FallbackPolicy;
use dgbridge_runtime::{Bridge, init_tracing};
use dgbridge_types::{BridgeError, Tick};

use crate::config::Config;
use crate::repl::Flow;

/// Transform tracked out of the box, resolved against the demo `waist`
/// signal when the feed is silent or stale.
const TRACKED_NAME: &str = "waist_tf";
const TRACKED_TARGET: &str = "world";
const TRACKED_SOURCE: &str = "waist";

fn main() -> ExitCode {
    let _telemetry = init_tracing("dgbridge");

    print_banner();

    let cfg = match config::load_or_init() {
        Ok(cfg) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };

    match run(&cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bridge stopped");
            println!("{}: {}", "Fatal".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: &Config) -> Result<(), BridgeError> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the tick loop …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use `quit` to stop");
    }

    let bus = BusTransport::new();
    let context = BridgeContext::with_transport(Arc::new(bus.clone()));
    let signals = demo::signal_table(cfg.tick_period())?;
    let fallback = signals.require(TRACKED_SOURCE)?;

    let options = ExportOptions {
        publish_rate: cfg.publish_rate(),
    };
    let mut bridge = Bridge::with_signals(context, &cfg.suffix, signals, options);
    bridge.feed_transforms(&cfg.tf_topic)?;
    bridge.track_transform(
        TRACKED_NAME,
        TRACKED_TARGET,
        TRACKED_SOURCE,
        FallbackPolicy::new(cfg.max_staleness(), fallback)?,
    )?;

    // Held until the loop ends; dropping it stops the server.
    let _ws_runtime = if cfg.ws_enabled {
        start_rosbridge(&bus, cfg.ws_addr())
    } else {
        None
    };

    let commands = bridge.commands();
    println!();
    println!(
        "  Ticking every {} ms.  Type {} for a list of commands.\n",
        cfg.tick_period().as_millis(),
        "help".bold().cyan()
    );

    let mut lines: Option<Receiver<String>> = Some(repl::spawn_reader());
    let period = cfg.tick_period();
    let mut time: Tick = 0;
    let mut deadline = Instant::now();
    repl::prompt();

    while !shutdown.load(Ordering::SeqCst) {
        let mut closed = false;
        if let Some(rx) = lines.as_ref() {
            loop {
                match rx.try_recv() {
                    Ok(line) => {
                        if repl::handle_line(&commands, &line) == Flow::Quit {
                            shutdown.store(true, Ordering::SeqCst);
                            break;
                        }
                        repl::prompt();
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        info!("stdin closed; ticking until Ctrl-C");
                        closed = true;
                        break;
                    }
                }
            }
        }
        if closed {
            lines = None;
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        bridge.tick(time);
        time += 1;

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            debug!(time, overrun_us = (now - deadline).as_micros() as u64, "tick overran");
            deadline = now;
        }
    }

    info!(ticks = time, "bridge stopped");
    println!("{}", "  ✓ Exiting dgbridge.".green());
    Ok(())
}

/// Run the rosbridge server on its own Tokio runtime.
fn start_rosbridge(bus: &BusTransport, addr: SocketAddr) -> Option<Runtime> {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("dgbridge-ws")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Failed to start Tokio runtime; rosbridge server disabled");
            return None;
        }
    };

    let server = RosbridgeServer::new(bus.clone());
    runtime.spawn(async move {
        if let Err(e) = server.run_ws_server(addr).await {
            error!(error = %e, "rosbridge server stopped");
        }
    });
    println!("  rosbridge server on {}", format!("ws://{addr}").bold());
    Some(runtime)
}

fn print_banner() {
    println!();
    println!("  {} {}",
        "dgbridge".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Dataflow graph ⇄ topic bridge");
    println!();
}
