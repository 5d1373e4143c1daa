//! Parley command-line voice client

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use parley_client::args::Args;
use parley_client::config::{API_KEY_ENV, Settings};
use parley_client::network::LiveTransport;
use parley_client::voice::{
    CpalPlatform, LifecycleState, SessionHandle, list_input_devices, list_output_devices,
};

/// Log filter used when RUST_LOG is not set
fn default_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("info,parley=debug,parley_client=debug")
    } else {
        EnvFilter::new("warn,parley=info,parley_client=info")
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_devices() {
    println!("Input devices:");
    for device in list_input_devices() {
        println!("  {}", device);
    }
    println!("Output devices:");
    for device in list_output_devices() {
        println!("  {}", device);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    if args.list_devices {
        print_devices();
        return ExitCode::SUCCESS;
    }

    let mut settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    settings.apply_env(|name| std::env::var(name).ok());
    args.apply(&mut settings);

    if args.save {
        return match settings.save(args.config.as_deref()) {
            Ok(path) => {
                println!("Saved settings to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    if !settings.has_api_key() {
        eprintln!(
            "No API key configured. Set {} or pass --api-key.",
            API_KEY_ENV
        );
        return ExitCode::FAILURE;
    }

    // rustls needs a process-wide provider before the first TLS handshake
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("Crypto provider already installed");
    }

    let transport = Arc::new(LiveTransport::new(
        settings.endpoint.clone(),
        settings.api_key.clone(),
    ));
    let platform = CpalPlatform::new(
        settings.input_device.clone(),
        settings.output_device.clone(),
    );

    let handle = match SessionHandle::spawn(platform, transport, settings.session_config()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut status = handle.subscribe();
    handle.start();
    println!("Press Ctrl-C to stop.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut was_active = false;
    let exit = loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break ExitCode::FAILURE;
                }
                let current = status.borrow_and_update().clone();
                println!("{}", current);
                match current.state {
                    LifecycleState::Error => break ExitCode::FAILURE,
                    LifecycleState::Idle if was_active => break ExitCode::SUCCESS,
                    LifecycleState::Idle => {}
                    LifecycleState::Connecting | LifecycleState::Connected => was_active = true,
                }
            }
            _ = &mut ctrl_c => {
                println!("Stopping...");
                break ExitCode::SUCCESS;
            }
        }
    };

    // Joining waits on audio teardown, keep it off the async workers
    if tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .is_err()
    {
        error!("Session shutdown did not complete");
    }

    exit
}
