mod cli;
mod driver;
mod monitor;
mod reconciler;
mod service;
mod supervisor;

use std::process;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::signal::unix::{signal, SignalKind};

use splitroute_core::logging::{self, LogReloadHandle};
use splitroute_core::managed_set::ManagedSet;

use cli::{Cli, Command};
use driver::RouteDriver;
use reconciler::Reconciler;
use supervisor::Supervisor;

// Avoid musl's default allocator due to degraded performance under the
// route-convergence workload's bursts of small concurrent allocations.
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

enum SignalMessage {
    Shutdown,
    RotateLogs,
}

async fn signal_channel() -> Result<mpsc::Receiver<SignalMessage>, exitcode::ExitCode> {
    let (sender, receiver) = mpsc::channel(32);
    let mut sigint = signal(SignalKind::interrupt()).map_err(|error| {
        tracing::error!(?error, "error setting up SIGINT handler");
        exitcode::IOERR
    })?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|error| {
        tracing::error!(?error, "error setting up SIGTERM handler");
        exitcode::IOERR
    })?;
    // SIGHUP is reserved for log-reload, not shutdown.
    let mut sighup = signal(SignalKind::hangup()).map_err(|error| {
        tracing::error!(?error, "error setting up SIGHUP handler");
        exitcode::IOERR
    })?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(_) = sigint.recv() => {
                    tracing::debug!("received SIGINT");
                    if sender.send(SignalMessage::Shutdown).await.is_err() {
                        break;
                    }
                },
                Some(_) = sigterm.recv() => {
                    tracing::debug!("received SIGTERM");
                    if sender.send(SignalMessage::Shutdown).await.is_err() {
                        break;
                    }
                },
                Some(_) = sighup.recv() => {
                    tracing::debug!("received SIGHUP");
                    if sender.send(SignalMessage::RotateLogs).await.is_err() {
                        break;
                    }
                }
                else => {
                    tracing::warn!("signal streams closed");
                    break;
                }
            }
        }
    });

    Ok(receiver)
}

fn build_driver() -> Result<Arc<dyn RouteDriver>, exitcode::ExitCode> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            driver::linux::NetlinkDriver::new()
                .map(|d| Arc::new(d) as Arc<dyn RouteDriver>)
                .map_err(|error| {
                    tracing::error!(%error, "failed to open netlink route driver");
                    exitcode::OSERR
                })
        } else if #[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))] {
            driver::bsd::RouteSocketDriver::new()
                .map(|d| Arc::new(d) as Arc<dyn RouteDriver>)
                .map_err(|error| {
                    tracing::error!(%error, "failed to open route socket driver");
                    exitcode::OSERR
                })
        } else {
            tracing::error!("no route driver implementation for this platform");
            Err(exitcode::UNAVAILABLE)
        }
    }
}

fn load_managed_set(args: &Cli) -> Result<ManagedSet, exitcode::ExitCode> {
    ManagedSet::load(args.route_file.as_deref(), args.dns_file.as_deref()).map_err(|error| {
        tracing::error!(%error, "failed to load managed prefix set");
        exitcode::CONFIG
    })
}

async fn run_once(args: Cli) -> Result<(), exitcode::ExitCode> {
    let driver = build_driver()?;
    let managed_set = load_managed_set(&args)?;

    let reconciler = Reconciler::new(driver.as_ref(), &managed_set);
    reconciler.init_routes().await.map_err(|error| {
        tracing::error!(%error, "one-shot convergence failed");
        exitcode::SOFTWARE
    })?;

    let _ = driver.close().await;
    Ok(())
}

async fn run_daemon(args: Cli, reload_handle: LogReloadHandle, log_path: String) -> Result<(), exitcode::ExitCode> {
    let driver = build_driver()?;
    let managed_set = load_managed_set(&args)?;

    let supervisor = Arc::new(Supervisor::new(driver, managed_set));
    let mut signal_receiver = signal_channel().await?;

    let signal_supervisor = Arc::clone(&supervisor);
    tokio::spawn(async move {
        while let Some(message) = signal_receiver.recv().await {
            match message {
                SignalMessage::Shutdown => {
                    tracing::info!("shutdown requested");
                    signal_supervisor.stop();
                    break;
                }
                SignalMessage::RotateLogs => {
                    if let Err(error) = logging::reload(&reload_handle, &log_path) {
                        tracing::warn!(%error, "failed to reopen log file");
                    } else {
                        tracing::info!("log file reopened");
                    }
                }
            }
        }
    });

    supervisor.run().await.map_err(|error| {
        tracing::error!(%error, "supervisor exited with an error");
        exitcode::SOFTWARE
    })
}

async fn run_service_command(command: Command) -> Result<(), exitcode::ExitCode> {
    match command {
        Command::Install => service::install().await.map_err(|error| {
            tracing::error!(%error, "service installation failed");
            exitcode::OSERR
        }),
        Command::Uninstall => service::uninstall().await.map_err(|error| {
            tracing::error!(%error, "service removal failed");
            exitcode::OSERR
        }),
        Command::Status => {
            let status = service::status().await.map_err(|error| {
                tracing::error!(%error, "service status query failed");
                exitcode::OSERR
            })?;
            match status {
                service::Status::Installed => println!("installed"),
                service::Status::NotInstalled => println!("not installed"),
            }
            Ok(())
        }
        Command::Run | Command::Daemon => unreachable!("dispatched in daemon()"),
    }
}

async fn daemon(args: Cli) -> Result<(), exitcode::ExitCode> {
    let (reload_handle, log_path) = logging::init(args.silent, args.verbose);

    match args.command() {
        Command::Run => run_once(args).await,
        Command::Daemon => run_daemon(args, reload_handle, log_path).await,
        command => run_service_command(command).await,
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    let args = cli::parse();

    match daemon(args).await {
        Ok(_) => (),
        Err(exitcode::OK) => (),
        Err(code) => {
            tracing::warn!("abnormal exit");
            process::exit(code);
        }
    }
}
