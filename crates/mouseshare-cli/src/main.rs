//! mouseshare CLI: user-facing binary for the mouseshare daemon.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "mouseshare",
    about = "Share one mouse and keyboard across hosts on the local network",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the mouseshare daemon.
    Start {
        /// Path to the settings file.
        #[arg(short, long)]
        settings: Option<String>,
    },

    /// Stop the running daemon.
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { settings } => start_daemon(settings.as_deref()).await?,
        Commands::Stop => stop_daemon()?,
    }

    Ok(())
}

async fn start_daemon(settings_path: Option<&str>) -> anyhow::Result<()> {
    use mouseshare_daemon::{setup, Controller, ControllerEvent};
    use mouseshare_protocol::TcpTransport;
    use mouseshare_types::ScreenSize;
    use std::net::SocketAddr;

    let settings = setup::load_settings(settings_path)?;
    let local_id = setup::load_or_create_peer_id()?;

    // Write PID file
    let pid_path = setup::pid_file_path();
    std::fs::write(&pid_path, std::process::id().to_string())?;
    tracing::info!(pid_file = %pid_path.display(), "wrote PID file");

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", settings.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;
    let transport = TcpTransport::bind(bind_addr).await?;

    // Input backends
    #[cfg(feature = "mock")]
    let (capture, injector) = {
        use mouseshare_input::mock::{MockCapture, MockInjector};
        use mouseshare_types::Rect;

        tracing::warn!("running with mock input backends (loopback demo build)");
        let (capture, _feed) = MockCapture::new();
        let injector = MockInjector::new(Rect::new(
            0.0,
            0.0,
            f64::from(settings.screen_width),
            f64::from(settings.screen_height),
        ));
        (
            Box::new(capture) as Box<dyn mouseshare_input::EventCapture>,
            Box::new(injector) as Box<dyn mouseshare_input::EventInjector>,
        )
    };

    #[cfg(not(feature = "mock"))]
    {
        anyhow::bail!("no input backend available for this platform");
    }

    #[cfg(feature = "mock")]
    {
        let screen = ScreenSize::new(settings.screen_width, settings.screen_height);
        let port = settings.port;
        let name = settings.name.clone();

        let mut controller =
            Controller::new(settings, local_id, transport, capture, injector);
        controller.set_settings_path(match settings_path {
            Some(p) => p.into(),
            None => setup::default_settings_path(),
        });

        #[cfg(feature = "system-clipboard")]
        controller.set_clipboard(Box::new(
            mouseshare_clipboard::system::SystemClipboard::new(),
        ));

        let (discovery, discovery_rx) =
            mouseshare_discovery::DiscoveryService::start(local_id, &name, port, screen).await?;
        controller.attach_discovery(discovery, discovery_rx);

        // Signal handling
        let shutdown_tx = controller.event_sender();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                    .expect("failed to register SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }

            let _ = shutdown_tx.send(ControllerEvent::Shutdown).await;
        });

        tracing::info!(id = %local_id, bind = %bind_addr, "starting mouseshare daemon");
        controller.run().await?;

        let _ = std::fs::remove_file(&pid_path);
        tracing::info!("daemon stopped");
        Ok(())
    }
}

fn stop_daemon() -> anyhow::Result<()> {
    use mouseshare_daemon::setup;

    let pid_path = setup::pid_file_path();
    if !pid_path.exists() {
        anyhow::bail!("no PID file found — daemon may not be running");
    }

    let pid_str = std::fs::read_to_string(&pid_path)?;
    let pid: u32 = pid_str.trim().parse()?;

    tracing::info!(pid, "sending SIGTERM to daemon");

    let status = std::process::Command::new("kill")
        .args(["-s", "TERM", &pid.to_string()])
        .status()?;

    if !status.success() {
        anyhow::bail!("failed to send SIGTERM to PID {pid}");
    }

    println!("Sent stop signal to mouseshare daemon (PID {pid})");
    Ok(())
}
