//! gatectl - command line remote for the gate controller

use clap::{Parser, Subcommand};
use gatelink::credentials::{CredentialStore, Credentials, FileCredentialStore, ProfileUpdate};
use gatelink::observability::{init_default_logging, init_logging, metrics::metrics, LogFormat};
use gatelink::protocol::{GateAction, NotificationTopic, StatisticsResetType};
use gatelink::routing::{GateEvent, Notification};
use gatelink::{ConnectionStatus, GateClient, GateConfig, GateError, GateHandle, MqttTransport};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Level};

/// Remote control for a gate/garage controller over MQTT
#[derive(Parser)]
#[command(name = "gatectl")]
#[command(about = "Remote control for a gate/garage controller over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store broker credentials
    Login {
        #[arg(short, long)]
        username: String,
        /// Password (prefer the environment variable over the flag)
        #[arg(short, long, env = "GATE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Connect once to check the credentials
        #[arg(long)]
        verify: bool,
    },
    /// Forget stored credentials
    Logout,
    /// Show or update the user profile
    Profile {
        /// Name sent with gate commands
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },
    /// Print status changes, gate status, statistics and notifications until Ctrl-C
    Watch,
    /// Trigger a gate action (gate, partial, small-gate, light, learning)
    Press {
        action: GateAction,
        /// Seconds to wait for the controller's acknowledgement
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Reset activation counters (24h, total, all)
    ResetStats {
        scope: StatisticsResetType,
        #[arg(long, default_value_t = 10)]
        wait: u64,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Stay connected for a while, then print client metrics as JSON
    Metrics {
        #[arg(long, default_value_t = 10)]
        duration: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::INFO, LogFormat::Compact, false),
        2 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    }

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };
    let store = FileCredentialStore::new(config.store.resolve_dir());

    let result = match cli.command {
        Commands::Login {
            username,
            password,
            verify,
        } => handle_login(&config, &store, Credentials::new(username, password), verify).await,
        Commands::Logout => handle_logout(&store).await,
        Commands::Profile { name, image } => handle_profile(&store, name, image).await,
        Commands::Watch => handle_watch(&config, &store).await,
        Commands::Press { action, wait } => handle_press(&config, &store, action, wait).await,
        Commands::ResetStats { scope, wait } => {
            handle_reset_stats(&config, &store, scope, wait).await
        }
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Metrics { duration } => handle_metrics(&config, &store, duration).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<GateConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(GateConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["gatelink.toml", "config/gatelink.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(GateConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found, using defaults and environment");
            Ok(GateConfig::from_env()?)
        }
    }
}

/// Spawn the client and activate it with the stored credentials
async fn connect(
    config: &GateConfig,
    store: &FileCredentialStore,
) -> Result<(GateHandle, JoinHandle<()>), Box<dyn std::error::Error>> {
    let credentials = store
        .load_credentials()
        .await?
        .ok_or(GateError::MissingCredentials)?;
    connect_with(config, credentials).await
}

async fn connect_with(
    config: &GateConfig,
    credentials: Credentials,
) -> Result<(GateHandle, JoinHandle<()>), Box<dyn std::error::Error>> {
    let (handle, task) = GateClient::spawn(MqttTransport::new(), config);
    handle.activate(credentials).await?;
    Ok((handle, task))
}

/// Wait for `Connected` within the configured window
async fn wait_connected(
    handle: &GateHandle,
    config: &GateConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let window = config.session.connection_timeout();
    tokio::time::timeout(window, handle.wait_connected())
        .await
        .map_err(|_| GateError::Timeout(format!("connection after {}s", window.as_secs())))??;
    Ok(())
}

async fn disconnect(handle: GateHandle, task: JoinHandle<()>) {
    if let Err(e) = handle.shutdown().await {
        warn!("Client already stopped: {}", e);
    }
    if let Err(e) = task.await {
        error!("Gate client task failed: {}", e);
    }
}

/// Wait for a notification on `topic`
async fn wait_for_notification(
    events: &mut broadcast::Receiver<GateEvent>,
    topic: &str,
    wait: Duration,
) -> Option<Notification> {
    let wanted = async {
        loop {
            match events.recv().await {
                Ok(GateEvent::Notification(notification)) if notification.topic == topic => {
                    return Some(notification);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(wait, wanted).await.ok().flatten()
}

async fn handle_login(
    config: &GateConfig,
    store: &FileCredentialStore,
    credentials: Credentials,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !credentials.is_complete() {
        return Err("Username and password must not be empty".into());
    }

    if verify {
        let (handle, task) = connect_with(config, credentials.clone()).await?;
        let outcome = wait_connected(&handle, config).await;
        disconnect(handle, task).await;
        outcome?;
        println!("Credentials accepted by the broker");
    }

    store.save_credentials(&credentials).await?;
    println!(
        "Credentials for '{}' saved to {}",
        credentials.username,
        store.dir().display()
    );
    Ok(())
}

async fn handle_logout(store: &FileCredentialStore) -> Result<(), Box<dyn std::error::Error>> {
    store.clear_credentials().await?;
    println!("Logged out");
    Ok(())
}

async fn handle_profile(
    store: &FileCredentialStore,
    name: Option<String>,
    image: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = if name.is_none() && image.is_none() {
        store.load_profile().await?.unwrap_or_default()
    } else {
        store
            .update_profile(ProfileUpdate {
                display_name: name,
                profile_image: image,
            })
            .await?
    };
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

async fn handle_watch(
    config: &GateConfig,
    store: &FileCredentialStore,
) -> Result<(), Box<dyn std::error::Error>> {
    let (handle, task) = connect(config, store).await?;
    let mut status = handle.watch_status();
    let mut events = handle.events();

    println!("Watching {} (Ctrl-C to stop)", config.broker.url()?);
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                match handle.latest_error() {
                    Some(e) if current == ConnectionStatus::Error => println!("[status] {current} ({e})"),
                    _ => println!("[status] {current}"),
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    disconnect(handle, task).await;
    Ok(())
}

fn print_event(event: &GateEvent) {
    match event {
        GateEvent::StatusUpdated(status) => match &status.data {
            Some(data) => println!(
                "[gate] {} position={} photocells={} consumption={}",
                data.state.label(),
                data.position,
                data.photocells.label(),
                data.consumption
            ),
            None => println!("[gate] no sensor data"),
        },
        GateEvent::StatisticsUpdated(statistics) => println!(
            "[stats] 24h gate={} partial={} small_gate={} light={} | total gate={} partial={} small_gate={} light={}",
            statistics.last_24h.gate,
            statistics.last_24h.partial,
            statistics.last_24h.small_gate,
            statistics.last_24h.garage_light,
            statistics.total.gate,
            statistics.total.partial,
            statistics.total.small_gate,
            statistics.total.garage_light
        ),
        GateEvent::Notification(notification) => {
            let tag = if notification.is_error { "error" } else { "info" };
            println!("[{tag}] {}", notification.message);
        }
        GateEvent::Advisory(message) => println!("[warn] {message}"),
    }
}

async fn handle_press(
    config: &GateConfig,
    store: &FileCredentialStore,
    action: GateAction,
    wait: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = store.load_profile().await?.unwrap_or_default();
    let (handle, task) = connect(config, store).await?;
    let outcome = press_and_acknowledge(&handle, config, action, profile.author(), wait).await;
    disconnect(handle, task).await;
    outcome
}

async fn press_and_acknowledge(
    handle: &GateHandle,
    config: &GateConfig,
    action: GateAction,
    author: Option<&str>,
    wait: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    wait_connected(handle, config).await?;
    let mut events = handle.events();
    handle.press(action, author).await?;
    info!(action = %action, "Command sent");

    let topic = action.acknowledgement_topic();
    match wait_for_notification(&mut events, topic.as_str(), Duration::from_secs(wait)).await {
        Some(notification) => report_acknowledgement(notification),
        None => {
            println!("Command sent to {}, no acknowledgement within {wait}s", action.topic());
            Ok(())
        }
    }
}

async fn handle_reset_stats(
    config: &GateConfig,
    store: &FileCredentialStore,
    scope: StatisticsResetType,
    wait: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (handle, task) = connect(config, store).await?;
    let outcome = reset_and_acknowledge(&handle, config, scope, wait).await;
    disconnect(handle, task).await;
    outcome
}

async fn reset_and_acknowledge(
    handle: &GateHandle,
    config: &GateConfig,
    scope: StatisticsResetType,
    wait: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    wait_connected(handle, config).await?;
    let mut events = handle.events();
    handle.reset_statistics(scope).await?;

    let topic = NotificationTopic::StatisticsReset.as_str();
    match wait_for_notification(&mut events, topic, Duration::from_secs(wait)).await {
        Some(notification) => report_acknowledgement(notification),
        None => {
            println!("Reset of '{}' requested, no acknowledgement within {wait}s", scope.as_str());
            Ok(())
        }
    }
}

fn report_acknowledgement(notification: Notification) -> Result<(), Box<dyn std::error::Error>> {
    if notification.is_error {
        return Err(notification.message.into());
    }
    println!("{}", notification.message);
    Ok(())
}

fn handle_config_command(
    config: &GateConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    println!("Configuration is valid (broker: {})", config.broker.url()?);
    Ok(())
}

async fn handle_metrics(
    config: &GateConfig,
    store: &FileCredentialStore,
    duration: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (handle, task) = connect(config, store).await?;

    tokio::select! {
        _ = signal::ctrl_c() => info!("Received Ctrl-C, stopping early"),
        _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
    }

    disconnect(handle, task).await;
    println!("{}", serde_json::to_string_pretty(&metrics().get_metrics())?);
    Ok(())
}
