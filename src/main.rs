use color_eyre::{eyre::eyre, Result};
use edgenode::clock::SystemClock;
use edgenode::config::DeviceConfig;
use edgenode::controller::{Device, Services};
use edgenode::hal::host::{FileFirmwareStore, HostLink, HostSystem, ReqwestHttpClient};
use edgenode::logging::setup_logging;
use edgenode::mqtt::RumqttcTransport;
use edgenode::ota::version::CURRENT_VERSION;
use edgenode::persistence::config_store::ConfigStore;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_CONFIG: &str = "device.toml";
const TICK: Duration = Duration::from_millis(10);
const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let mut store = ConfigStore::begin(&config_path).await?;
    let changed = store.update_device_config().await?;
    let config = store.snapshot().clone();

    let level = setup_logging(&config.logging.level);
    info!("=== edgenode v{} ===", CURRENT_VERSION);
    info!("Log level: {}", level);
    if changed {
        info!("Adopted new configuration from {}", config_path.display());
    }
    info!("Configuration:\n{}", config.summary());

    let token = CancellationToken::new();
    let control_token = token.clone();
    let control = thread::Builder::new()
        .name("control".into())
        .spawn(move || {
            let result = run_control_loop(config, &control_token);
            control_token.cancel();
            result
        })
        .map_err(|e| eyre!("Failed to spawn control thread: {}", e))?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
            info!("Shutdown requested");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }

    tokio::task::spawn_blocking(move || control.join())
        .await?
        .map_err(|_| eyre!("Control thread panicked"))??;

    info!("Shutdown complete");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

/// Runs the device on the current thread until cancelled. A restart request
/// from the device tears everything down and boots it again from Setup.
fn run_control_loop(config: DeviceConfig, token: &CancellationToken) -> Result<()> {
    let mut boots: u32 = 0;

    while !token.is_cancelled() {
        boots += 1;
        let (system, restart_requested) = HostSystem::new();
        let http = ReqwestHttpClient::new(HTTP_TIMEOUT)
            .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

        let services = Services::new(
            config.clone(),
            Box::new(SystemClock::new()),
            Box::new(HostLink::new()),
            Box::new(RumqttcTransport::new(MQTT_CONNECT_TIMEOUT)),
            Box::new(http),
            Box::new(FileFirmwareStore::new(config.update.firmware_dir.as_str())),
            Box::new(system),
        );

        let mut device = Device::new(services);
        info!("Boot #{}", boots);
        device.start();

        while !token.is_cancelled() && !restart_requested.get() {
            device.tick();
            thread::sleep(TICK);
        }

        if restart_requested.get() {
            info!("Restarting device");
        }
        if let Some(state) = device.active_state() {
            debug!("Device stopped in {}", state);
        }
    }

    info!("Control loop stopped");
    Ok(())
}
