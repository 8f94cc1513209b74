//! Command handlers for the blep CLI

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ble_peripheral_core::codec;
use ble_peripheral_core::{
    AdvertisementConfig, DiscoveredPeripheral, PeripheralConfig, PeripheralController,
    PeripheralHandle, PeripheralService, RadioCapability, RadioStatus, RawAdvertisement,
    ScanResultRecord, SimulatedRadio, TEST_COMPANY_ID,
};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::Result;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command, writing results to stdout
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        let mut stdout = std::io::stdout();
        Self::execute_with_output(cli.command, cli.simulate, &config, &mut stdout).await
    }

    pub async fn execute_with_output(
        command: Commands,
        simulate: bool,
        config: &AppConfig,
        out: &mut dyn Write,
    ) -> Result<()> {
        let (radio, demo) = select_radio(simulate);
        let session = Session::open(radio, &config.peripheral).await;

        let result = match command {
            Commands::Advertise {
                company_id,
                data,
                name,
                service_uuid,
                tx_power,
                duration,
            } => {
                let company_id = company_id.unwrap_or(config.cli.default_company_id);
                match parse_advertisement(company_id, data.as_deref()) {
                    Ok(mut advertisement) => {
                        advertisement.local_name = name;
                        advertisement.service_uuid = service_uuid;
                        advertisement.include_tx_power = tx_power;
                        Self::handle_advertise_command(&session, advertisement, duration, out)
                            .await
                    }
                    Err(e) => Err(e),
                }
            }
            Commands::Scan { duration, json } => {
                let duration = duration.unwrap_or(config.cli.scan_duration_secs);
                let json = json || config.cli.json_output;
                Self::handle_scan_command(&session, duration, json, out).await
            }
            Commands::Status => {
                let backend = if simulate {
                    "simulated"
                } else {
                    ble_peripheral_native::backend_name()
                };
                Self::handle_status_command(&session, backend, out).await
            }
        };

        session.close().await;
        if let Some(demo) = demo {
            demo.abort();
        }
        result
    }

    /// Advertise until the duration elapses or Ctrl-C
    async fn handle_advertise_command(
        session: &Session,
        advertisement: AdvertisementConfig,
        duration: Option<u64>,
        out: &mut dyn Write,
    ) -> Result<()> {
        session.handle.start_with(advertisement.clone()).await?;
        write!(out, "advertising")?;
        if let Some(data) = &advertisement.manufacturer_data {
            write!(out, " {}", data)?;
        }
        if let Some(name) = &advertisement.local_name {
            write!(out, " name={}", name)?;
        }
        if let Some(uuid) = &advertisement.service_uuid {
            write!(out, " service={}", uuid)?;
        }
        writeln!(out)?;
        out.flush()?;

        wait_for_exit(duration.map(Duration::from_secs)).await?;

        session.handle.stop().await?;
        writeln!(out, "stopped")?;
        Ok(())
    }

    /// Print scan results until the duration elapses or Ctrl-C
    async fn handle_scan_command(
        session: &Session,
        duration_secs: u64,
        json: bool,
        out: &mut dyn Write,
    ) -> Result<()> {
        let duration = (duration_secs > 0).then(|| Duration::from_secs(duration_secs));
        let mut results = session.handle.subscribe_scan_results().await?;
        info!("Scanning for advertisements...");

        let deadline = deadline(duration);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(deadline, ctrl_c);

        let mut seen = 0usize;
        loop {
            tokio::select! {
                found = results.next() => match found {
                    Some(peripheral) => {
                        print_result(out, &peripheral, json)?;
                        seen += 1;
                    }
                    None => break,
                },
                _ = &mut deadline => break,
                signal = &mut ctrl_c => {
                    signal?;
                    break;
                }
            }
        }

        session.handle.unsubscribe_scan_results().await?;
        info!("Scan finished with {} results", seen);
        Ok(())
    }

    async fn handle_status_command(
        session: &Session,
        backend: &str,
        out: &mut dyn Write,
    ) -> Result<()> {
        let state = serde_json::to_value(session.handle.state().await?)?;
        let supported = session.handle.is_supported().await?;

        writeln!(out, "backend:   {}", backend)?;
        writeln!(out, "radio:     {}", describe_radio(&session.radio_status))?;
        writeln!(out, "state:     {}", state.as_str().unwrap_or_default())?;
        writeln!(out, "supported: {}", supported)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Session Setup
// ----------------------------------------------------------------------------

struct Session {
    handle: PeripheralHandle,
    task: JoinHandle<()>,
    radio_status: RadioStatus,
}

impl Session {
    async fn open(radio: Arc<dyn RadioCapability>, config: &PeripheralConfig) -> Self {
        let mut controller = PeripheralController::new(radio, config.clone());
        let radio_status = match controller.wait_for_radio().await {
            Ok(status) => status,
            Err(e) => {
                warn!("Radio not ready: {}", e);
                controller.radio_status()
            }
        };
        let (handle, task) = PeripheralService::spawn(controller);
        Self {
            handle,
            task,
            radio_status,
        }
    }

    async fn close(self) {
        if let Err(e) = self.handle.shutdown().await {
            warn!("Peripheral service already stopped: {}", e);
        }
        if let Err(e) = self.task.await {
            warn!("Peripheral service task failed: {}", e);
        }
    }
}

fn select_radio(simulate: bool) -> (Arc<dyn RadioCapability>, Option<JoinHandle<()>>) {
    if simulate {
        info!("Using simulated radio");
        let simulated = Arc::new(SimulatedRadio::new());
        let demo = spawn_demo_traffic(Arc::clone(&simulated));
        let radio: Arc<dyn RadioCapability> = simulated;
        (radio, Some(demo))
    } else {
        (ble_peripheral_native::default_radio(), None)
    }
}

/// Feed the simulated radio a rotating set of nearby devices
fn spawn_demo_traffic(radio: Arc<SimulatedRadio>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        let mut round: u8 = 0;
        loop {
            ticker.tick().await;
            if !radio.emit(demo_advertisement(round)) {
                debug!("Simulated advertisement {} not picked up", round);
            }
            round = round.wrapping_add(1);
        }
    })
}

fn demo_advertisement(round: u8) -> RawAdvertisement {
    match round % 3 {
        0 => RawAdvertisement::new(0xC0FF_EE00_0001, -45 - i16::from(round % 5))
            .with_local_name("demo-beacon")
            .with_manufacturer_data(codec::encode(TEST_COMPANY_ID, &[round])),
        1 => RawAdvertisement::new(0xAABB_CCDD_EEFF, -71),
        _ => RawAdvertisement::new(0x0200_0000_00F1, -88)
            .with_local_name("demo-sensor")
            .with_manufacturer_data(vec![0x01]),
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Decode a hex payload; `0x` prefix, whitespace and `:` separators are ignored
pub fn parse_payload(data: &str) -> Result<Vec<u8>> {
    let data = data.trim();
    let data = data
        .strip_prefix("0x")
        .or_else(|| data.strip_prefix("0X"))
        .unwrap_or(data);
    let cleaned: String = data
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    Ok(hex::decode(cleaned)?)
}

fn parse_advertisement(company_id: u16, data: Option<&str>) -> Result<AdvertisementConfig> {
    let payload = match data {
        Some(data) => parse_payload(data)?,
        None => Vec::new(),
    };
    Ok(AdvertisementConfig::new().with_manufacturer_data(company_id, payload))
}

/// Colon-separated form of a 48-bit address
pub fn format_mac(address: u64) -> String {
    (0..6)
        .rev()
        .map(|i| format!("{:02X}", (address >> (i * 8)) & 0xFF))
        .collect::<Vec<_>>()
        .join(":")
}

fn describe_radio(status: &RadioStatus) -> String {
    match status {
        RadioStatus::Pending => "initializing".to_string(),
        RadioStatus::Ready(info) => format!(
            "{} [{}] {}",
            info.name,
            info.address.map(format_mac).unwrap_or_else(|| "unknown address".to_string()),
            if info.powered { "powered on" } else { "powered off" }
        ),
        RadioStatus::Unsupported(reason) => format!("unsupported ({})", reason),
        RadioStatus::Failed(reason) => format!("failed ({})", reason),
    }
}

fn print_result(out: &mut dyn Write, peripheral: &DiscoveredPeripheral, json: bool) -> Result<()> {
    if json {
        let record = ScanResultRecord::from(peripheral);
        writeln!(out, "{}", serde_json::to_string(&record)?)?;
    } else {
        let data = peripheral
            .manufacturer_data
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{:<20} {}  {:>4} dBm  {}",
            peripheral.name,
            format_mac(peripheral.address),
            peripheral.rssi,
            data
        )?;
    }
    out.flush()?;
    Ok(())
}

async fn deadline(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_exit(duration: Option<Duration>) -> Result<()> {
    tokio::select! {
        _ = deadline(duration) => Ok(()),
        signal = tokio::signal::ctrl_c() => Ok(signal?),
    }
}
