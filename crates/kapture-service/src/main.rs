//! Kapture demo binary.
//!
//! Lists the attached keyboards and mice, then captures every keyboard:
//! space is swallowed, everything else passes, and Escape ends the run.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load CaptureConfig           -- TOML, defaults when absent
//!  └─ CaptureController::new()     -- Windows or simulated channels
//!  └─ register ".*" handler
//!  └─ start_capture()
//!       ├─ hook pump   (correlate + dispatch)
//!       └─ raw pump    (enqueue raw events, hot-plug refresh)
//!  └─ wait for Escape, stop_capture()
//! ```
//!
//! With `--simulate` the run uses in-process channels and a scripted key
//! sequence, so it works on every platform.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kapture_core::{
    CapturedEvent, Decision, DeviceClass, DeviceHandle, KeyboardEvent, KeyboardHandler,
    RawDeviceDescriptor,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kapture_service::infrastructure::channels::simulated::SimulatedInput;
use kapture_service::infrastructure::channels::{HookChannel, RawChannel};
use kapture_service::infrastructure::storage::config::{
    load_config, load_config_from, CaptureConfig, ConfigError,
};
use kapture_service::CaptureController;

const VK_RETURN: u32 = 0x0D;
const VK_ESCAPE: u32 = 0x1B;
const VK_SPACE: u32 = 0x20;
const VK_A: u32 = 0x41;

/// Kapture: per-device keyboard and mouse capture.
#[derive(Debug, Parser)]
#[command(name = "kapture", version)]
struct Cli {
    /// Config file to load instead of the platform default.
    #[arg(long, env = "KAPTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Run against simulated channels with a scripted key sequence.
    #[arg(long, env = "KAPTURE_SIMULATE")]
    simulate: bool,
}

/// Swallows space, permits everything else, and flags Escape.
struct DemoHandler {
    stop: Arc<AtomicBool>,
}

impl KeyboardHandler for DemoHandler {
    fn handle_key_event(&self, event: &mut KeyboardEvent) {
        let device = event.device().map(|d| d.name().to_string()).unwrap_or_default();
        info!(
            device = %device,
            vkey = event.vkey(),
            key_up = event.is_key_up(),
            "key"
        );
        if event.vkey() == VK_ESCAPE && event.is_key_up() {
            self.stop.store(true, Ordering::SeqCst);
        }
        let decision = if event.vkey() == VK_SPACE {
            Decision::Consume
        } else {
            Decision::Permit
        };
        event.set_decision(decision);
    }
}

fn read_config(cli: &Cli) -> anyhow::Result<CaptureConfig> {
    match &cli.config {
        Some(path) => load_config_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => match load_config() {
            Err(ConfigError::NoPlatformConfigDir) => Ok(CaptureConfig::default()),
            other => other.context("failed to load config"),
        },
    }
}

#[cfg(target_os = "windows")]
fn platform_channels() -> anyhow::Result<(Arc<dyn HookChannel>, Arc<dyn RawChannel>)> {
    use kapture_service::infrastructure::channels::windows::{
        WindowsHookChannel, WindowsRawChannel,
    };
    Ok((
        Arc::new(WindowsHookChannel::new()),
        Arc::new(WindowsRawChannel::new()),
    ))
}

#[cfg(not(target_os = "windows"))]
fn platform_channels() -> anyhow::Result<(Arc<dyn HookChannel>, Arc<dyn RawChannel>)> {
    anyhow::bail!("no platform capture channels on this OS; run with --simulate")
}

const SIM_KEYBOARD: DeviceHandle = DeviceHandle(0x1001);
const SIM_MOUSE: DeviceHandle = DeviceHandle(0x2001);

fn simulated_devices() -> Vec<RawDeviceDescriptor> {
    vec![
        RawDeviceDescriptor::new(
            SIM_KEYBOARD,
            DeviceClass::Keyboard,
            r"\\?\HID#VID_046D&PID_C31C#sim-keyboard",
        ),
        RawDeviceDescriptor::new(
            SIM_MOUSE,
            DeviceClass::Mouse,
            r"\\?\HID#VID_046D&PID_C077#sim-mouse",
        ),
    ]
}

/// Types "a", space, return and Escape on the simulated keyboard.
fn run_script(input: &SimulatedInput) {
    for vkey in [VK_A, VK_SPACE, VK_RETURN, VK_ESCAPE] {
        for key_up in [false, true] {
            let verdict = input.key(SIM_KEYBOARD, vkey, key_up);
            info!(vkey, key_up, ?verdict, "simulated key");
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = read_config(&cli)?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(simulate = cli.simulate, "Kapture starting");

    let simulated = cli.simulate.then(|| SimulatedInput::new(simulated_devices()));
    let (hook, raw) = match &simulated {
        Some(input) => input.channels(),
        None => platform_channels()?,
    };
    let controller = CaptureController::new(hook, raw, config.controller_settings());

    for keyboard in controller.enumerate_keyboards() {
        info!(handle = %keyboard.handle(), name = keyboard.name(), "keyboard");
    }
    for mouse in controller.enumerate_mice() {
        info!(handle = %mouse.handle(), name = mouse.name(), "mouse");
    }

    let stop = Arc::new(AtomicBool::new(false));
    controller.register_keyboard_handler(
        ".*",
        Arc::new(DemoHandler {
            stop: Arc::clone(&stop),
        }),
    )?;

    controller
        .start_capture(config.capture_options())
        .context("failed to start capture")?;
    info!("capturing; press Escape to stop");

    match &simulated {
        Some(input) => run_script(input),
        None => {
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    controller.stop_capture().context("failed to stop capture")?;
    info!("Kapture stopped");
    Ok(())
}
