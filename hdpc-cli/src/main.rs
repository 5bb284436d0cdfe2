//! hdpcd: runs the supervisory state machine for a fleet of motor controllers on a SocketCAN
//! interface, with an interactive shell for operator commands.
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use hdpc_common::{
    device_config::{ConfigError, FleetConfig},
    open_socketcan,
    traits::{CanReceiver, CanSender},
    SocketCanSender,
};
use hdpc_master::{Bus, Device};
use hdpc_supervisor::{Event, EventResult, Supervisor, SupervisorError};
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

mod command;
use command::{parse_line, ShellCommand};

/// How long to keep the bus running on exit while disable commands drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(version, about = "Supervise a fleet of CANopen motor controllers")]
struct Args {
    /// The socketcan interface, e.g. can0 or vcan0
    interface: String,
    /// Path to the fleet configuration file
    config: PathBuf,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("Failed to load config: {source}"))]
    Config { source: ConfigError },
    #[snafu(display("Failed to open {interface}: {source}"))]
    Open {
        interface: String,
        source: std::io::Error,
    },
    #[snafu(display("{source}"))]
    Setup { source: SupervisorError },
    #[snafu(display("Failed to start runtime: {source}"))]
    Runtime { source: std::io::Error },
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let config = FleetConfig::load_from_file(&args.config).context(ConfigSnafu)?;
    let (sender, mut receiver) = open_socketcan(&args.interface).context(OpenSnafu {
        interface: args.interface.clone(),
    })?;

    let mut bus = Bus::new(sender, &config.bus);
    let devices: Vec<Device> = config.devices.iter().cloned().map(Device::new).collect();
    let mut supervisor = Supervisor::new(devices, &mut bus).context(SetupSnafu)?;

    let (tx, mut commands) = mpsc::unbounded_channel();
    let shell = spawn_shell(tx);

    // The bus and supervisor are not Send; everything runs on this thread
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context(RuntimeSnafu)?;

    let start = Instant::now();
    let period = Duration::from_millis(config.bus.sync_period_ms);
    rt.block_on(async {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_us = start.elapsed().as_micros() as u64;
                    while let Some(msg) = receiver.try_recv() {
                        bus.on_frame(&msg, now_us);
                    }
                    supervisor.process_event(Event::Execute, &mut bus);
                    bus.tick(now_us);
                }
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    handle_command(cmd, &mut supervisor, &mut bus);
                    if supervisor.is_terminated() {
                        break;
                    }
                }
            }
        }
    });

    // Leave the motors disabled on the way out
    for device in supervisor.devices_mut() {
        if let Err(e) = device.disable(&mut bus) {
            log::warn!("{e}");
        }
    }
    let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
    while bus.sdo().queued_len() + bus.sdo().in_flight_len() > 0 && Instant::now() < deadline {
        let now_us = start.elapsed().as_micros() as u64;
        while let Some(msg) = receiver.try_recv() {
            bus.on_frame(&msg, now_us);
        }
        bus.tick(now_us);
        std::thread::sleep(period);
    }

    if shell.join().is_err() {
        log::warn!("Shell thread panicked");
    }
    Ok(())
}

fn handle_command(
    cmd: ShellCommand,
    supervisor: &mut Supervisor<Device>,
    bus: &mut Bus<SocketCanSender>,
) {
    match cmd {
        ShellCommand::Mode { mode } => {
            supervisor.set_drive_mode(mode.into());
            println!("Drive mode: {:?}", supervisor.drive_mode());
        }
        ShellCommand::Velocity { values } => {
            if values.len() != supervisor.devices().len() {
                println!(
                    "Expected {} velocities, got {}; missing values are zero",
                    supervisor.devices().len(),
                    values.len()
                );
            }
            supervisor.set_velocities(&values);
        }
        cmd => {
            let Some(event) = cmd.event() else {
                return;
            };
            match supervisor.process_event(event, bus) {
                EventResult::Discarded => {
                    println!("{event:?} ignored in state {}", supervisor.state())
                }
                EventResult::Info(info) => {
                    println!("State: {}", info.state);
                    if let Some(n) = info.devices_remaining {
                        println!("Waiting for {n} devices");
                    }
                    print_devices(supervisor, bus);
                }
                EventResult::Transitioned(state) => println!("-> {state}"),
                EventResult::Handled => (),
            }
        }
    }
}

fn print_devices<S: CanSender>(supervisor: &Supervisor<Device>, bus: &Bus<S>) {
    fn fmt(v: Option<f64>) -> String {
        v.map(|v| format!("{v:.3}")).unwrap_or_else(|| "-".into())
    }
    for device in supervisor.devices() {
        let nmt = bus
            .nmt_state(device.node_id())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        let power = device
            .power_state()
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<20} node {:>3} {:<16} {:<20} pos {:>9} vel {:>9} cur {:>7}",
            device.name(),
            device.node_id(),
            nmt,
            power,
            fmt(device.get_position(bus)),
            fmt(device.get_velocity(bus)),
            fmt(device.get_current(bus)),
        );
    }
}

/// Read commands on a separate thread, since the line editor blocks
fn spawn_shell(tx: mpsc::UnboundedSender<ShellCommand>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut editor = Reedline::create();
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic("hdpcd".into()),
            DefaultPromptSegment::Empty,
        );
        loop {
            match editor.read_line(&prompt) {
                Ok(Signal::Success(line)) => match parse_line(&line) {
                    Ok(Some(cmd)) => {
                        let quit = cmd == ShellCommand::Quit;
                        if tx.send(cmd).is_err() || quit {
                            break;
                        }
                    }
                    Ok(None) => (),
                    Err(msg) => println!("{msg}"),
                },
                Ok(_) => {
                    let _ = tx.send(ShellCommand::Quit);
                    break;
                }
                Err(e) => {
                    log::error!("Shell error: {e}");
                    let _ = tx.send(ShellCommand::Quit);
                    break;
                }
            }
        }
    })
}
