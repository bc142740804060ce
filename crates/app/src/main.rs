use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand, ValueEnum};
use streamer_panel_core::{
    stream, ActionMap, ActionRunner, AppConfig, Command, FixedRate, InputPoller, MeterDaemon,
    PanelError, PeripheralController, RunFlag, ShellPlayback, SystemBus,
};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "exiting");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> streamer_panel_core::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::VuMeter { test, .. } => run_vu_meter(&config, test),
        Commands::Inputs { .. } => run_inputs(&config),
        Commands::Probe => run_probe(&config),
        Commands::Command { command } => run_command(&config, command),
    }
}

fn load_config(cli: &Cli) -> streamer_panel_core::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(device) = &cli.device {
        config.bus.device = device.clone();
    }
    if let Some(address) = cli.address {
        config.bus.address = address;
    }

    match &cli.command {
        Commands::VuMeter {
            pipe,
            rate,
            min_db,
            max_db,
            ..
        } => {
            if let Some(pipe) = pipe {
                config.meter.pipe_path = pipe.clone();
            }
            if let Some(rate) = rate {
                config.meter.update_rate_hz = *rate;
            }
            if let Some(min_db) = min_db {
                config.meter.min_db = *min_db;
            }
            if let Some(max_db) = max_db {
                config.meter.max_db = *max_db;
            }
        }
        Commands::Inputs { poll_rate } => {
            if let Some(rate) = poll_rate {
                config.input.poll_rate_hz = *rate;
            }
        }
        Commands::Probe | Commands::Command { .. } => {}
    }

    config.validate()?;
    Ok(config)
}

fn open_bus(config: &AppConfig) -> streamer_panel_core::Result<SystemBus> {
    SystemBus::open(&config.bus.device, config.bus.address)
}

fn install_interrupt_handler(running: &RunFlag) -> streamer_panel_core::Result<()> {
    let running = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("received interrupt signal");
        running.stop();
    })
    .map_err(|err| PanelError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))
}

fn run_vu_meter(config: &AppConfig, test: bool) -> streamer_panel_core::Result<()> {
    tracing::info!(pipe = %config.meter.pipe_path.display(), "starting VU meter daemon");
    let running = RunFlag::new();
    install_interrupt_handler(&running)?;

    let mut daemon = MeterDaemon::start(open_bus(config)?, &config.meter)?;
    let outcome = if test {
        daemon.sweep(&running)
    } else {
        stream::open_pipe(
            &config.meter.pipe_path,
            config.meter.pipe_wait_retries,
            config.meter.chunk_bytes,
            &running,
        )
        .and_then(|audio| match audio {
            Some(mut audio) => daemon.run(&mut audio, &running),
            None => Ok(()),
        })
    };

    let stopped = daemon.stop();
    outcome.and(stopped)
}

fn run_inputs(config: &AppConfig) -> streamer_panel_core::Result<()> {
    let running = RunFlag::new();
    install_interrupt_handler(&running)?;

    tracing::info!("connecting to peripheral controller");
    let mut controller = PeripheralController::open(open_bus(config)?)?;
    let version = controller.firmware_version()?;
    tracing::info!(%version, "peripheral firmware");

    let actions = ActionMap::with_overrides(&config.input.bindings)?;
    let runner = ActionRunner::new(
        ShellPlayback,
        config.input.mixer_control.clone(),
        config.input.command_timeout(),
    );
    let mut poller = InputPoller::new(
        controller,
        runner,
        actions,
        FixedRate::from_hz(config.input.poll_rate_hz),
    )
    .with_max_failed_cycles(config.input.max_failed_cycles);

    let outcome = poller.run(&running);
    poller.close();
    outcome
}

fn run_probe(config: &AppConfig) -> streamer_panel_core::Result<()> {
    let mut controller = PeripheralController::open(open_bus(config)?)?;

    println!("Firmware version: {}", controller.firmware_version()?);
    println!("Status: {:?}", controller.status()?);
    println!("Errors: {:?}", controller.errors()?);
    println!("Control: {:?}", controller.control()?);

    for (input, pressed) in controller.digital_inputs()?.iter() {
        println!(
            "  Input {input}: {}",
            if pressed { "PRESSED" } else { "released" }
        );
    }

    // delta is read-clear, so only the position and button are shown
    println!("Encoder position: {}", controller.encoder_position()?);
    println!("Encoder button: {:?}", controller.encoder_button()?);

    controller.close();
    Ok(())
}

fn run_command(config: &AppConfig, command: DeviceCommand) -> streamer_panel_core::Result<()> {
    let mut controller = PeripheralController::open(open_bus(config)?)?;
    let result = match command {
        DeviceCommand::Reset => controller.reset(),
        other => controller.send_command(other.into()),
    };
    controller.close();
    result
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .try_init();
}

fn parse_address(value: &str) -> Result<u16, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    match parsed {
        Ok(address) if address <= 0x7F => Ok(address),
        Ok(address) => Err(format!("0x{address:X} is not a 7-bit address")),
        Err(err) => Err(err.to_string()),
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Streamer peripheral board daemons", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// I2C character device.
    #[arg(long, global = true)]
    device: Option<PathBuf>,
    /// 7-bit device address (decimal or 0x-prefixed hex).
    #[arg(long, global = true, value_parser = parse_address)]
    address: Option<u16>,
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the VU meters from the audio level stream.
    VuMeter {
        /// Named pipe delivering interleaved stereo f32 samples.
        #[arg(long)]
        pipe: Option<PathBuf>,
        /// Maximum meter updates per second.
        #[arg(long)]
        rate: Option<u32>,
        /// Level shown at the bottom of the scale.
        #[arg(long, allow_hyphen_values = true)]
        min_db: Option<f64>,
        /// Level shown at full scale.
        #[arg(long, allow_hyphen_values = true)]
        max_db: Option<f64>,
        /// Sweep the meters instead of reading audio.
        #[arg(long)]
        test: bool,
    },
    /// Map buttons and the rotary encoder to playback actions.
    Inputs {
        /// Polling rate in Hz.
        #[arg(long)]
        poll_rate: Option<u32>,
    },
    /// Print firmware version, status and input state.
    Probe,
    /// Send a single command opcode to the controller.
    Command {
        #[arg(value_enum)]
        command: DeviceCommand,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DeviceCommand {
    Nop,
    Reset,
    FactoryReset,
    CalibrateVu,
    TestVuLeft,
    TestVuRight,
    TestVuBoth,
    TestBacklight,
    TestTapeMotor,
    TestAll,
}

impl From<DeviceCommand> for Command {
    fn from(value: DeviceCommand) -> Self {
        match value {
            DeviceCommand::Nop => Command::Nop,
            DeviceCommand::Reset => Command::Reset,
            DeviceCommand::FactoryReset => Command::FactoryReset,
            DeviceCommand::CalibrateVu => Command::CalibrateVu,
            DeviceCommand::TestVuLeft => Command::TestVuLeft,
            DeviceCommand::TestVuRight => Command::TestVuRight,
            DeviceCommand::TestVuBoth => Command::TestVuBoth,
            DeviceCommand::TestBacklight => Command::TestBacklight,
            DeviceCommand::TestTapeMotor => Command::TestTapeMotor,
            DeviceCommand::TestAll => Command::TestAll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x42"), Ok(0x42));
        assert_eq!(parse_address("66"), Ok(66));
        assert!(parse_address("0x80").is_err());
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "streamer-panel",
            "--address",
            "0x21",
            "vu-meter",
            "--min-db",
            "-30",
            "--rate",
            "25",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.bus.address, 0x21);
        assert_eq!(config.meter.min_db, -30.0);
        assert_eq!(config.meter.update_rate_hz, 25);
    }

    #[test]
    fn invalid_range_is_rejected_before_opening_bus() {
        let cli = Cli::parse_from(["streamer-panel", "vu-meter", "--min-db", "5", "--max-db", "3"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
