// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Arm demo: level the tool, then sweep the end effector across three points in front of the
//! base.

use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use hexarm::hw::{I2cTransport, SimBus};
use hexarm::{ArmConfig, ArmController, Error, Result};

/// Tool pointing straight ahead, level with the base plane.
const DEMO_ORIENTATION: (f64, f64, f64) = (0.0, 90.0, 0.0);

const DEMO_POSITIONS: [(f64, f64, f64); 3] = [
    (100.0, -50.0, 200.0),
    (100.0, 0.0, 200.0),
    (100.0, 50.0, 200.0),
];

#[derive(Parser)]
#[command(name = "hexarm", version, about = "Six-joint servo arm demo")]
struct Cli {
    /// Arm configuration file (TOML); built-in calibration when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Drive a simulated bus instead of the I2C adapter
    #[arg(long)]
    simulate: bool,
    /// Pause between end positions, in seconds
    #[arg(long, default_value_t = 5.0)]
    pause: f32,
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("logger already initialised: {e}");
    }
}

fn demo<T: I2cTransport + 'static>(mut arm: ArmController<T>, pause: Duration) -> Result<()> {
    let (pitch, yaw, roll) = DEMO_ORIENTATION;
    match arm.set_orientation(pitch, yaw, roll, true) {
        // No end position yet; the first move below applies the orientation.
        Ok(()) | Err(Error::PrerequisiteMissing(_)) => {}
        Err(e) => return Err(e),
    }

    for (i, &(x, y, z)) in DEMO_POSITIONS.iter().enumerate() {
        if i > 0 {
            thread::sleep(pause);
        }
        arm.set_end_position(x, y, z, true)?;
        info!("reached ({x}, {y}, {z}), joints {:?}", arm.joint_angles());
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ArmConfig::load(path)?,
        None => ArmConfig::default(),
    };
    let pause = Duration::from_secs_f32(cli.pause.max(0.0));

    if cli.simulate {
        info!("using simulated bus");
        let sim = SimBus::new().with_pca9685(config.controller_address);
        demo(ArmController::new(&config, sim)?, pause)
    } else {
        demo(ArmController::open(&config)?, pause)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(&cli) {
        error!("{e}");
        process::exit(1);
    }
}
