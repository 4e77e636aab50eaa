// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Servo calibration tool.
//!
//! ```sh
//! cargo run --bin hexarm-calibrate -- --channel 0
//! cargo run --bin hexarm-calibrate -- --channel 8 --from 800 --to 2200 --output joint6.csv
//! cargo run --bin hexarm-calibrate -- --simulate --settle-ms 0
//! ```
//!
//! Mount the AS5600 on the servo shaft, then run the tool. It steps the channel through the pulse
//! range, logs the raw encoder step after each move to a CSV file and prints the measured pulse
//! range and travel.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use hexarm::calibration::Sweep;
use hexarm::config::defaults;
use hexarm::drivers::as5600::{self, As5600};
use hexarm::drivers::Pca9685;
use hexarm::hw::sim::ServoModel;
use hexarm::hw::{BusChannel, I2cTransport, SimBus};
use hexarm::Result;

#[derive(Parser)]
#[command(name = "hexarm-calibrate", version, about = "Measure a servo's pulse range")]
struct Cli {
    /// PCA9685 channel the servo is plugged into
    #[arg(long, default_value_t = 0)]
    channel: u8,
    /// First pulse width, in microseconds
    #[arg(long, default_value_t = 400)]
    from: u32,
    /// Last pulse width, in microseconds
    #[arg(long, default_value_t = 2800)]
    to: u32,
    /// Pulse width step, in microseconds
    #[arg(long, default_value_t = 10)]
    increment: u32,
    /// Wait after each step before reading the encoder, in milliseconds
    #[arg(long, default_value_t = 200)]
    settle_ms: u64,
    /// CSV log
    #[arg(long, default_value = "servo_calibration.csv")]
    output: PathBuf,
    /// I2C adapter
    #[arg(long, default_value = defaults::BUS_PATH)]
    bus: PathBuf,
    /// Drive a simulated servo instead of the I2C adapter
    #[arg(long)]
    simulate: bool,
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

fn calibrate<T: I2cTransport>(cli: &Cli, sweep: &Sweep, bus: BusChannel<T>) -> Result<()> {
    let bus = bus.shared();
    let pwm = Pca9685::new(
        bus.clone(),
        defaults::CONTROLLER_ADDRESS,
        defaults::PWM_FREQUENCY_HZ,
    )?
    .shared();
    let mut encoder = As5600::new(bus, defaults::ENCODER_ADDRESS)?;
    encoder.configure(as5600::Conf::default())?;

    let status = encoder.status()?;
    if !status.magnet_detected() {
        warn!("AS5600 reports no magnet (status 0x{:02X})", status.raw());
    }

    let log = sweep.run(&pwm, &mut encoder)?;
    log.save(&cli.output)?;
    info!("{} samples written to {}", log.samples.len(), cli.output.display());

    match log.derive() {
        Some(cal) => {
            println!("channel {}:", cli.channel);
            println!("  min pulse: {:>5} us", cal.measured_min_pulse);
            println!("  max pulse: {:>5} us", cal.measured_max_pulse);
            println!("  max angle: {:>8.3} deg", cal.measured_max_angle);
        }
        None => error!("encoder reading never changed; check the magnet and the wiring"),
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let sweep = Sweep {
        channel: cli.channel,
        from_us: cli.from,
        to_us: cli.to,
        increment_us: cli.increment,
        settle: Duration::from_millis(cli.settle_ms),
    };
    sweep.validate()?;

    if cli.simulate {
        let servo = ServoModel {
            min_pulse_us: 500.0,
            max_pulse_us: 2500.0,
            max_angle_deg: 270.0,
        };
        let sim = SimBus::new()
            .with_pca9685(defaults::CONTROLLER_ADDRESS)
            .with_as5600(defaults::ENCODER_ADDRESS)
            .with_linked_servo(
                defaults::ENCODER_ADDRESS,
                defaults::CONTROLLER_ADDRESS,
                cli.channel,
                servo,
            );
        calibrate(cli, &sweep, BusChannel::new(sim))
    } else {
        calibrate(cli, &sweep, BusChannel::open(&cli.bus)?)
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
