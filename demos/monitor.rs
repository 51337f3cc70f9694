// Polling monitor example
//
// Initializes the PSU and prints a snapshot of every monitored value at the
// configured poll interval, optionally stopping after a number of polls.

use agilent_psu_rs::{OutputStatus, PsuConfig, PsuConnector, SerialSettings, Verbosity};
use clap::Parser;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "monitor")]
#[command(version = "1.0")]
#[command(about = "Poll an Agilent-style PSU over serial")]
#[command(long_about = "Bring the PSU up with the given setpoints, then print output state, setpoints, measurements and over-current status at a fixed interval.")]
struct Args {
    /// Serial port; probe every port when omitted
    #[arg(short, long)]
    port: Option<String>,

    #[arg(long, default_value_t = 9600)]
    baud: u32,

    #[arg(short, long, default_value_t = 2.5, help = "Voltage applied during initialization")]
    voltage: f64,

    #[arg(short, long, default_value_t = 0.1, help = "Current limit applied during initialization")]
    current_limit: f64,

    #[arg(short, long, default_value_t = 100, help = "Milliseconds between polls")]
    interval: u64,

    #[arg(short = 'n', long, help = "Stop after this many polls")]
    count: Option<usize>,

    /// Log every command and response
    #[arg(short = 'w', long)]
    wire: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let verbosity = if args.wire {
        Verbosity::Wire
    } else {
        Verbosity::Sequence
    };
    env_logger::Builder::from_default_env()
        .filter_level(if args.wire {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let defaults = SerialSettings::default();
    let config = PsuConfig {
        serial: SerialSettings {
            port: args.port.clone().unwrap_or(defaults.port.clone()),
            baud_rate: args.baud,
            ..defaults
        },
        default_voltage: args.voltage,
        default_current_limit: args.current_limit,
        command_poll_ms: args.interval,
        verbosity,
    };

    let mut psu = PsuConnector::connect(&config, args.port.is_none())?;
    println!("PSU ready ({} init steps passed)", psu.init_steps().len());
    println!("{:>8} {:>4} {:>8} {:>8} {:>8} {:>8}  status", "t [s]", "out", "V set", "I lim", "V meas", "I meas");

    let start = Instant::now();
    let mut polls = 0;
    while args.count.map_or(true, |count| polls < count) {
        let tick = Instant::now();

        match psu.values() {
            Ok(values) => {
                println!(
                    "{:>8.2} {:>4} {:>8.3} {:>8.3} {:>8.3} {:>8.3}  {}",
                    start.elapsed().as_secs_f64(),
                    values.power_str(),
                    values.voltage_setting,
                    values.current_limit,
                    values.measured_voltage,
                    values.measured_current,
                    values.status
                );
                if values.status == OutputStatus::OverCurrent {
                    log::warn!("Current limit reached");
                }
            }
            Err(e) if e.is_timeout() => log::warn!("Poll skipped: {}", e),
            Err(e) => {
                psu.close()?;
                return Err(e.into());
            }
        }

        polls += 1;
        let spent = tick.elapsed();
        std::thread::sleep(config.command_poll().saturating_sub(spent));
    }

    psu.close()?;
    Ok(())
}
