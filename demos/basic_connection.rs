// Basic discovery and connection example
//
// Finds the PSU on any serial port, runs the initialization sequence,
// prints a snapshot, checks the output follows its setpoint and hands the
// front panel back.

use agilent_psu_rs::{Psu, PsuConfig, PsuConnector, Verbosity};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("PSU Discovery Example");
    println!("=====================\n");

    let mut config = PsuConfig {
        verbosity: Verbosity::Sequence,
        ..PsuConfig::default()
    };

    println!("1. Probing serial ports...");
    let ports = PsuConnector::candidate_ports();
    for (i, port) in ports.iter().enumerate() {
        println!("  {}. {}", i + 1, port);
    }

    let Some(port) = PsuConnector::find(&config.serial) else {
        println!("No PSU answered. Please connect the PSU and try again.");
        return Ok(());
    };
    println!("PSU found on {}\n", port);
    config.serial = config.serial.with_port(&port);

    println!("2. Initializing...");
    let mut psu = match Psu::open(&config) {
        Ok(psu) => psu,
        Err(e) => {
            eprintln!("Initialization stopped at '{}': {}", e.step(), e);
            return Err(e.into());
        }
    };
    for step in psu.init_steps() {
        println!("  ✓ {}", step);
    }

    println!("\n3. Device information:");
    println!("  Port {}", psu.terminal().transport().port_name());
    let version = psu.version()?;
    println!("  SCPI version {}", version);
    println!("  Selected channel {}", psu.selected_channel()?);

    println!("\n4. Snapshot:");
    let values = psu.values()?;
    println!("  Output:        {}", values.power_str());
    println!("  Voltage set:   {:.3} V", values.voltage_setting);
    println!("  Current limit: {:.3} A", values.current_limit);
    println!("  Measured:      {:.3} V / {:.3} A", values.measured_voltage, values.measured_current);
    println!("  Status:        {}", values.status);

    println!("\n5. Output self-test...");
    let check = psu.check_output(Duration::from_millis(500))?;
    let mark = |ok| if ok { "✓" } else { "✗" };
    println!("  {} output off: {:.3} V", mark(check.output_off_ok()), check.idle_voltage);
    println!(
        "  {} output on: {:.3} V measured, {:.3} V set",
        mark(check.output_on_ok()),
        check.measured_voltage,
        check.set_voltage
    );
    println!("  Self-test {}", if check.passed() { "passed" } else { "FAILED" });

    psu.close()?;
    println!("\nFront panel released.");

    Ok(())
}
