//! rcserial command-line entry point
//!
//! Builds the configuration, the port provider and the service, and owns them
//! for the life of the process.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rcserial_core::config::{keys, Config, FILE_NAME};
use rcserial_core::prelude::*;
use rcserial_core::protocol::list_ports;
use rcserial_core::sim::SimulatedPortProvider;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Serial driver for Arduino-based robot chassis
#[derive(Parser, Debug)]
#[command(name = "rcserial", version = rcserial_core::VERSION)]
#[command(about = "Drive an Arduino robot chassis over a serial port", long_about = None)]
struct Cli {
    /// Configuration file
    ///
    /// Default: <config dir>/rcserial/serial-driver.properties
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to a simulated 2WD chassis instead of real ports
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List candidate serial ports
    Ports,
    /// Find the chassis and print its state as JSON
    Detect,
    /// Run the service, reading commands from stdin
    ///
    /// Commands: `v <x> <y>`, `t <left> <right>`, `status`, `quit`
    Run,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Cmd::Ports => ports(cli.simulate),
        Cmd::Detect => detect(&cli),
        Cmd::Run => run(&cli),
    }
}

fn default_config_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("rcserial").join(FILE_NAME),
        None => PathBuf::from(FILE_NAME),
    }
}

/// Configuration for the simulated chassis; never written to disk
fn simulated_config() -> Config {
    // The simulated board needs no reset time
    Config::in_memory().with(keys::LISTENER_WARM_UP, "0")
}

fn load_config(cli: &Cli) -> Result<Arc<Config>> {
    if cli.simulate {
        tracing::info!("Configuration: in memory (simulation)");
        return Ok(Arc::new(simulated_config()));
    }
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    let config = Config::load(&path)
        .with_context(|| format!("Cannot load configuration from {}", path.display()))?;
    tracing::info!("Configuration: {}", path.display());
    Ok(Arc::new(config))
}

fn provider(simulate: bool) -> Arc<dyn PortProvider> {
    if simulate {
        let (provider, _device) = SimulatedPortProvider::with_chassis();
        Arc::new(provider)
    } else {
        Arc::new(SerialPortProvider)
    }
}

fn ports(simulate: bool) -> Result<()> {
    if simulate {
        for name in provider(true).list_ports() {
            println!("{}", name);
        }
        return Ok(());
    }
    for port in list_ports() {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04x}:{:04x}  {}",
                port.name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

fn detect(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let detector = HardwareDetector::new(config, provider(cli.simulate));
    let session = detector.detect().context("Detection failed")?;

    println!("Port: {}", session.connection().port_name());
    println!("{}", serde_json::to_string_pretty(session.driver().state())?);
    session.disconnect();
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let service = Arc::new(Service::new(config, provider(cli.simulate))?);

    let on_signal = service.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Shutting down...");
        on_signal.destroy();
        std::process::exit(0);
    })
    .context("Failed to install Ctrl-C handler")?;

    service.start()?;
    let queue = service.command_queue();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let outcome = match words.as_slice() {
            [] => Ok(()),
            ["quit"] | ["q"] => break,
            ["status"] => print_status(&service, &mut stdout),
            ["v", x, y] => {
                parse_pair(x, y).map(|(x, y)| queue.put(Command::vector(x, y, now_millis())))
            }
            ["t", l, r] => {
                parse_pair(l, r).map(|(l, r)| queue.put(Command::tractor(l, r, now_millis())))
            }
            _ => Err(anyhow::anyhow!("Unknown input: {}", line)),
        };
        if let Err(e) = outcome {
            eprintln!("{}", e);
        }
    }

    service.destroy();
    Ok(())
}

fn parse_pair(a: &str, b: &str) -> Result<(i32, i32)> {
    let (Ok(a), Ok(b)) = (a.parse(), b.parse()) else {
        bail!("Expected two integers, got '{}' '{}'", a, b);
    };
    Ok((a, b))
}

fn print_status(service: &Service, out: &mut impl Write) -> Result<()> {
    writeln!(out, "service: {}", service.status())?;
    writeln!(out, "connection: {:?}", service.connection_state())?;
    writeln!(out, "last command: {}", service.last_command())?;
    if let Some(state) = service.device_state() {
        writeln!(out, "{}", serde_json::to_string_pretty(&state)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_leaves_config_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        let cli = Cli::parse_from([
            "rcserial",
            "--simulate",
            "--config",
            path.to_str().unwrap(),
            "detect",
        ]);

        let config = load_config(&cli).unwrap();
        assert!(config.path().is_none());

        let session = HardwareDetector::new(config.clone(), provider(true))
            .detect()
            .unwrap();
        session.disconnect();
        assert!(!path.exists());
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("10", "-20").unwrap(), (10, -20));
        assert!(parse_pair("10", "x").is_err());
    }
}
