mod commands;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use echolink_core::{
    CommandCoordinator, LinkConfig, SerialPortTransport, TracingObserver, list_ports, run_stress,
};
use tracing::{error, info};

use commands::{LinkCommand, SHELL_HELP, ShellInput, execute, parse_line};

type Link = CommandCoordinator<SerialPortTransport, TracingObserver>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serial echo test tool", long_about = None)]
struct Args {
    /// Serial port name (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Echo / response window in milliseconds
    #[arg(short, long, global = true)]
    timeout_ms: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available serial ports
    Ports,
    /// Transmit text as typed (no hex decoding), without echo check
    Send {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Transmit and verify echo (0x... = hex, otherwise text)
    Trans {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        data: Vec<String>,
    },
    /// Transmit hex bytes and verify echo
    Hex {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        data: Vec<String>,
    },
    /// Send a line command and print the response
    At {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Interactive shell
    Shell,
    /// Repeated echo trials with a summary report
    Stress {
        /// Number of trials
        #[arg(short = 'n', long)]
        iterations: Option<u32>,

        /// Payload spec (0x... = hex, otherwise text)
        #[arg(long)]
        payload: Option<String>,

        /// Pause between trials in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Save the full report as TOML
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Write a config file with default values
    ConfigInit { path: PathBuf },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    match run(args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Merge the config file (if any) with command-line overrides.
fn load_config(args: &Args) -> Result<LinkConfig> {
    let mut config = match &args.config {
        Some(path) => LinkConfig::load_from_file(path)?,
        None => LinkConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.port.baud_rate = baud;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.echo.timeout_ms = timeout_ms;
        config.command_timeout_ms = timeout_ms;
        config.stress.timeout_ms = timeout_ms;
    }
    Ok(config)
}

fn open_link(config: &LinkConfig) -> Result<Link> {
    let link = CommandCoordinator::new(SerialPortTransport::new()).with_echo_settings(&config.echo);
    link.connect(&config.port)
        .with_context(|| format!("connecting to {}", config.port))?;
    Ok(link)
}

fn run(args: Args) -> Result<bool> {
    let config = load_config(&args)?;

    let one_shot = match args.command {
        Command::Ports => return print_ports(),
        Command::ConfigInit { path } => {
            config.save_to_file(&path)?;
            println!("wrote {}", path.display());
            return Ok(true);
        }
        Command::Shell => return shell(&config),
        Command::Stress {
            iterations,
            payload,
            interval_ms,
            report,
        } => {
            let mut stress = config.stress.clone();
            if let Some(n) = iterations {
                stress.iterations = n;
            }
            if let Some(p) = payload {
                stress.payload = p;
            }
            if let Some(ms) = interval_ms {
                stress.interval_ms = ms;
            }
            return stress_run(&config, &stress, report);
        }
        Command::Send { text } => LinkCommand::Send(text.join(" ")),
        Command::Trans { data } => LinkCommand::Trans(data.join(" ")),
        Command::Hex { data } => LinkCommand::Hex(data.join(" ")),
        Command::At { command } => LinkCommand::At(command.join(" ")),
    };

    let link = open_link(&config)?;
    let result = execute(&link, &one_shot, config.echo.timeout(), config.command_timeout());
    link.disconnect()?;
    result
}

fn print_ports() -> Result<bool> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{:04X}:{:04X}] {}",
                port.name,
                vid,
                pid,
                port.product.unwrap_or_default()
            ),
            _ => println!("{}", port.name),
        }
    }
    Ok(true)
}

fn stress_run(
    config: &LinkConfig,
    stress: &echolink_core::StressConfig,
    report_path: Option<PathBuf>,
) -> Result<bool> {
    let link = open_link(config)?;
    let report = run_stress(&link, stress, |trial| {
        if trial.index % 10 == 0 {
            info!(trial = trial.index, total = stress.iterations, "Progress");
        }
    })?;
    link.disconnect()?;

    println!("{}", report);
    if let Some(path) = report_path {
        report.save_to_file(&path)?;
        println!("report saved to {}", path.display());
    }
    Ok(report.matched == report.iterations)
}

fn shell(config: &LinkConfig) -> Result<bool> {
    let link = open_link(config)?;
    println!("connected to {}. Type 'help' for commands.", config.port);

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        match parse_line(&line) {
            Ok(ShellInput::Empty) => {}
            Ok(ShellInput::Exit) => break,
            Ok(ShellInput::Help) => println!("{}", SHELL_HELP),
            Ok(ShellInput::Status) => println!(
                "{} ({})",
                config.port,
                if link.is_connected() { "open" } else { "closed" }
            ),
            Ok(ShellInput::Link(command)) => {
                // Errors are reported and the shell keeps going
                if let Err(e) = execute(
                    &link,
                    &command,
                    config.echo.timeout(),
                    config.command_timeout(),
                ) {
                    println!("error: {:#}", e);
                }
            }
            Err(e) => println!("{}", e),
        }
    }

    link.disconnect()?;
    Ok(true)
}
