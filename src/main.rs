use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serial_link::config::{Config, ConfigLoader};
use serial_link::logging::init_tracing;
use serial_link::port::{
    enumerate, FlowControl, Parity, PortError, PortEvent, SerialTransport,
};
use serialport::SerialPortType;
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bytes requested from the port per `DataReady`.
const READ_CHUNK: usize = 256;

/// Pause before retrying a write the driver accepted nothing of.
const WRITE_RETRY: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(
    name = "serial-link",
    version,
    about = "List serial ports and talk to one of them from the terminal."
)]
struct Cli {
    /// Configuration file (default: SERIAL_LINK_CONFIG, ./serial-link.toml, user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration file. RUST_LOG wins over both.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports present on this host
    List {
        /// Print a JSON array instead of one port per line
        #[arg(long)]
        json: bool,

        /// Include USB identification where the platform reports it
        #[arg(long)]
        details: bool,
    },
    /// Open a port, copy its input to stdout and send stdin lines to it
    Monitor(MonitorArgs),
    /// Print the effective configuration, or write it to a file
    Config {
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Port name or alias (default: serial.port)
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    #[arg(long)]
    data_bits: Option<u8>,

    /// none, odd or even
    #[arg(long)]
    parity: Option<Parity>,

    /// none, hardware or software
    #[arg(long)]
    flow: Option<FlowControl>,

    /// Echo every transfer as hex on stderr
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut loader = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(level) = &cli.log_level {
        loader.config.logging.level = level.clone();
    }
    init_tracing(&loader.config().logging);
    debug!(path = ?loader.config_path, "configuration loaded");

    match cli.command {
        Command::List { json, details } => list(loader.config(), json, details),
        Command::Monitor(args) => monitor(loader.config(), args),
        Command::Config { write } => match write {
            Some(path) => {
                loader.save_to(&path)?;
                info!(path = %path.display(), "configuration written");
                Ok(())
            }
            None => {
                print!("{}", toml::to_string_pretty(loader.config())?);
                Ok(())
            }
        },
    }
}

#[derive(Debug, Serialize)]
struct PortListing {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial_number: Option<String>,
}

impl PortListing {
    fn bare(name: String) -> Self {
        Self {
            name,
            kind: None,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    fn describe(&mut self, port_type: &SerialPortType) {
        match port_type {
            SerialPortType::UsbPort(usb) => {
                self.kind = Some("usb");
                self.vid = Some(usb.vid);
                self.pid = Some(usb.pid);
                self.manufacturer = usb.manufacturer.clone();
                self.product = usb.product.clone();
                self.serial_number = usb.serial_number.clone();
            }
            SerialPortType::BluetoothPort => self.kind = Some("bluetooth"),
            SerialPortType::PciPort => self.kind = Some("pci"),
            SerialPortType::Unknown => self.kind = Some("unknown"),
        }
    }
}

fn discover(config: &Config) -> Vec<String> {
    if cfg!(target_os = "linux") {
        config.enumeration.enumerator().scan()
    } else {
        enumerate()
    }
}

fn list(config: &Config, json: bool, details: bool) -> Result<(), Box<dyn Error>> {
    let mut ports: Vec<PortListing> = discover(config).into_iter().map(PortListing::bare).collect();

    if details {
        match serialport::available_ports() {
            Ok(known) => {
                for port in &mut ports {
                    if let Some(info) = known.iter().find(|info| info.port_name == port.name) {
                        port.describe(&info.port_type);
                    }
                }
            }
            Err(e) => warn!(error = %e, "cannot read port details"),
        }
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &ports)?;
        writeln!(out)?;
        return Ok(());
    }

    for port in &ports {
        match (port.kind, port.vid, port.pid) {
            (Some(kind), Some(vid), Some(pid)) => {
                let product = port.product.as_deref().unwrap_or("");
                writeln!(out, "{}\t{kind} {vid:04x}:{pid:04x} {product}", port.name)?;
            }
            (Some(kind), _, _) => writeln!(out, "{}\t{kind}", port.name)?,
            _ => writeln!(out, "{}", port.name)?,
        }
    }
    Ok(())
}

/// Everything the monitor loop reacts to, merged onto one channel.
enum Input {
    Port(PortEvent),
    Line(Vec<u8>),
    Eof,
}

fn monitor(config: &Config, args: MonitorArgs) -> Result<(), Box<dyn Error>> {
    let serial = &config.serial;
    let requested = args
        .port
        .as_deref()
        .or(serial.port.as_deref())
        .ok_or("no port given and serial.port is not configured")?;
    let port = serial.resolve_port(requested);

    let mut line = serial.port_config();
    if let Some(baud) = args.baud {
        if line.set_baud(baud) != baud {
            warn!(baud, "unsupported baud rate, keeping {}", line.baud());
        }
    }
    if let Some(bits) = args.data_bits {
        if line.set_data_bits(bits) != bits {
            warn!(bits, "unsupported data bit count, keeping {}", line.data_bits());
        }
    }
    if let Some(parity) = args.parity {
        line.set_parity(parity);
    }
    if let Some(flow) = args.flow {
        line.set_flow_control(flow);
    }

    let mut transport = SerialTransport::new().with_watch_interval(serial.watch_interval());
    transport.set_port(port.as_str());
    transport.configure(line);
    transport.set_debug(args.debug || serial.debug);

    let (tx, rx) = mpsc::channel();
    forward_events(transport.subscribe(), tx.clone())?;
    transport.open()?;
    info!(port = %port, config = %transport.config(), "monitoring, end input with EOF");
    forward_stdin(tx)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut buf = [0u8; READ_CHUNK];

    for input in rx {
        match input {
            Input::Port(PortEvent::DataReady) => {
                let n = transport.read_into(&mut buf)?;
                out.write_all(&buf[..n])?;
                out.flush()?;
            }
            Input::Port(PortEvent::Opened) => {}
            Input::Port(event @ (PortEvent::Error | PortEvent::Closed)) => {
                warn!(port = %port, ?event, "port went away");
                break;
            }
            Input::Line(data) => write_fully(&mut transport, &data)?,
            Input::Eof => break,
        }
    }

    transport.close()?;
    Ok(())
}

/// Loop until the driver has taken all of `data`.
fn write_fully(transport: &mut SerialTransport, mut data: &[u8]) -> Result<(), PortError> {
    while !data.is_empty() {
        let n = transport.write(data)?;
        if n == 0 {
            thread::sleep(WRITE_RETRY);
        }
        data = &data[n..];
    }
    Ok(())
}

fn forward_events(
    events: mpsc::Receiver<PortEvent>,
    tx: Sender<Input>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("monitor-events".into())
        .spawn(move || {
            for event in events {
                if tx.send(Input::Port(event)).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}

/// Read stdin on its own thread; it is left blocked in `read_line` on exit.
fn forward_stdin(tx: Sender<Input>) -> io::Result<()> {
    thread::Builder::new()
        .name("monitor-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            let mut stdin = stdin.lock();
            loop {
                let mut line = String::new();
                match stdin.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Input::Line(line.into_bytes())).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "cannot read stdin");
                        break;
                    }
                }
            }
            let _ = tx.send(Input::Eof);
        })?;
    Ok(())
}
