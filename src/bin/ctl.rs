// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! quadhat-ctl: command-line client for the quadhat daemon.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use quadhat::button::Gesture;
use quadhat::config;
use quadhat::protocol::{self, Request, Response};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "quadhat-ctl", about = "Control a running quadhat daemon")]
struct Cli {
    /// Path to the daemon socket.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show fan speeds and whether automatic control is on.
    Status,
    /// Switch automatic fan control on or off.
    Toggle,
    /// Act as if the button was clicked once.
    Click,
    /// Act as if the button was double-clicked.
    Twice,
    /// Act as if the button was held down.
    Press,
}

impl Command {
    fn request(&self) -> Request {
        match self {
            Command::Status => Request::GetStatus,
            Command::Toggle => Request::ToggleFan,
            Command::Click => Request::Gesture {
                gesture: Gesture::Click,
            },
            Command::Twice => Request::Gesture {
                gesture: Gesture::DoubleClick,
            },
            Command::Press => Request::Gesture {
                gesture: Gesture::LongPress,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct Connection {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Connection {
    fn connect(path: &str) -> io::Result<Self> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(Duration::from_secs(2)))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { stream, reader })
    }

    fn send_request(&mut self, req: &Request) -> io::Result<Response> {
        let encoded = protocol::encode(req).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Encode error: {e}"))
        })?;
        self.stream.write_all(encoded.as_bytes())?;
        self.stream.flush()?;

        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        protocol::decode(&line).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Decode error: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut conn = Connection::connect(&cli.socket)
        .with_context(|| format!("connecting to daemon at {}", cli.socket))?;
    log::debug!("Connected to daemon at {}", cli.socket);

    match conn.send_request(&cli.command.request())? {
        Response::Status {
            cpu_percent,
            disk_percent,
            enabled,
        } => {
            println!("CPU fan:  {cpu_percent:.0}%");
            println!("Disk fan: {disk_percent:.0}%");
            println!(
                "Control:  {}",
                if enabled { "automatic" } else { "off (full speed)" }
            );
        }
        Response::Ok { message } => println!("{message}"),
        Response::Error { message } => bail!("{message}"),
    }
    Ok(())
}
