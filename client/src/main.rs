use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use lamport::wire::{self, Message, Reply, MAGIC, VERSION};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Deliver one message to a Lamport clock node and print its reply.
#[derive(Debug, Parser)]
#[command(name = "lamport-probe", version)]
struct Args {
    /// Node to deliver to, `host:port`.
    target: String,

    /// Clock value to embed in the message.
    #[arg(long, default_value_t = 0)]
    clock: u64,

    /// Sender address to embed in the message.
    #[arg(long, default_value = "lamport-probe")]
    from: String,

    /// Send a truncated header instead of a valid message.
    #[arg(long)]
    garbage: bool,

    /// Milliseconds to wait for connect and reply.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

fn request_body(args: &Args) -> Result<Vec<u8>> {
    if args.garbage {
        // Valid preamble, no clock: the node must reject this.
        let mut body = MAGIC.to_be_bytes().to_vec();
        body.extend_from_slice(&[VERSION, 0]);
        return Ok(body);
    }
    let message = Message::new(args.from.as_str(), args.clock).context("cannot build message")?;
    Ok(message.encode())
}

fn deliver(args: &Args) -> Result<Reply> {
    let timeout = Duration::from_millis(args.timeout_ms);
    let addr = args
        .target
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}", args.target))?
        .next()
        .ok_or_else(|| anyhow!("{} resolved to no addresses", args.target))?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout).with_context(|| format!("peer {addr} unreachable"))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    stream.write_all(&wire::frame(&request_body(args)?)).context("write request")?;

    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).context("read reply length")?;
    let mut body = vec![0u8; wire::frame_len(prefix)?];
    stream.read_exact(&mut body).context("read reply body")?;
    Ok(Reply::decode(&body)?)
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
    let args = Args::parse();

    let started = Instant::now();
    match deliver(&args) {
        Ok(Reply::Ack) => {
            debug!(rtt_us = started.elapsed().as_micros() as u64, "acknowledged");
            println!("{} acknowledged clock {}", args.target, args.clock);
            ExitCode::SUCCESS
        }
        Ok(Reply::Reject(reason)) => {
            println!("{} rejected message: {reason}", args.target);
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("delivery failed: {err:#}");
            ExitCode::from(2)
        }
    }
}
