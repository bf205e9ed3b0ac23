use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lamport::{LogicalClockProcess, ProcessConfig, SendResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run one Lamport clock process.
///
/// Interactive commands on stdin: `send <host:port>`, `clock`, `q`.
/// With stdin closed the node runs its `--send` schedule, then exits.
#[derive(Debug, Parser)]
#[command(name = "lamport-node", version)]
struct Args {
    /// Port to accept peer messages on.
    #[arg(long, env = "LAMPORT_PORT", default_value_t = 8001)]
    port: u16,

    /// Interface to bind.
    #[arg(long, env = "LAMPORT_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Address peers should use to reach this process (defaults to the bound address).
    #[arg(long, env = "LAMPORT_ADVERTISE")]
    advertise: Option<String>,

    /// Milliseconds between internal events; 0 disables the ticker.
    #[arg(long, env = "LAMPORT_TICK_MS", default_value_t = 1000)]
    tick_ms: u64,

    /// Milliseconds before an outbound send counts as unreachable.
    #[arg(long, env = "LAMPORT_SEND_TIMEOUT_MS", default_value_t = 2000)]
    send_timeout_ms: u64,

    /// Scheduled send `<delay_ms>@<host:port>`. Repeatable; each delay is
    /// counted from the previous scheduled send.
    #[arg(long = "send", value_name = "DELAY_MS@ADDR")]
    sends: Vec<ScheduledSend>,
}

#[derive(Debug, Clone)]
struct ScheduledSend {
    delay: Duration,
    target: String,
}

impl FromStr for ScheduledSend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (delay, target) = s.split_once('@').ok_or_else(|| format!("expected DELAY_MS@ADDR, got {s:?}"))?;
        let delay: u64 = delay.trim().parse().map_err(|_| format!("invalid delay {delay:?}"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err("missing target address".into());
        }
        Ok(Self { delay: Duration::from_millis(delay), target: target.to_owned() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Control {
    Send(String), // stdin `send <addr>` or a scheduled send
    Clock,        // stdin `clock`
    StdinClosed,  // stdin EOF
    ScheduleDone, // last scheduled send issued
    Quit,         // stdin 'q' or Ctrl-C
}

/// Sources that may still issue commands. The node stops once both are gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Inputs {
    stdin_open: bool,
    schedule_pending: bool,
}

impl Inputs {
    fn new() -> Self {
        Self { stdin_open: true, schedule_pending: true }
    }

    /// Record a control event; returns true when nothing can issue commands any more.
    fn observe(&mut self, ctrl: &Control) -> bool {
        match ctrl {
            Control::StdinClosed => self.stdin_open = false,
            Control::ScheduleDone => self.schedule_pending = false,
            _ => {}
        }
        !self.stdin_open && !self.schedule_pending
    }
}

impl Control {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        match (words.next()?, words.next()) {
            (q, None) if q.eq_ignore_ascii_case("q") => Some(Control::Quit),
            (c, None) if c.eq_ignore_ascii_case("clock") => Some(Control::Clock),
            (s, Some(addr)) if s.eq_ignore_ascii_case("send") => Some(Control::Send(addr.to_owned())),
            _ => None,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

fn build_config(args: &Args) -> ProcessConfig {
    ProcessConfig {
        listen_addr: SocketAddr::new(args.host, args.port),
        advertise_addr: args.advertise.clone(),
        tick_interval: (args.tick_ms > 0).then(|| Duration::from_millis(args.tick_ms)),
        send_timeout: Duration::from_millis(args.send_timeout_ms),
        ..ProcessConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let process = LogicalClockProcess::start(build_config(&args))
        .await
        .context("failed to start lamport process")?;
    info!(address = process.address(), "process running; commands: send <addr>, clock, q");

    let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<Control>(32);

    // Spawn stdin task
    let stdin_tx = ctrl_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match Control::parse(&line) {
                Some(ctrl) => {
                    let quit = ctrl == Control::Quit;
                    if stdin_tx.send(ctrl).await.is_err() || quit {
                        return;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!(line = line.trim(), "unknown command"),
            }
        }
        // EOF
        let _ = stdin_tx.send(Control::StdinClosed).await;
    });

    // Spawn the scripted send schedule
    let schedule_tx = ctrl_tx.clone();
    let schedule = args.sends.clone();
    tokio::spawn(async move {
        for ScheduledSend { delay, target } in schedule {
            time::sleep(delay).await;
            if schedule_tx.send(Control::Send(target)).await.is_err() {
                return;
            }
        }
        let _ = schedule_tx.send(Control::ScheduleDone).await;
    });

    let signal_tx = ctrl_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = signal_tx.send(Control::Quit).await;
        }
    });

    let process = Arc::new(process);
    let mut sends = JoinSet::new();
    let mut inputs = Inputs::new();
    while let Some(ctrl) = ctrl_rx.recv().await {
        if inputs.observe(&ctrl) {
            info!("stdin closed and send schedule finished");
            break;
        }
        match ctrl {
            Control::Send(target) => {
                // Sends run concurrently with each other and with the ticker.
                let process = Arc::clone(&process);
                sends.spawn(async move {
                    match process.send(&target).await {
                        SendResult::Delivered { clock } => println!("sent to {target} with clock {clock}"),
                        SendResult::Failed(failure) => println!("process at {target} unavailable: {failure}"),
                    }
                });
            }
            Control::Clock => println!("clock is {}", process.clock()),
            Control::StdinClosed | Control::ScheduleDone => {}
            Control::Quit => break,
        }
        while sends.try_join_next().is_some() {}
    }

    // Sends are bounded by the send timeout; let the last ones report.
    while sends.join_next().await.is_some() {}
    match Arc::into_inner(process) {
        Some(process) => process.stop().await,
        None => warn!("process still shared at shutdown, skipping graceful stop"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheduled_send() {
        let s: ScheduledSend = "3000@127.0.0.1:8002".parse().unwrap();
        assert_eq!(s.delay, Duration::from_secs(3));
        assert_eq!(s.target, "127.0.0.1:8002");
        assert!("127.0.0.1:8002".parse::<ScheduledSend>().is_err());
        assert!("soon@127.0.0.1:8002".parse::<ScheduledSend>().is_err());
        assert!("10@".parse::<ScheduledSend>().is_err());
    }

    #[test]
    fn parses_stdin_commands() {
        assert_eq!(Control::parse("q"), Some(Control::Quit));
        assert_eq!(Control::parse("  CLOCK "), Some(Control::Clock));
        assert_eq!(Control::parse("send 127.0.0.1:8003"), Some(Control::Send("127.0.0.1:8003".into())));
        assert_eq!(Control::parse("send"), None);
        assert_eq!(Control::parse("dance"), None);
    }

    #[test]
    fn closed_stdin_waits_for_schedule() {
        let mut inputs = Inputs::new();
        assert!(!inputs.observe(&Control::StdinClosed));
        assert!(!inputs.observe(&Control::Send("127.0.0.1:8002".into())));
        assert!(inputs.observe(&Control::ScheduleDone));
    }

    #[test]
    fn finished_schedule_keeps_interactive_node_running() {
        let mut inputs = Inputs::new();
        assert!(!inputs.observe(&Control::ScheduleDone));
        assert!(!inputs.observe(&Control::Clock));
        assert!(inputs.observe(&Control::StdinClosed));
    }

    #[test]
    fn zero_tick_disables_ticker() {
        let args =
            Args::parse_from(["lamport-node", "--port", "8002", "--tick-ms", "0", "--send", "10@127.0.0.1:8001"]);
        let config = build_config(&args);
        assert_eq!(config.listen_addr.port(), 8002);
        assert!(config.tick_interval.is_none());
        assert_eq!(args.sends.len(), 1);
    }
}
