use std::fmt::Debug;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use mozaic_client::{Client, ClientConfig, EventBus, LogWriter, Replayer};
use mozaic_proto::{
    EventType, Payload, WireEvent,
    events::{
        CLIENT_SEND, CONNECTED, DISCONNECTED, FOLLOWER_CONNECTED, FOLLOWER_DISCONNECTED,
        GAME_FINISHED, GAME_STEP, LEADER_CONNECTED, LEADER_DISCONNECTED, PONG, PING, Ping,
        REGISTER_CLIENT, START_GAME, standard_registry,
    },
};
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

type Recorder = Arc<Mutex<LogWriter<BufWriter<File>>>>;

/// Mozaic match client
#[derive(Parser, Debug)]
#[command(name = "mozaic")]
#[command(about = "Connect to a match server or replay a match log", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a match server and log every received event
    Connect {
        #[command(flatten)]
        client: ClientConfig,

        /// Write received events to this match log
        #[arg(long)]
        record: Option<PathBuf>,

        /// Send a ping every N seconds (0 disables)
        #[arg(long, default_value_t = 0)]
        ping_interval_secs: u64,
    },
    /// Replay a match log
    Replay {
        path: PathBuf,

        /// Client streams to print (repeatable; 0 is the global stream)
        #[arg(long = "client", default_values_t = [0])]
        clients: Vec<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Connect {
            client,
            record,
            ping_interval_secs,
        } => connect(client, record, ping_interval_secs).await,
        Command::Replay { path, clients } => replay(path, clients).await,
    }
}

async fn connect(
    config: ClientConfig,
    record: Option<PathBuf>,
    ping_interval_secs: u64,
) -> anyhow::Result<()> {
    let handshake = config.handshake()?;
    let client = Client::new(Arc::new(standard_registry()?));

    log_all(client.bus(), config.client_id)?;

    let recorder: Option<Recorder> = match record {
        Some(path) => {
            info!(path = %path.display(), "recording match log");
            let file = File::create(&path)?;
            let recorder = Arc::new(Mutex::new(LogWriter::new(BufWriter::new(file))));
            let tap = recorder.clone();
            let client_id = config.client_id;
            client.tap(move |event: &WireEvent| {
                tap.lock().record(client_id, event)?;
                Ok(())
            });
            Some(recorder)
        }
        None => None,
    };

    let driver = timeout(
        config.connect_timeout(),
        client.connect_tcp(config.server, &handshake),
    )
    .await
    .map_err(|_| anyhow::anyhow!("timed out connecting to {}", config.server))??;
    let mut driver = tokio::spawn(driver.run());

    if ping_interval_secs > 0 {
        tokio::spawn(ping_loop(
            client.clone(),
            Duration::from_secs(ping_interval_secs),
        ));
    }

    tokio::select! {
        result = &mut driver => result?,
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupted, closing connection");
            client.close();
            driver.await?;
        }
    }

    if let Some(recorder) = recorder {
        let mut recorder = recorder.lock();
        recorder.flush()?;
        info!(records = recorder.frames(), "match log written");
    }
    Ok(())
}

async fn ping_loop(client: Client, interval: Duration) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let sent_ms = start.elapsed().as_millis() as u32;
        let ping = PING.create(Ping {
            request_id: 0,
            t_ms: sent_ms,
        });
        let response = match client.request(ping, &PONG) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "ping not sent, stopping");
                return;
            }
        };
        match response.with_timeout(interval).await {
            Ok(pong) => {
                let rtt_ms = (start.elapsed().as_millis() as u32).saturating_sub(pong.t_ms);
                info!(request_id = pong.request_id, rtt_ms, "pong");
            }
            Err(e) => warn!(error = %e, "ping failed"),
        }
    }
}

async fn replay(path: PathBuf, clients: Vec<u32>) -> anyhow::Result<()> {
    let replayer = Replayer::new(Arc::new(standard_registry()?));
    for client_id in clients {
        log_all(&replayer.client_stream(client_id), client_id)?;
    }

    let summary = replayer.replay_file(&path).await.inspect_err(|e| {
        error!(path = %path.display(), error = %e, "replay aborted");
    })?;
    info!(
        frames = summary.frames,
        delivered = summary.delivered,
        unknown = summary.unknown,
        malformed = summary.malformed,
        clients = ?replayer.client_ids(),
        "replay complete"
    );
    Ok(())
}

/// Log every catalogue event on `bus`.
fn log_all(bus: &EventBus, client_id: u32) -> anyhow::Result<()> {
    log_event(bus, &REGISTER_CLIENT, client_id)?;
    log_event(bus, &START_GAME, client_id)?;
    log_event(bus, &LEADER_CONNECTED, client_id)?;
    log_event(bus, &LEADER_DISCONNECTED, client_id)?;
    log_event(bus, &FOLLOWER_CONNECTED, client_id)?;
    log_event(bus, &FOLLOWER_DISCONNECTED, client_id)?;
    log_event(bus, &CONNECTED, client_id)?;
    log_event(bus, &DISCONNECTED, client_id)?;
    log_event(bus, &GAME_STEP, client_id)?;
    log_event(bus, &GAME_FINISHED, client_id)?;
    log_event(bus, &CLIENT_SEND, client_id)?;
    Ok(())
}

fn log_event<T: Payload + Debug>(
    bus: &EventBus,
    event_type: &EventType<T>,
    client_id: u32,
) -> anyhow::Result<()> {
    let name = event_type.name();
    bus.subscribe(event_type, move |data: &T| {
        info!(client_id, event = name, "{data:?}");
        Ok(())
    })?
    .detach();
    Ok(())
}
