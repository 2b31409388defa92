//! In-process storage shard for integration tests
//!
//! Speaks the text-protocol subset the coordinator uses: PING, GET, SET,
//! SETEX, DEL, WAIT, CONFIG SET, REPLICAOF and INFO. Liveness is
//! scriptable (a "down" shard closes every connection), replica acks are
//! configurable, and every received command is logged for assertions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::{TcpListener, TcpStream};

pub struct MockShard {
    addr: SocketAddr,
    state: Arc<ShardState>,
}

#[derive(Default)]
struct ShardState {
    store: Mutex<HashMap<String, String>>,
    down: AtomicBool,
    wait_replicas: AtomicI64,
    connected_replicas: AtomicI64,
    master_offset: AtomicI64,
    hits: AtomicI64,
    misses: AtomicI64,
    read_only: AtomicBool,
    /// (host, port) of the master when acting as replica.
    master: Mutex<Option<(String, u16)>>,
    /// Every command received, uppercased name first.
    commands: Mutex<Vec<Vec<String>>>,
}

impl MockShard {
    /// Bind an ephemeral port and start serving.
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ShardState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                if accept_state.down.load(Ordering::Acquire) {
                    drop(socket);
                    continue;
                }
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, state).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// A down shard closes existing connections and refuses new ones.
    pub fn set_down(&self, down: bool) {
        self.state.down.store(down, Ordering::Release);
    }

    /// Number of replicas WAIT reports as acknowledged.
    pub fn set_wait_replicas(&self, n: i64) {
        self.state.wait_replicas.store(n, Ordering::Release);
    }

    pub fn set_connected_replicas(&self, n: i64) {
        self.state.connected_replicas.store(n, Ordering::Release);
    }

    pub fn set_master_offset(&self, offset: i64) {
        self.state.master_offset.store(offset, Ordering::Release);
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state.store.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.state
            .store
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn key_count(&self) -> usize {
        self.state.store.lock().unwrap().len()
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.commands.lock().unwrap().clone()
    }

    /// How many received commands start with the given words.
    pub fn command_count(&self, prefix: &[&str]) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| {
                cmd.len() >= prefix.len()
                    && cmd
                        .iter()
                        .zip(prefix)
                        .all(|(got, want)| got.eq_ignore_ascii_case(want))
            })
            .count()
    }

    pub fn is_read_only(&self) -> bool {
        self.state.read_only.load(Ordering::Acquire)
    }

    /// Master this shard replicates from, when configured as a replica.
    pub fn master(&self) -> Option<(String, u16)> {
        self.state.master.lock().unwrap().clone()
    }
}

async fn serve_connection(socket: TcpStream, state: Arc<ShardState>) -> std::io::Result<()> {
    let mut stream = BufStream::new(socket);

    loop {
        let Some(command) = read_command(&mut stream).await? else {
            return Ok(());
        };
        if state.down.load(Ordering::Acquire) {
            return Ok(());
        }

        state.commands.lock().unwrap().push(command.clone());

        let reply = dispatch(&command, &state).await;
        stream.write_all(reply.as_bytes()).await?;
        stream.flush().await?;
    }
}

async fn dispatch(command: &[String], state: &Arc<ShardState>) -> String {
    let name = command[0].to_ascii_uppercase();
    match name.as_str() {
        "PING" => "+PONG\r\n".to_string(),
        "SET" => {
            state
                .store
                .lock()
                .unwrap()
                .insert(command[1].clone(), command[2].clone());
            "+OK\r\n".to_string()
        }
        "SETEX" => {
            state
                .store
                .lock()
                .unwrap()
                .insert(command[1].clone(), command[3].clone());
            "+OK\r\n".to_string()
        }
        "GET" => match state.store.lock().unwrap().get(&command[1]) {
            Some(value) => {
                state.hits.fetch_add(1, Ordering::Relaxed);
                format!("${}\r\n{}\r\n", value.len(), value)
            }
            None => {
                state.misses.fetch_add(1, Ordering::Relaxed);
                "$-1\r\n".to_string()
            }
        },
        "DEL" => {
            let removed = state.store.lock().unwrap().remove(&command[1]).is_some();
            format!(":{}\r\n", removed as i32)
        }
        "WAIT" => {
            let acked = state.wait_replicas.load(Ordering::Acquire);
            if acked == 0 {
                // A real server holds WAIT for the full window when no
                // replica acks arrive
                let window: u64 = command[2].parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(window)).await;
            }
            format!(":{}\r\n", acked)
        }
        "CONFIG" => {
            if command[2].eq_ignore_ascii_case("replica-read-only") {
                state
                    .read_only
                    .store(command[3].eq_ignore_ascii_case("yes"), Ordering::Release);
            }
            "+OK\r\n".to_string()
        }
        "REPLICAOF" => {
            let mut master = state.master.lock().unwrap();
            if command[1].eq_ignore_ascii_case("NO") {
                *master = None;
            } else {
                *master = Some((command[1].clone(), command[2].parse().unwrap()));
            }
            "+OK\r\n".to_string()
        }
        "INFO" => {
            let section = command[1].to_ascii_lowercase();
            let body = info_section(&section, state);
            format!("${}\r\n{}\r\n", body.len(), body)
        }
        _ => format!("-ERR unknown command '{}'\r\n", name),
    }
}

fn info_section(section: &str, state: &Arc<ShardState>) -> String {
    match section {
        "replication" => {
            let master = state.master.lock().unwrap();
            let (role, master_lines) = match master.as_ref() {
                Some((host, port)) => (
                    "slave",
                    format!("master_host:{}\r\nmaster_port:{}\r\n", host, port),
                ),
                None => ("master", String::new()),
            };
            format!(
                "# Replication\r\nrole:{}\r\n{}connected_slaves:{}\r\nmaster_repl_offset:{}\r\n",
                role,
                master_lines,
                state.connected_replicas.load(Ordering::Acquire),
                state.master_offset.load(Ordering::Acquire),
            )
        }
        "keyspace" => {
            let keys = state.store.lock().unwrap().len();
            if keys == 0 {
                "# Keyspace\r\n".to_string()
            } else {
                format!("# Keyspace\r\ndb0:keys={},expires=0,avg_ttl=0\r\n", keys)
            }
        }
        "stats" => format!(
            "# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\n",
            state.hits.load(Ordering::Acquire),
            state.misses.load(Ordering::Acquire),
        ),
        _ => String::new(),
    }
}

/// Parse one array-framed command; None on clean EOF.
async fn read_command(
    stream: &mut BufStream<TcpStream>,
) -> std::io::Result<Option<Vec<String>>> {
    let mut line = String::new();
    if stream.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let argc: usize = line
        .trim_start_matches('*')
        .trim_end()
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad array header"))?;

    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        let mut header = String::new();
        stream.read_line(&mut header).await?;
        let len: usize = header
            .trim_start_matches('$')
            .trim_end()
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad bulk header"))?;

        let mut payload = vec![0u8; len + 2];
        stream.read_exact(&mut payload).await?;
        payload.truncate(len);
        args.push(String::from_utf8_lossy(&payload).into_owned());
    }

    Ok(Some(args))
}

/// One shard pair: a primary mock and a replica mock.
pub struct MockShardPair {
    pub primary: MockShard,
    pub replica: MockShard,
}

impl MockShardPair {
    pub async fn spawn() -> Self {
        Self {
            primary: MockShard::spawn().await,
            replica: MockShard::spawn().await,
        }
    }
}

/// Spawn `n` shard pairs and build the matching coordinator config with
/// test-friendly timings.
pub async fn cluster(n: usize) -> (Vec<MockShardPair>, shardcache::CoordinatorConfig) {
    let mut pairs = Vec::with_capacity(n);
    for _ in 0..n {
        pairs.push(MockShardPair::spawn().await);
    }

    let primaries: Vec<String> = pairs.iter().map(|p| p.primary.addr()).collect();
    let replicas: Vec<String> = pairs.iter().map(|p| p.replica.addr()).collect();

    let mut config = shardcache::CoordinatorConfig::from_endpoint_lists(
        &primaries.join(","),
        &replicas.join(","),
    )
    .unwrap();
    config.check_interval_ms = 100;
    config.probe_timeout_ms = 200;
    config.command_timeout_ms = 1000;
    config.wait_timeout_ms = 300;
    config.shutdown_grace_ms = 2000;

    (pairs, config)
}

/// Poll until the condition holds or the timeout elapses.
pub async fn wait_for<F>(mut condition: F, timeout: Duration, what: &str)
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Find a key that the coordinator routes to the given shard.
pub fn key_for_shard(coordinator: &shardcache::Coordinator, shard: usize) -> String {
    for i in 0..100_000u32 {
        let key = format!("probe-key-{}", i);
        let (_, binding) = coordinator.ring().lookup(&key).unwrap();
        if binding.id() == shard {
            return key;
        }
    }
    panic!("no key found for shard {}", shard);
}
