//! `fleet-confd`: the read-only confd UDP daemon. Binds a UDP socket,
//! keeps a file-watched cluster snapshot fresh in the background, and
//! answers signed queries about it. CLI argument parsing, multiple config
//! sources, and daemonization are out of scope — this binary reads one
//! TOML config file path from `$0`'s single argument (or a built-in
//! default) and runs until killed.

use fleet_confd::config::ConfdConfig;
use fleet_confd::reload::{self, ReloadState};
use fleet_confd::{protocol, responder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Maximum UDP datagram this daemon will attempt to read. Confd requests
/// are tiny JSON blobs; anything larger is not a well-formed request.
const MAX_DATAGRAM_BYTES: usize = 16 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let config_path = std::env::args().nth(1);
    let config = match config_path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            Arc::new(ConfdConfig::from_toml_str(&text)?)
        }
        None => Arc::new(ConfdConfig::default()),
    };

    let hmac_key = load_hmac_key(&config.hmac_key_path);

    let state = ReloadState::new(config.clone());
    if let Err(err) = state.reload().await {
        tracing::warn!(error = %err, "initial config load failed, serving degraded until fixed");
    }
    let _watchers = reload::spawn_watchers(state.clone());

    let bind_addr: SocketAddr = config.bind_addr.parse()?;
    let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    tracing::info!(addr = %bind_addr, "fleet-confd listening");

    let handler_timeout = config.handler_timeout();
    let clock_skew_secs = config.clock_skew_secs as i64;

    let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "udp recv failed");
                continue;
            }
        };
        let datagram = buf[..len].to_vec();

        let socket = socket.clone();
        let state = state.clone();
        let hmac_key = hmac_key.clone();
        tokio::spawn(async move {
            let work = handle_datagram(state, hmac_key, datagram, clock_skew_secs);
            match tokio::time::timeout(handler_timeout, work).await {
                Ok(Some(reply)) => {
                    match socket.send_to(&reply, peer).await {
                        Ok(_) => fleet_confd::metrics::record_reply_signed(),
                        Err(err) => {
                            tracing::debug!(error = %err, %peer, "failed to send confd reply");
                        }
                    }
                }
                Ok(None) => {
                    // Dropped: bad magic/hmac/clock-skew/unparseable request.
                    fleet_confd::metrics::record_drop("unverified");
                }
                Err(_) => {
                    tracing::debug!(%peer, "confd handler timed out");
                    fleet_confd::metrics::record_drop("handler_timeout");
                }
            }
        });
    }
}

/// Decode, verify, dispatch, and re-sign one datagram. Returns `None` for
/// anything that should be silently dropped (bad magic, bad HMAC, clock
/// skew, or an unparseable request).
async fn handle_datagram(
    state: Arc<ReloadState>,
    hmac_key: Arc<Vec<u8>>,
    datagram: Vec<u8>,
    clock_skew_secs: i64,
) -> Option<Vec<u8>> {
    let now = protocol::now_epoch_secs();
    let envelope = protocol::decode_and_verify(&datagram, &hmac_key, now, clock_skew_secs).ok()?;

    let loaded = state.snapshot();
    let snapshot_ref = loaded.as_ref().as_ref().ok();
    let config_version = snapshot_ref.map(|(snap, _)| snap.version).unwrap_or(0);
    let (status, answer) = responder::dispatch(&envelope.msg, snapshot_ref, config_version);

    let reply_msg = responder::build_reply_msg(status, answer);
    Some(protocol::encode(&hmac_key, &reply_msg, &envelope.salt))
}

fn load_hmac_key(path: &std::path::Path) -> Arc<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Arc::new(bytes),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "could not read hmac key file, using an empty key (every request will fail verification)"
            );
            Arc::new(Vec::new())
        }
    }
}
