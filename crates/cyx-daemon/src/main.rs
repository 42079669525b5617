//! cyx-daemon: an optional host process wiring a [`cyx_core::Core`] to a
//! blocking poll loop, for callers that don't want to embed the library
//! directly in an app event loop.
//!
//! Transport/Onion/Dht are external collaborators cyxchat's spec leaves
//! unspecified (§6); until a production implementation is wired in here,
//! this binary runs against the in-memory `Fake*` ones so the loop, config,
//! and identity plumbing below can still be exercised end to end.

mod config;

use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use config::CyxConfig;
use cyx_crypto::ed25519::SigningKey;
use cyx_dht::FakeDht;
use cyx_onion::FakeOnionNetwork;
use cyx_transport::FakeNetwork;
use cyx_types::NodeId;

const TICK_MS: u64 = 25;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("cyxchat=info".parse()?),
        )
        .init();

    info!("cyxchat daemon starting");

    let config = CyxConfig::load()?;
    std::fs::create_dir_all(config.data_dir())?;

    let signing_key = load_or_generate_identity(&config)?;
    let local_id = NodeId(cyx_crypto::ed25519::derive_node_id(&signing_key.verifying_key()));
    info!(local_id = %local_id, "identity loaded");

    let transport_net = FakeNetwork::new();
    let onion_net = FakeOnionNetwork::new();
    let transport = Rc::new(transport_net.register(local_id));
    let onion = Rc::new(onion_net.register(local_id));
    let dht = Rc::new(FakeDht::new());

    let relay_servers: Vec<NodeId> = config
        .relay
        .endpoints
        .iter()
        .filter_map(|endpoint| {
            let (host, port) = endpoint.rsplit_once(':')?;
            let port: u16 = port.parse().ok()?;
            Some(cyx_relay::relay_virtual_id(host, port))
        })
        .collect();
    if relay_servers.len() < config.relay.endpoints.len() {
        warn!("dropped one or more malformed relay endpoints from config");
    }

    let mut core = cyx_core::Core::new(local_id, signing_key, transport, onion, dht, &relay_servers)?;

    if !config.dns.advertise_name.is_empty() {
        match core.dns.register(&config.dns.advertise_name, [0u8; 24], now_ms()) {
            Ok(_frame) => info!(name = %config.dns.advertise_name, "registered advertised name"),
            Err(e) => error!(error = %e, "failed to register advertised name"),
        }
    }

    info!("entering poll loop");
    loop {
        let events = core.poll(now_ms());
        for event in events {
            tracing::debug!(?event, "core event");
        }
        std::thread::sleep(std::time::Duration::from_millis(TICK_MS));
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn load_or_generate_identity(config: &CyxConfig) -> anyhow::Result<SigningKey> {
    let path = config.key_path();
    if let Ok(bytes) = std::fs::read(&path) {
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| anyhow::anyhow!("identity key file is not 32 bytes"))?;
        return Ok(SigningKey::from_bytes(&seed));
    }
    warn!(path = %path.display(), "no identity key found, generating a new one");
    let signing_key = SigningKey::generate();
    std::fs::write(&path, signing_key.to_bytes())?;
    Ok(signing_key)
}
