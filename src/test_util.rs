//! Helpers shared by the unit and integration tests: a channel-backed
//! mock producer with the same shape as the kafka adapter, envelope
//! builders and config construction without environment variables.

use std::sync::Arc;

use bytes::Bytes;
use curve25519_dalek::edwards::EdwardsPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use stream_cancel::{Trigger, Tripwire};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::crypto::PublicKey;
use crate::privacy::classify::NetworkSets;
use crate::privacy::protect::{Protector, WorkerDeath};
use crate::privacy::pseudo::Pseudonymizer;
use crate::sinks::kafka::{
    Delivery, KafkaConfig, OutboundMessage, ProducerEvents, ProducerHandle, Topics,
};

pub fn trace_init() {
    crate::trace::init("debug");
}

/// A Curve25519 keypair whose public half is encoded the way the
/// configuration expects: as a hex compressed Edwards point. The
/// secret half is the clamped scalar bytes, usable for the consumer
/// side of the ECDH.
pub fn unlock_keypair() -> ([u8; 32], String) {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    let public = EdwardsPoint::mul_base_clamped(secret).compress();
    (secret, hex::encode(public.to_bytes()))
}

pub fn topics() -> Topics {
    Topics {
        data: "flow-data".into(),
        ioc: "flow-ioc".into(),
        session: "flow-session".into(),
        encrypted: "flow-encrypted".into(),
    }
}

/// A full config around the given network sets, with fresh unlock
/// keys. Returns the unlock secrets alongside for tests that reverse
/// the key wrapping.
pub fn test_config_with_secrets(networks: NetworkSets) -> (Config, [[u8; 32]; 2]) {
    let (secret_one, unlock_one) = unlock_keypair();
    let (secret_two, unlock_two) = unlock_keypair();
    let config = Config {
        listen_address: "127.0.0.1:0".into(),
        workers: 4,
        networks,
        pseudonymizer: Pseudonymizer::new(b"0123456789abcdef0123456789abcdef", b"daily-pad")
            .unwrap(),
        unlock_key_one: PublicKey::from_hex(&unlock_one).unwrap(),
        unlock_key_two: PublicKey::from_hex(&unlock_two).unwrap(),
        kafka: KafkaConfig {
            bootstrap_servers: vec!["localhost:9092".into()],
            topics: topics(),
        },
    };
    (config, [secret_one, secret_two])
}

pub fn test_config(networks: NetworkSets) -> Config {
    test_config_with_secrets(networks).0
}

/// A producer with the adapter's channel contract but no broker
/// behind it: every message is captured and acknowledged. The error
/// and success channels close once all input senders are dropped.
pub fn mock_producer() -> (
    ProducerHandle,
    ProducerEvents,
    mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let (input_tx, mut input_rx) = mpsc::channel::<OutboundMessage>(64);
    let (error_tx, error_rx) = mpsc::channel(1024);
    let (success_tx, success_rx) = mpsc::channel(1024);
    let (capture_tx, capture_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(message) = input_rx.recv().await {
            let _ = success_tx
                .send(Delivery {
                    topic: message.topic.clone(),
                    partition: 0,
                    offset: 0,
                })
                .await;
            let _ = capture_tx.send(message);
        }
        drop(error_tx);
    });

    (
        ProducerHandle::new(input_tx),
        ProducerEvents {
            errors: error_rx,
            successes: success_rx,
        },
        capture_rx,
    )
}

/// A worker wired to a mock producer, ready to be fed envelopes.
pub struct TestWorker {
    pub input: mpsc::Sender<Bytes>,
    pub trigger: Trigger,
    pub death: mpsc::UnboundedReceiver<WorkerDeath>,
    pub outputs: mpsc::UnboundedReceiver<OutboundMessage>,
    pub handle: JoinHandle<()>,
}

pub fn spawn_protector(config: Arc<Config>) -> TestWorker {
    let (input_tx, input_rx) = mpsc::channel(16);
    let (trigger, tripwire): (Trigger, Tripwire) = Tripwire::new();
    let (death_tx, death_rx) = mpsc::unbounded_channel();
    let (producer, events, outputs) = mock_producer();

    let protector =
        Protector::with_producer(0, input_rx, tripwire, death_tx, config, producer, events);
    let handle = tokio::spawn(protector.run());

    TestWorker {
        input: input_tx,
        trigger,
        death: death_rx,
        outputs,
        handle,
    }
}

impl TestWorker {
    /// Closes the input, triggers shutdown, waits for the worker to
    /// drain and returns everything it published, in order.
    pub async fn finish(self) -> Vec<OutboundMessage> {
        let TestWorker {
            input,
            trigger,
            death: _death,
            mut outputs,
            handle,
        } = self;
        drop(input);
        trigger.cancel();
        let _ = handle.await;

        let mut published = Vec::new();
        while let Some(message) = outputs.recv().await {
            published.push(message);
        }
        published
    }
}

/// One envelope line with a single data set built from `(element id,
/// raw json value)` pairs.
pub fn envelope(agent_id: &str, fields: &[(u16, serde_json::Value)]) -> Bytes {
    envelope_with_sets(agent_id, &[fields.to_vec()])
}

pub fn envelope_with_sets(agent_id: &str, sets: &[Vec<(u16, serde_json::Value)>]) -> Bytes {
    let data_sets: Vec<serde_json::Value> = sets
        .iter()
        .map(|set| {
            set.iter()
                .map(|(id, value)| json!({"I": id, "V": value}))
                .collect()
        })
        .collect();
    let body = json!({
        "AgentID": agent_id,
        "Header": {
            "Version": 10,
            "Length": 0,
            "ExportTime": 1_600_000_000,
            "SequenceNo": 1,
            "DomainID": 0,
        },
        "DataSets": data_sets,
    });
    Bytes::from(body.to_string())
}

/// A minimal TCP flow data set between two IPv4 endpoints.
pub fn flow_fields(src: &str, dst: &str) -> Vec<(u16, serde_json::Value)> {
    vec![
        (1, json!(4242)),
        (2, json!(7)),
        (4, json!(6)),
        (6, json!("0x12")),
        (7, json!(44321)),
        (8, json!(src)),
        (11, json!(443)),
        (12, json!(dst)),
        (60, json!(4)),
        (152, json!(1_600_000_000_123i64)),
        (153, json!(1_600_000_060_456i64)),
    ]
}
