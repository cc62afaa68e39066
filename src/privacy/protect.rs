use std::sync::Arc;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use stream_cancel::Tripwire;
use tokio::sync::mpsc;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::crypto::{self, EphemeralSecret, KEY_LEN, SALT_LEN};
use crate::flow::encrypted::{EncryptedRecord, Plaintext};
use crate::flow::ioc::Ioc;
use crate::flow::key::Key;
use crate::flow::message::Envelope;
use crate::flow::record::{display_ip, parse_ip16};
use crate::privacy::pseudo::{categorize, Category};
use crate::sinks::kafka::{self, ProducerEvents, ProducerHandle};

const AES_BLOCK_SIZE: usize = 16;

type Aes256Ofb = ofb::Ofb<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// A fatal worker error, reported to the orchestrator before the
/// worker parks on its shutdown signal.
#[derive(Debug)]
pub struct WorkerDeath {
    pub worker: usize,
    pub error: crate::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Draining,
}

/// One privacy worker. Owns its shard of the envelope stream, its own
/// producer and its own session key.
pub struct Protector {
    num: usize,
    input: mpsc::Receiver<Bytes>,
    shutdown: Tripwire,
    death: mpsc::UnboundedSender<WorkerDeath>,
    config: Arc<Config>,
    producer: Option<(ProducerHandle, ProducerEvents)>,
}

/// The per-worker state shared with the fire-and-forget side-effect
/// tasks. Dropped as soon as the input channel is observed closed,
/// which releases the worker's hold on the producer input.
struct Context {
    num: usize,
    config: Arc<Config>,
    producer: ProducerHandle,
    session_key: Zeroizing<[u8; KEY_LEN]>,
    session_key_id: String,
}

impl Protector {
    pub fn new(
        num: usize,
        input: mpsc::Receiver<Bytes>,
        shutdown: Tripwire,
        death: mpsc::UnboundedSender<WorkerDeath>,
        config: Arc<Config>,
    ) -> Protector {
        Protector {
            num,
            input,
            shutdown,
            death,
            config,
            producer: None,
        }
    }

    /// Like [`Protector::new`], but with a preopened producer instead
    /// of connecting to the configured brokers.
    pub fn with_producer(
        num: usize,
        input: mpsc::Receiver<Bytes>,
        shutdown: Tripwire,
        death: mpsc::UnboundedSender<WorkerDeath>,
        config: Arc<Config>,
        handle: ProducerHandle,
        events: ProducerEvents,
    ) -> Protector {
        Protector {
            num,
            input,
            shutdown,
            death,
            config,
            producer: Some((handle, events)),
        }
    }

    pub async fn run(mut self) {
        let (handle, events) = match self.producer.take() {
            Some(producer) => producer,
            None => match kafka::connect(&self.config.kafka) {
                Ok(producer) => producer,
                Err(error) => return self.fail(error.into()).await,
            },
        };

        let (session_key, session_key_id) = match init_session_key(&self.config, &handle).await {
            Ok(session) => session,
            Err(error) => return self.fail(error).await,
        };
        info!(
            message = "Session key published.",
            worker = self.num,
            session_key_id = %session_key_id,
        );

        let num = self.num;
        let context = Context {
            num,
            config: Arc::clone(&self.config),
            producer: handle,
            session_key,
            session_key_id,
        };
        self.run_loop(context, events).await;
        debug!(message = "Worker stopped.", worker = num);
    }

    async fn fail(&mut self, error: crate::Error) {
        let _ = self.death.send(WorkerDeath {
            worker: self.num,
            error,
        });
        self.shutdown.clone().await;
    }

    /// The worker's multiplex loop. In `Running` it serves all four
    /// event sources; the shutdown signal moves it to `Draining`,
    /// where it keeps consuming until the input channel and both
    /// producer streams are observed closed.
    async fn run_loop(mut self, context: Context, events: ProducerEvents) {
        let ProducerEvents {
            mut errors,
            mut successes,
        } = events;
        let shutdown = self.shutdown.clone();
        tokio::pin!(shutdown);
        let mut context = Some(context);

        let mut state = State::Running;
        let mut input_open = true;
        let mut errors_open = true;
        let mut successes_open = true;

        loop {
            if !input_open && !errors_open && !successes_open {
                if state == State::Running {
                    // all channels drained before the shutdown signal;
                    // wait for it so the orchestrator stays in control
                    shutdown.await;
                }
                break;
            }

            tokio::select! {
                _ = &mut shutdown, if state == State::Running => {
                    debug!(message = "Worker draining.", worker = self.num);
                    state = State::Draining;
                }
                maybe = self.input.recv(), if input_open => match maybe {
                    Some(buffer) => {
                        if let Some(context) = context.as_ref() {
                            context.process(&buffer).await;
                        }
                    }
                    None => {
                        input_open = false;
                        // closing the producer input lets the driver
                        // finish and close the result streams
                        context = None;
                    }
                },
                maybe = errors.recv(), if errors_open => match maybe {
                    Some(error) => {
                        error!(message = "Producer error.", worker = self.num, %error);
                    }
                    None => errors_open = false,
                },
                maybe = successes.recv(), if successes_open => match maybe {
                    // no per-message delivery tracking
                    Some(_) => {}
                    None => successes_open = false,
                },
            }
        }
    }
}

impl Context {
    /// Decodes one envelope and transforms every contained record:
    /// discard filtering, endpoint pseudonymization, IOC side-outputs
    /// and the encrypted-original side channel.
    async fn process(&self, buffer: &[u8]) {
        let envelope = match Envelope::decode(buffer) {
            Ok(envelope) => envelope,
            Err(error) => {
                error!(message = "Failed to decode flow envelope.", worker = self.num, %error);
                return;
            }
        };

        for mut record in envelope.records() {
            // the copy must be taken after the RecordID exists, so the
            // pseudotext<>ciphertext relationship stays trackable, and
            // before any address is rewritten
            record.record_id = Uuid::new_v4().to_string();
            let original = record.clone();

            let src = parse_ip16(&record.src_address);
            let dst = parse_ip16(&record.dst_address);

            let networks = &self.config.networks;
            if src.map_or(false, |ip| networks.discard(ip))
                || dst.map_or(false, |ip| networks.discard(ip))
            {
                continue;
            }

            let mut store_encrypted = false;

            if let Some(ip) = src {
                if let Some(category) = categorize(networks, ip) {
                    store_encrypted = true;
                    if category == Category::Customer {
                        self.spawn_ioc(record.to_ioc(display_ip(ip)));
                    }
                    record.src_address = self.config.pseudonymizer.synthesize(category, ip);
                }
            }

            if let Some(ip) = dst {
                if let Some(category) = categorize(networks, ip) {
                    store_encrypted = true;
                    if category == Category::Customer {
                        self.spawn_ioc(record.to_ioc(display_ip(ip)));
                    }
                    record.dst_address = self.config.pseudonymizer.synthesize(category, ip);
                }
            }

            let payload = match serde_json::to_vec(&record) {
                Ok(payload) => payload,
                Err(error) => {
                    error!(message = "Failed to serialize record.", worker = self.num, %error);
                    continue;
                }
            };
            if self
                .producer
                .publish(self.config.kafka.topics.data.clone(), payload)
                .await
                .is_err()
            {
                warn!(message = "Producer closed; dropping record.", worker = self.num);
                return;
            }

            if store_encrypted {
                self.spawn_encrypt(original.export_plaintext());
            }
        }
    }

    fn spawn_ioc(&self, ioc: Ioc) {
        let producer = self.producer.clone();
        let topic = self.config.kafka.topics.ioc.clone();
        let worker = self.num;
        tokio::spawn(async move {
            match serde_json::to_vec(&ioc) {
                Ok(payload) => {
                    if producer.publish(topic, payload).await.is_err() {
                        warn!(message = "Producer closed; dropping IOC.", worker);
                    }
                }
                Err(error) => {
                    error!(message = "Failed to serialize IOC.", worker, %error);
                }
            }
        });
    }

    fn spawn_encrypt(&self, plaintext: Plaintext) {
        let producer = self.producer.clone();
        let topic = self.config.kafka.topics.encrypted.clone();
        let session_key = self.session_key.clone();
        let session_key_id = self.session_key_id.clone();
        let worker = self.num;
        tokio::spawn(async move {
            let record = match encrypt_record(&plaintext, &session_key, &session_key_id) {
                Ok(record) => record,
                Err(error) => {
                    error!(message = "Failed to encrypt record originals.", worker, %error);
                    return;
                }
            };
            match serde_json::to_vec(&record) {
                Ok(payload) => {
                    if producer.publish(topic, payload).await.is_err() {
                        warn!(message = "Producer closed; dropping encrypted record.", worker);
                    }
                }
                Err(error) => {
                    error!(message = "Failed to serialize encrypted record.", worker, %error);
                }
            }
        });
    }
}

/// Builds and publishes the session-key envelope (worker startup).
///
/// The session key is wrapped sequentially under one keystream per
/// recipient, so recovering it requires both derived keys. The
/// ephemeral secret is zeroized once the wrapping is done.
async fn init_session_key(
    config: &Config,
    producer: &ProducerHandle,
) -> crate::Result<(Zeroizing<[u8; KEY_LEN]>, String)> {
    let recipients = [config.unlock_key_one, config.unlock_key_two];

    let mut common_salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut common_salt);

    let mut session_key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut *session_key);

    let session_key_id = Uuid::new_v4().to_string();

    let (ephemeral, ephemeral_public) = EphemeralSecret::generate();

    // the session key is wrapped in place
    let mut value = session_key.to_vec();
    for recipient in &recipients {
        let iv = crypto::keyed_salt(recipient, &common_salt);
        let kek = Zeroizing::new(crypto::derive_key(&ephemeral, recipient, &common_salt)?);
        Aes256Ofb::new(
            GenericArray::from_slice(kek.as_ref()),
            GenericArray::from_slice(&iv),
        )
        .apply_keystream(&mut value);
    }
    drop(ephemeral);

    let mut key = Key {
        id: session_key_id.clone(),
        slot_map: 0,
        value,
        salt: common_salt.to_vec(),
        public_key: ephemeral_public.to_vec(),
        ..Key::default()
    };
    key.serialize();
    key.calculate_mac();

    let payload = serde_json::to_vec(&key)?;
    producer
        .publish(config.kafka.topics.session.clone(), payload)
        .await
        .map_err(|_| crate::Error::from("producer closed during session key publish"))?;

    Ok((session_key, session_key_id))
}

/// Encrypts a plaintext original under the worker's session key:
/// binary encoding, PKCS#7 padding, AES-256-CBC with a fresh random
/// IV that doubles as the salt field, then the Poly1305 MAC over the
/// serialized fields.
fn encrypt_record(
    plaintext: &Plaintext,
    session_key: &[u8; KEY_LEN],
    session_key_id: &str,
) -> crate::Result<EncryptedRecord> {
    let raw = bincode::serialize(plaintext)?;

    let mut iv = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut iv);

    let padded = crypto::pad(&raw, AES_BLOCK_SIZE)?;
    let ciphertext = Aes256CbcEnc::new(
        GenericArray::from_slice(session_key),
        GenericArray::from_slice(&iv),
    )
    .encrypt_padded_vec_mut::<NoPadding>(&padded);

    let mut record = EncryptedRecord {
        record_id: plaintext.record_id.clone(),
        session_key_id: session_key_id.to_string(),
        salt: BASE64.encode(iv),
        value: BASE64.encode(ciphertext),
        signature: String::new(),
    };
    record.calculate_mac();
    Ok(record)
}
