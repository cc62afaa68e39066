//! The publisher adapter: a thin, channel-shaped wrapper over the
//! rdkafka async producer. The worker sees three channels (outbound
//! input, delivery errors, delivery successes) and a close operation,
//! dropping every input sender, that eventually closes all three.

use std::fmt;

use bytes::Bytes;
use futures::channel::oneshot::Canceled;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

pub const CLIENT_ID: &str = "privacyprotector";

const INPUT_BUFFER: usize = 256;
const RESULT_BUFFER: usize = 1024;

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("creating kafka producer failed: {}", source))]
    KafkaCreateFailed { source: KafkaError },
}

/// Broker endpoints plus the four destination topics.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: Vec<String>,
    pub topics: Topics,
}

#[derive(Debug, Clone)]
pub struct Topics {
    pub data: String,
    pub ioc: String,
    pub session: String,
    pub encrypted: String,
}

/// One outbound message. Without a key the partitioner falls back to
/// random assignment.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// A confirmed delivery. Carried on the successes channel; the worker
/// does not track these per message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A failed delivery, after the producer exhausted its own retries.
#[derive(Debug)]
pub struct ProducerError {
    pub topic: String,
    pub error: KafkaError,
}

impl fmt::Display for ProducerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "topic {}: {}", self.topic, self.error)
    }
}

impl std::error::Error for ProducerError {}

/// The sending half handed to the worker and its side-effect tasks.
/// Dropping every clone closes the producer.
#[derive(Clone)]
pub struct ProducerHandle {
    input: mpsc::Sender<OutboundMessage>,
}

impl ProducerHandle {
    pub fn new(input: mpsc::Sender<OutboundMessage>) -> ProducerHandle {
        ProducerHandle { input }
    }

    pub async fn send(
        &self,
        message: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.input.send(message).await
    }

    pub async fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.send(OutboundMessage {
            topic,
            key: None,
            payload: payload.into(),
        })
        .await
    }
}

/// The receiving halves owned by the worker's multiplex loop.
pub struct ProducerEvents {
    pub errors: mpsc::Receiver<ProducerError>,
    pub successes: mpsc::Receiver<Delivery>,
}

/// Opens a producer against the configured brokers and spawns the
/// driver task that shovels outbound messages into it.
pub fn connect(config: &KafkaConfig) -> Result<(ProducerHandle, ProducerEvents), BuildError> {
    let producer: FutureProducer = client_config(config)
        .create()
        .context(KafkaCreateFailedSnafu)?;

    let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
    let (error_tx, error_rx) = mpsc::channel(RESULT_BUFFER);
    let (success_tx, success_rx) = mpsc::channel(RESULT_BUFFER);
    tokio::spawn(drive(producer, input_rx, error_tx, success_tx));

    Ok((
        ProducerHandle::new(input_tx),
        ProducerEvents {
            errors: error_rx,
            successes: success_rx,
        },
    ))
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.bootstrap_servers.join(","))
        .set("client.id", CLIENT_ID)
        // wait-for-local-ack discipline
        .set("acks", "1")
        .set("message.send.max.retries", "3")
        .set("socket.keepalive.enable", "true")
        // hash partitioning on the key, random without one
        .set("partitioner", "murmur2_random");
    client_config
}

/// Forwards outbound messages into the producer and fans delivery
/// results out to the error/success channels. Exits, dropping both
/// result senders, once the input is closed and nothing is in flight.
async fn drive(
    producer: FutureProducer,
    mut input: mpsc::Receiver<OutboundMessage>,
    errors: mpsc::Sender<ProducerError>,
    successes: mpsc::Sender<Delivery>,
) {
    type InFlight = BoxFuture<
        'static,
        (
            String,
            Result<Result<(i32, i64), (KafkaError, rdkafka::message::OwnedMessage)>, Canceled>,
        ),
    >;
    let mut in_flight: FuturesUnordered<InFlight> = FuturesUnordered::new();
    let mut input_open = true;

    loop {
        if !input_open && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            maybe = input.recv(), if input_open => match maybe {
                Some(message) => match begin_send(&producer, &message).await {
                    Ok(future) => {
                        let topic = message.topic;
                        in_flight.push(async move { (topic, future.await) }.boxed());
                    }
                    Err(error) => {
                        let _ = errors.send(ProducerError { topic: message.topic, error }).await;
                    }
                },
                None => input_open = false,
            },
            Some((topic, result)) = in_flight.next(), if !in_flight.is_empty() => {
                match result {
                    Ok(Ok((partition, offset))) => {
                        trace!(message = "Produced message.", %topic, partition, offset);
                        let _ = successes.send(Delivery { topic, partition, offset }).await;
                    }
                    Ok(Err((error, _message))) => {
                        let _ = errors.send(ProducerError { topic, error }).await;
                    }
                    Err(Canceled) => {
                        let _ = errors.send(ProducerError { topic, error: KafkaError::Canceled }).await;
                    }
                }
            },
        }
    }
}

/// Enqueues one message, backing off briefly while the rdkafka queue
/// is full.
async fn begin_send(
    producer: &FutureProducer,
    message: &OutboundMessage,
) -> Result<DeliveryFuture, KafkaError> {
    loop {
        let mut record =
            FutureRecord::<[u8], [u8]>::to(&message.topic).payload(message.payload.as_ref());
        if let Some(key) = &message.key {
            record = record.key(key.as_ref());
        }
        match producer.send_result(record) {
            Ok(future) => return Ok(future),
            Err((error, _record))
                if error == KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) =>
            {
                debug!(message = "The rdkafka queue is full.", %error);
                sleep(Duration::from_millis(10)).await;
            }
            Err((error, _record)) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_carries_the_producer_discipline() {
        let config = KafkaConfig {
            bootstrap_servers: vec!["broker-1:9092".into(), "broker-2:9092".into()],
            topics: Topics {
                data: "data".into(),
                ioc: "ioc".into(),
                session: "session".into(),
                encrypted: "encrypted".into(),
            },
        };
        let client = client_config(&config);
        assert_eq!(
            client.get("bootstrap.servers"),
            Some("broker-1:9092,broker-2:9092")
        );
        assert_eq!(client.get("client.id"), Some(CLIENT_ID));
        assert_eq!(client.get("acks"), Some("1"));
        assert_eq!(client.get("message.send.max.retries"), Some("3"));
        assert_eq!(client.get("partitioner"), Some("murmur2_random"));
    }
}
