//! Process configuration, read once from the environment during
//! bootstrap. The resulting [`Config`] is immutable and shared by
//! reference with the dispatcher, the workers and the ingress.

use std::path::Path;

use snafu::{ResultExt, Snafu};

use crate::crypto::{CryptoError, PublicKey};
use crate::privacy::classify::{NetworkFileError, NetworkSets};
use crate::privacy::pseudo::Pseudonymizer;
use crate::sinks::kafka::{KafkaConfig, Topics};

pub const ENV_LISTEN_ADDRESS: &str = "PRIVACY_LISTEN_ADDRESS";
pub const ENV_DATAPAD: &str = "PRIVACY_DATAPAD";
pub const ENV_DAILY_KEY: &str = "PRIVACY_DAILY_KEY";
pub const ENV_NETWORKFILE_PATH: &str = "PRIVACY_NETWORKFILE_PATH";
pub const ENV_UNLOCK_PUBLICKEY_ONE: &str = "UNLOCK_PUBLICKEY_ONE";
pub const ENV_UNLOCK_PUBLICKEY_TWO: &str = "UNLOCK_PUBLICKEY_TWO";
pub const ENV_KAFKA_BROKER_PEERS: &str = "KAFKA_BROKER_PEERS";
pub const ENV_TOPIC_DATA: &str = "KAFKA_PRODUCER_TOPIC_DATA";
pub const ENV_TOPIC_IOC: &str = "KAFKA_PRODUCER_TOPIC_IOC";
pub const ENV_TOPIC_SESSION: &str = "KAFKA_PRODUCER_TOPIC_SESSION";
pub const ENV_TOPIC_ENCRYPTED: &str = "KAFKA_PRODUCER_TOPIC_ENCRYPTED";

pub const DEFAULT_LISTEN_ADDRESS: &str = "localhost:4150";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("missing required environment variable {}", name))]
    MissingEnv { name: &'static str },
    #[snafu(display("{} is not valid hex: {}", name, source))]
    InvalidHex {
        name: &'static str,
        source: hex::FromHexError,
    },
    #[snafu(display("{} must decode to 1..=64 bytes, got {}", name, len))]
    InvalidKeyLength { name: &'static str, len: usize },
    #[snafu(display("{} holds an invalid public key: {}", name, source))]
    InvalidPublicKey {
        name: &'static str,
        source: CryptoError,
    },
    #[snafu(display("{}", source))]
    Networks { source: NetworkFileError },
}

/// Everything the process needs to run, validated up front. All
/// fields are effectively read-only after construction.
#[derive(Clone)]
pub struct Config {
    pub listen_address: String,
    pub workers: usize,
    pub networks: NetworkSets,
    pub pseudonymizer: Pseudonymizer,
    pub unlock_key_one: PublicKey,
    pub unlock_key_two: PublicKey,
    pub kafka: KafkaConfig,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let listen_address = match std::env::var(ENV_LISTEN_ADDRESS) {
            Ok(value) if !value.is_empty() => value,
            _ => DEFAULT_LISTEN_ADDRESS.to_string(),
        };

        let data_pad = required_hex(ENV_DATAPAD)?;
        let pseudo_key = required_hex(ENV_DAILY_KEY)?;
        let pseudonymizer =
            Pseudonymizer::new(&pseudo_key, &data_pad).map_err(|_| ConfigError::InvalidKeyLength {
                name: ENV_DAILY_KEY,
                len: pseudo_key.len(),
            })?;

        let network_path = required(ENV_NETWORKFILE_PATH)?;
        let networks = NetworkSets::load(Path::new(&network_path)).context(NetworksSnafu)?;

        let unlock_key_one = PublicKey::from_hex(&required(ENV_UNLOCK_PUBLICKEY_ONE)?)
            .context(InvalidPublicKeySnafu {
                name: ENV_UNLOCK_PUBLICKEY_ONE,
            })?;
        let unlock_key_two = PublicKey::from_hex(&required(ENV_UNLOCK_PUBLICKEY_TWO)?)
            .context(InvalidPublicKeySnafu {
                name: ENV_UNLOCK_PUBLICKEY_TWO,
            })?;

        let bootstrap_servers: Vec<String> = required(ENV_KAFKA_BROKER_PEERS)?
            .split(',')
            .map(|peer| peer.trim().to_string())
            .filter(|peer| !peer.is_empty())
            .collect();
        if bootstrap_servers.is_empty() {
            return Err(ConfigError::MissingEnv {
                name: ENV_KAFKA_BROKER_PEERS,
            });
        }

        let kafka = KafkaConfig {
            bootstrap_servers,
            topics: Topics {
                data: required(ENV_TOPIC_DATA)?,
                ioc: required(ENV_TOPIC_IOC)?,
                session: required(ENV_TOPIC_SESSION)?,
                encrypted: required(ENV_TOPIC_ENCRYPTED)?,
            },
        };

        Ok(Config {
            listen_address,
            workers: num_cpus::get().max(1),
            networks,
            pseudonymizer,
            unlock_key_one,
            unlock_key_two,
            kafka,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingEnv { name })
}

fn required_hex(name: &'static str) -> Result<Vec<u8>, ConfigError> {
    let decoded = hex::decode(required(name)?).context(InvalidHexSnafu { name })?;
    if decoded.is_empty() {
        return Err(ConfigError::MissingEnv { name });
    }
    Ok(decoded)
}
