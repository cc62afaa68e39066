use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use tokio::sync::mpsc;

/// The bare minimum the dispatcher decodes from an envelope: the
/// agent identifier. Everything else is left to the worker.
#[derive(Debug, Default, Deserialize)]
struct AgentIdProbe {
    #[serde(rename = "AgentID", default)]
    agent_id: String,
}

#[derive(Debug, Snafu)]
pub enum DispatchError {
    #[snafu(display("failed to decode envelope for dispatch: {}", source))]
    Decode { source: serde_json::Error },
    #[snafu(display("worker {} is gone", index))]
    WorkerGone { index: usize },
}

/// Shards envelopes across the worker pool by agent identity. Holds
/// the orchestrator's worker registry as a read-only slice of input
/// channels.
#[derive(Clone)]
pub struct Dispatcher {
    inputs: Arc<[mpsc::Sender<Bytes>]>,
}

impl Dispatcher {
    pub fn new(inputs: Vec<mpsc::Sender<Bytes>>) -> Dispatcher {
        Dispatcher {
            inputs: inputs.into(),
        }
    }

    pub fn workers(&self) -> usize {
        self.inputs.len()
    }

    /// Routes one envelope to the worker owning its agent shard,
    /// blocking while that worker's input channel is full. All
    /// envelopes from the same agent land on the same worker.
    pub async fn dispatch(&self, envelope: Bytes) -> Result<(), DispatchError> {
        let probe: AgentIdProbe = match serde_json::from_slice(&envelope).context(DecodeSnafu) {
            Ok(probe) => probe,
            Err(error) => {
                error!(message = "Dropping undecodable envelope.", %error);
                return Err(error);
            }
        };

        let index = shard_index(&probe.agent_id, self.inputs.len());
        self.inputs[index]
            .send(envelope)
            .await
            .map_err(|_| DispatchError::WorkerGone { index })
    }
}

/// The worker index for an agent: the agent's 16-byte IP form read as
/// a big-endian unsigned integer, modulo the worker count. An
/// unparseable agent identifier maps to the zero value and thus to
/// worker 0.
pub fn shard_index(agent_id: &str, workers: usize) -> usize {
    let value = agent_id
        .parse::<IpAddr>()
        .map(|ip| match ip {
            IpAddr::V4(v4) => u128::from_be_bytes(v4.to_ipv6_mapped().octets()),
            IpAddr::V6(v6) => u128::from_be_bytes(v6.octets()),
        })
        .unwrap_or_default();
    (value % workers as u128) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_index_is_a_pure_function_of_agent_and_pool_size() {
        for workers in 1..=8 {
            let a = shard_index("192.0.2.10", workers);
            let b = shard_index("192.0.2.10", workers);
            assert_eq!(a, b);
            assert!(a < workers);
        }
    }

    #[test]
    fn shard_index_matches_the_big_endian_integer_form() {
        // ::ffff:192.0.2.10 as an integer, mod 4
        let expected = (0xffff_u128 << 32 | 0xc000_020a_u128) % 4;
        assert_eq!(shard_index("192.0.2.10", 4), expected as usize);

        let v6 = "2001:db8::1".parse::<IpAddr>().unwrap();
        let value = match v6 {
            IpAddr::V6(v6) => u128::from_be_bytes(v6.octets()),
            _ => unreachable!(),
        };
        assert_eq!(shard_index("2001:db8::1", 7), (value % 7) as usize);
    }

    #[test]
    fn unparseable_agents_map_to_worker_zero() {
        assert_eq!(shard_index("not-an-ip", 8), 0);
        assert_eq!(shard_index("", 8), 0);
    }

    #[tokio::test]
    async fn dispatch_routes_same_agent_to_same_worker() {
        let mut receivers = Vec::new();
        let mut senders = Vec::new();
        for _ in 0..4 {
            let (tx, rx) = mpsc::channel(16);
            senders.push(tx);
            receivers.push(rx);
        }
        let dispatcher = Dispatcher::new(senders);

        let envelope = Bytes::from(r#"{"AgentID":"192.0.2.10","DataSets":[]}"#);
        dispatcher.dispatch(envelope.clone()).await.unwrap();
        dispatcher.dispatch(envelope).await.unwrap();

        let index = shard_index("192.0.2.10", 4);
        assert_eq!(receivers[index].len(), 2);
        for (i, rx) in receivers.iter().enumerate() {
            if i != index {
                assert_eq!(rx.len(), 0);
            }
        }
    }

    #[tokio::test]
    async fn dispatch_rejects_undecodable_envelopes() {
        let (tx, _rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(vec![tx]);
        let result = dispatcher.dispatch(Bytes::from_static(b"{broken")).await;
        assert!(matches!(result, Err(DispatchError::Decode { .. })));
    }
}
