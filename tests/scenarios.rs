//! End-to-end worker scenarios: one protector against a mock producer,
//! fed JSON envelopes, with every published message captured.

use std::sync::Arc;

use serde_json::Value;

use flowprotect::dispatch::shard_index;
use flowprotect::flow::{EncryptedRecord, Ioc};
use flowprotect::privacy::NetworkSets;
use flowprotect::sinks::kafka::OutboundMessage;
use flowprotect::test_util::{
    envelope, envelope_with_sets, flow_fields, spawn_protector, test_config, trace_init,
};

fn by_topic<'a>(published: &'a [OutboundMessage], topic: &str) -> Vec<&'a OutboundMessage> {
    published.iter().filter(|m| m.topic == topic).collect()
}

fn data_json(message: &OutboundMessage) -> Value {
    serde_json::from_slice(&message.payload).unwrap()
}

#[tokio::test]
async fn session_key_envelope_is_published_first() {
    trace_init();
    let config = test_config(NetworkSets::from_lists(&[], &[], &[], &[], &[]).unwrap());
    let worker = spawn_protector(Arc::new(config));
    let published = worker.finish().await;

    assert!(!published.is_empty());
    assert_eq!(published[0].topic, "flow-session");
}

#[tokio::test]
async fn discard_drops_the_record_entirely() {
    trace_init();
    let networks =
        NetworkSets::from_lists(&[], &["10.0.0.0/8"], &[], &[], &[]).unwrap();
    let config = test_config(networks);
    let worker = spawn_protector(Arc::new(config));

    worker
        .input
        .send(envelope("192.0.2.1", &flow_fields("10.1.2.3", "8.8.8.8")))
        .await
        .unwrap();

    let published = worker.finish().await;
    assert!(by_topic(&published, "flow-data").is_empty());
    assert!(by_topic(&published, "flow-ioc").is_empty());
    assert!(by_topic(&published, "flow-encrypted").is_empty());
}

#[tokio::test]
async fn public_endpoint_becomes_customer_with_ioc() {
    trace_init();
    let networks = NetworkSets::from_lists(
        &["198.51.100.0/24"],
        &[],
        &[],
        &["198.51.100.0/25"],
        &[],
    )
    .unwrap();
    let config = test_config(networks);
    let worker = spawn_protector(Arc::new(config));

    worker
        .input
        .send(envelope(
            "192.0.2.1",
            &flow_fields("203.0.113.4", "198.51.100.7"),
        ))
        .await
        .unwrap();

    let published = worker.finish().await;

    let iocs = by_topic(&published, "flow-ioc");
    assert_eq!(iocs.len(), 1);
    let ioc: Ioc = serde_json::from_slice(&iocs[0].payload).unwrap();
    assert_eq!(ioc.address, "203.0.113.4");
    assert_eq!(ioc.agent_id, "192.0.2.1");

    let data = by_topic(&published, "flow-data");
    assert_eq!(data.len(), 1);
    let record = data_json(data[0]);
    let src = record["SrcAddress"].as_str().unwrap();
    let dst = record["DstAddress"].as_str().unwrap();
    assert!(src.starts_with("0100:c000:"), "src was {src}");
    assert!(dst.starts_with("0100:b000:"), "dst was {dst}");

    let encrypted = by_topic(&published, "flow-encrypted");
    assert_eq!(encrypted.len(), 1);
    let encrypted: EncryptedRecord = serde_json::from_slice(&encrypted[0].payload).unwrap();
    assert_eq!(encrypted.record_id, record["RecordID"].as_str().unwrap());
}

#[tokio::test]
async fn employee_private_traffic_is_rewritten_without_ioc() {
    trace_init();
    let networks =
        NetworkSets::from_lists(&[], &[], &["10.0.0.0/16"], &[], &["10.0.0.0/8"]).unwrap();
    let config = test_config(networks);
    let worker = spawn_protector(Arc::new(config));

    worker
        .input
        .send(envelope("192.0.2.1", &flow_fields("10.0.0.1", "10.0.0.2")))
        .await
        .unwrap();

    let published = worker.finish().await;

    assert!(by_topic(&published, "flow-ioc").is_empty());

    let data = by_topic(&published, "flow-data");
    assert_eq!(data.len(), 1);
    let record = data_json(data[0]);
    assert!(record["SrcAddress"]
        .as_str()
        .unwrap()
        .starts_with("0100:a000:"));
    assert!(record["DstAddress"]
        .as_str()
        .unwrap()
        .starts_with("0100:a000:"));

    // one encrypted original for the record, not one per endpoint
    assert_eq!(by_topic(&published, "flow-encrypted").len(), 1);
}

#[tokio::test]
async fn reserved_but_not_employee_stays_untouched() {
    trace_init();
    let networks = NetworkSets::from_lists(&[], &[], &[], &[], &["192.0.2.0/24"]).unwrap();
    let config = test_config(networks);
    let worker = spawn_protector(Arc::new(config));

    worker
        .input
        .send(envelope("192.0.2.1", &flow_fields("192.0.2.5", "192.0.2.6")))
        .await
        .unwrap();

    let published = worker.finish().await;

    let data = by_topic(&published, "flow-data");
    assert_eq!(data.len(), 1);
    let record = data_json(data[0]);
    assert_eq!(
        record["SrcAddress"].as_str().unwrap(),
        "0000:0000:0000:0000:0000:ffff:c000:0205"
    );
    assert_eq!(
        record["DstAddress"].as_str().unwrap(),
        "0000:0000:0000:0000:0000:ffff:c000:0206"
    );
    assert!(by_topic(&published, "flow-ioc").is_empty());
    assert!(by_topic(&published, "flow-encrypted").is_empty());
}

#[tokio::test]
async fn records_keep_their_flow_attributes() {
    trace_init();
    let config = test_config(NetworkSets::from_lists(&[], &[], &[], &[], &[]).unwrap());
    let worker = spawn_protector(Arc::new(config));

    worker
        .input
        .send(envelope("192.0.2.1", &flow_fields("10.1.2.3", "8.8.8.8")))
        .await
        .unwrap();

    let published = worker.finish().await;
    let data = by_topic(&published, "flow-data");
    assert_eq!(data.len(), 1);
    let record = data_json(data[0]);
    assert_eq!(record["OctetCount"].as_u64().unwrap(), 4242);
    assert_eq!(record["Protocol"].as_str().unwrap(), "TCP");
    assert_eq!(record["SrcPort"].as_u64().unwrap(), 44321);
    assert_eq!(record["DstPort"].as_u64().unwrap(), 443);
    assert_eq!(record["TcpControlBits"].as_u64().unwrap(), 0x12);
    assert_eq!(record["TcpFlags"]["syn"].as_bool().unwrap(), true);
    assert_eq!(record["AgentID"].as_str().unwrap(), "192.0.2.1");
    assert!(!record["RecordID"].as_str().unwrap().is_empty());
}

#[test]
fn dispatcher_shards_by_agent_identity() {
    // both envelopes from the same agent select the same index,
    // which is the big-endian integer of ::ffff:192.0.2.10 mod 4
    let expected = ((0xffff_u128 << 32 | 0xc000_020a_u128) % 4) as usize;
    assert_eq!(shard_index("192.0.2.10", 4), expected);
    assert_eq!(shard_index("192.0.2.10", 4), expected);
}

#[tokio::test]
async fn drain_publishes_everything_before_stopping() {
    trace_init();
    let config = test_config(NetworkSets::from_lists(&[], &[], &[], &[], &[]).unwrap());
    let worker = spawn_protector(Arc::new(config));

    const K: usize = 10;
    for i in 0..K {
        worker
            .input
            .send(envelope(
                "192.0.2.1",
                &flow_fields(&format!("10.0.0.{i}"), "8.8.8.8"),
            ))
            .await
            .unwrap();
    }

    // shutdown first: the worker drains the input before stopping
    worker.trigger.cancel();
    drop(worker.input);
    let _ = worker.handle.await;

    let mut outputs = worker.outputs;
    let mut published = Vec::new();
    while let Some(message) = outputs.recv().await {
        published.push(message);
    }

    assert_eq!(by_topic(&published, "flow-data").len(), K);
    assert_eq!(by_topic(&published, "flow-session").len(), 1);
    // all endpoints were public, so every record has side outputs
    assert_eq!(by_topic(&published, "flow-encrypted").len(), K);
}

#[tokio::test]
async fn multiple_datasets_fan_out_into_multiple_records() {
    trace_init();
    let config = test_config(NetworkSets::from_lists(&[], &[], &[], &[], &[]).unwrap());
    let worker = spawn_protector(Arc::new(config));

    worker
        .input
        .send(envelope_with_sets(
            "192.0.2.1",
            &[
                flow_fields("10.0.0.1", "8.8.8.8"),
                flow_fields("10.0.0.2", "8.8.4.4"),
            ],
        ))
        .await
        .unwrap();

    let published = worker.finish().await;
    let data = by_topic(&published, "flow-data");
    assert_eq!(data.len(), 2);

    // every record id is unique
    let first = data_json(data[0]);
    let second = data_json(data[1]);
    assert_ne!(first["RecordID"], second["RecordID"]);
}

#[tokio::test]
async fn undecodable_envelopes_are_dropped_not_fatal() {
    trace_init();
    let config = test_config(NetworkSets::from_lists(&[], &[], &[], &[], &[]).unwrap());
    let mut worker = spawn_protector(Arc::new(config));

    worker
        .input
        .send(bytes::Bytes::from_static(b"{broken json"))
        .await
        .unwrap();
    worker
        .input
        .send(envelope("192.0.2.1", &flow_fields("10.0.0.1", "8.8.8.8")))
        .await
        .unwrap();

    assert!(worker.death.try_recv().is_err());
    let published = worker.finish().await;
    assert_eq!(by_topic(&published, "flow-data").len(), 1);
}
