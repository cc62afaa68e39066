use serde::Deserialize;
use serde_json::value::RawValue;

use crate::flow::bitmask::Bitmask;
use crate::flow::protocol::protocol_name;
use crate::flow::record::{canonical_ip, millis_to_datetime, Record, TcpFlags};

// IPFIX information element identifiers.
const OCTET_DELTA_COUNT: u16 = 1;
const PACKET_DELTA_COUNT: u16 = 2;
const PROTOCOL_IDENTIFIER: u16 = 4;
const TCP_CONTROL_BITS: u16 = 6;
const SOURCE_TRANSPORT_PORT: u16 = 7;
const SOURCE_IPV4_ADDRESS: u16 = 8;
const INGRESS_INTERFACE: u16 = 10;
const DESTINATION_TRANSPORT_PORT: u16 = 11;
const DESTINATION_IPV4_ADDRESS: u16 = 12;
const EGRESS_INTERFACE: u16 = 14;
const SOURCE_IPV6_ADDRESS: u16 = 27;
const DESTINATION_IPV6_ADDRESS: u16 = 28;
const IP_VERSION: u16 = 60;
const FLOW_DIRECTION: u16 = 61;
const EXPORTER_IPV4_ADDRESS: u16 = 130;
const EXPORTER_IPV6_ADDRESS: u16 = 131;
const EXPORTING_PROCESS_ID: u16 = 144;
const FLOW_START_MILLISECONDS: u16 = 152;
const FLOW_END_MILLISECONDS: u16 = 153;

/// One ingress message: an IPFIX export in its JSON envelope, carrying
/// any number of data sets under an agent identifier.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "AgentID", default)]
    pub agent_id: String,
    #[serde(rename = "Header", default)]
    pub header: Header,
    #[serde(rename = "DataSets", default)]
    pub data_sets: Vec<DataSet>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Header {
    #[serde(rename = "Version", default)]
    pub version: i64,
    #[serde(rename = "Length", default)]
    pub length: i64,
    #[serde(rename = "ExportTime", default)]
    pub export_time: i64,
    #[serde(rename = "SequenceNo", default)]
    pub sequence_no: i64,
    #[serde(rename = "DomainID", default)]
    pub domain_id: i64,
}

pub type DataSet = Vec<Field>;

/// One key/value pair inside a data set, keyed by IPFIX element id.
/// The value is kept as raw JSON; its interpretation depends on the
/// element id.
#[derive(Debug, Deserialize)]
pub struct Field {
    #[serde(rename = "I")]
    pub id: f64,
    #[serde(rename = "V")]
    pub value: Box<RawValue>,
}

impl Envelope {
    pub fn decode(buffer: &[u8]) -> Result<Envelope, serde_json::Error> {
        serde_json::from_slice(buffer)
    }

    /// Lazily converts the contained data sets into records. Garbage
    /// field values decode to zero values; unrecognized element ids
    /// are ignored.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.data_sets.iter().map(move |set| self.convert(set))
    }

    fn convert(&self, set: &DataSet) -> Record {
        let mut record = Record {
            agent_id: self.agent_id.clone(),
            ..Record::default()
        };
        for field in set {
            let raw = field.value.get();
            match field.id as u16 {
                OCTET_DELTA_COUNT => record.octet_count = parse_number(raw),
                PACKET_DELTA_COUNT => record.packet_count = parse_number(raw),
                PROTOCOL_IDENTIFIER => {
                    record.protocol_id = parse_number(raw);
                    record.protocol = protocol_name(record.protocol_id).to_string();
                }
                TCP_CONTROL_BITS => {
                    record.tcp_control_bits = Bitmask::parse(raw);
                    record.tcp_flags = TcpFlags::from_mask(record.tcp_control_bits);
                }
                SOURCE_TRANSPORT_PORT => record.src_port = parse_number(raw),
                SOURCE_IPV4_ADDRESS | SOURCE_IPV6_ADDRESS => {
                    record.src_address = canonical_ip(raw).unwrap_or_default()
                }
                DESTINATION_TRANSPORT_PORT => record.dst_port = parse_number(raw),
                DESTINATION_IPV4_ADDRESS | DESTINATION_IPV6_ADDRESS => {
                    record.dst_address = canonical_ip(raw).unwrap_or_default()
                }
                INGRESS_INTERFACE => record.ingress_if = parse_number(raw),
                EGRESS_INTERFACE => record.egress_if = parse_number(raw),
                IP_VERSION => record.ip_version = parse_number(raw),
                FLOW_DIRECTION => record.flow_direction = parse_number(raw),
                EXPORTER_IPV4_ADDRESS => {
                    record.exporter_v4 = canonical_ip(raw).unwrap_or_default()
                }
                EXPORTER_IPV6_ADDRESS => {
                    record.exporter_v6 = canonical_ip(raw).unwrap_or_default()
                }
                EXPORTING_PROCESS_ID => record.exporter_pid = parse_number(raw),
                FLOW_START_MILLISECONDS => {
                    record.start_milli = millis_to_datetime(parse_number(raw))
                }
                FLOW_END_MILLISECONDS => record.end_milli = millis_to_datetime(parse_number(raw)),
                _ => {}
            }
        }
        record
    }
}

fn parse_number<T: std::str::FromStr + Default>(raw: &str) -> T {
    raw.parse().unwrap_or_default()
}
