use std::net::{IpAddr, Ipv6Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::bitmask::{self, Bitmask};
use crate::flow::encrypted::Plaintext;
use crate::flow::ioc::Ioc;

/// One decoded flow record. Addresses are canonical 8-group colon-hex
/// IPv6 strings; IPv4 addresses are carried in their IPv4-in-IPv6
/// form. Interface and exporter attributes are decoded but not part of
/// the published record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "OctetCount")]
    pub octet_count: u64,
    #[serde(rename = "PacketCount")]
    pub packet_count: u64,
    #[serde(rename = "ProtocolID")]
    pub protocol_id: u8,
    #[serde(rename = "Protocol", default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(rename = "IPVersion")]
    pub ip_version: u8,
    #[serde(rename = "SrcAddress")]
    pub src_address: String,
    #[serde(rename = "SrcPort")]
    pub src_port: u16,
    #[serde(rename = "DstAddress")]
    pub dst_address: String,
    #[serde(rename = "DstPort")]
    pub dst_port: u16,
    #[serde(rename = "TcpControlBits")]
    pub tcp_control_bits: Bitmask,
    #[serde(rename = "TcpFlags")]
    pub tcp_flags: TcpFlags,
    #[serde(skip)]
    pub ingress_if: u32,
    #[serde(skip)]
    pub egress_if: u32,
    #[serde(skip)]
    pub flow_direction: u8,
    #[serde(rename = "StartDateTimeMilli")]
    pub start_milli: DateTime<Utc>,
    #[serde(rename = "EndDateTimeMilli")]
    pub end_milli: DateTime<Utc>,
    #[serde(rename = "AgentID")]
    pub agent_id: String,
    #[serde(rename = "RecordID")]
    pub record_id: String,
    #[serde(skip)]
    pub exporter_v4: String,
    #[serde(skip)]
    pub exporter_v6: String,
    #[serde(skip)]
    pub exporter_pid: u32,
}

impl Default for Record {
    fn default() -> Record {
        Record {
            octet_count: 0,
            packet_count: 0,
            protocol_id: 0,
            protocol: String::new(),
            ip_version: 0,
            src_address: String::new(),
            src_port: 0,
            dst_address: String::new(),
            dst_port: 0,
            tcp_control_bits: Bitmask::default(),
            tcp_flags: TcpFlags::default(),
            ingress_if: 0,
            egress_if: 0,
            flow_direction: 0,
            start_milli: DateTime::<Utc>::UNIX_EPOCH,
            end_milli: DateTime::<Utc>::UNIX_EPOCH,
            agent_id: String::new(),
            record_id: String::new(),
            exporter_v4: String::new(),
            exporter_v6: String::new(),
            exporter_pid: 0,
        }
    }
}

impl Record {
    /// Projects the IOC-relevant information for `address`, which is
    /// the original endpoint address in display form.
    pub fn to_ioc(&self, address: String) -> Ioc {
        Ioc {
            agent_id: self.agent_id.clone(),
            address,
            ip_version: self.ip_version,
            start: self.start_milli,
            end: self.end_milli,
        }
    }

    /// The sensitive fields that go into the encrypted original.
    pub fn export_plaintext(&self) -> Plaintext {
        Plaintext {
            record_id: self.record_id.clone(),
            src_address: self.src_address.clone(),
            dst_address: self.dst_address.clone(),
        }
    }
}

/// The nine TCP control flags, expanded from the raw bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFlags {
    #[serde(rename = "ns")]
    pub ns: bool,
    #[serde(rename = "cwr")]
    pub cwr: bool,
    #[serde(rename = "ece")]
    pub ece: bool,
    #[serde(rename = "urg")]
    pub urg: bool,
    #[serde(rename = "ack")]
    pub ack: bool,
    #[serde(rename = "psh")]
    pub psh: bool,
    #[serde(rename = "rst")]
    pub rst: bool,
    #[serde(rename = "syn")]
    pub syn: bool,
    #[serde(rename = "fin")]
    pub fin: bool,
}

impl TcpFlags {
    pub fn from_mask(mask: Bitmask) -> TcpFlags {
        TcpFlags {
            ns: mask.has(bitmask::FLAG_NS),
            cwr: mask.has(bitmask::FLAG_CWR),
            ece: mask.has(bitmask::FLAG_ECE),
            urg: mask.has(bitmask::FLAG_URG),
            ack: mask.has(bitmask::FLAG_ACK),
            psh: mask.has(bitmask::FLAG_PSH),
            rst: mask.has(bitmask::FLAG_RST),
            syn: mask.has(bitmask::FLAG_SYN),
            fin: mask.has(bitmask::FLAG_FIN),
        }
    }
}

/// Canonicalizes an address token from an envelope into the 8-group
/// colon-hex IPv6 string form. Returns `None` for unparseable input.
pub fn canonical_ip(token: &str) -> Option<String> {
    let ip = token.trim().trim_matches('"').parse::<IpAddr>().ok()?;
    Some(format_ip16(to_ip16(ip).octets()))
}

/// Formats 16 address bytes as 8 colon-separated 16 bit groups of
/// lowercase hex, without `::` compression.
pub fn format_ip16(octets: [u8; 16]) -> String {
    let mut out = String::with_capacity(39);
    for (i, pair) in octets.chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&format!("{:02x}{:02x}", pair[0], pair[1]));
    }
    out
}

/// Parses any textual IP address into its 16-byte form.
pub fn parse_ip16(address: &str) -> Option<Ipv6Addr> {
    address.parse::<IpAddr>().ok().map(to_ip16)
}

fn to_ip16(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// The display form of a 16-byte address: dotted quad for IPv4-mapped
/// addresses, compressed colon-hex otherwise. Used for IOC output.
pub fn display_ip(ip: Ipv6Addr) -> String {
    match ip.to_ipv4_mapped() {
        Some(v4) => v4.to_string(),
        None => ip.to_string(),
    }
}

/// Converts Unix epoch milliseconds to a UTC timestamp; out-of-range
/// values collapse to the epoch.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_ipv4_into_mapped_form() {
        assert_eq!(
            canonical_ip("\"192.0.2.10\"").unwrap(),
            "0000:0000:0000:0000:0000:ffff:c000:020a"
        );
    }

    #[test]
    fn canonicalizes_ipv6_without_compression() {
        assert_eq!(
            canonical_ip("2001:db8::1").unwrap(),
            "2001:0db8:0000:0000:0000:0000:0000:0001"
        );
    }

    #[test]
    fn canonical_form_matches_the_wire_shape() {
        let canonical = canonical_ip("198.51.100.7").unwrap();
        assert_eq!(canonical.split(':').count(), 8);
        assert!(canonical
            .split(':')
            .all(|group| group.len() == 4 && group.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn rejects_garbage_addresses() {
        assert!(canonical_ip("not-an-ip").is_none());
        assert!(canonical_ip("").is_none());
    }

    #[test]
    fn display_form_restores_dotted_quad() {
        let ip = parse_ip16("203.0.113.4").unwrap();
        assert_eq!(display_ip(ip), "203.0.113.4");
        let ip6 = parse_ip16("2001:db8::1").unwrap();
        assert_eq!(display_ip(ip6), "2001:db8::1");
    }

    #[test]
    fn flags_expand_from_mask() {
        let flags = TcpFlags::from_mask(Bitmask::parse("18"));
        assert!(flags.syn);
        assert!(flags.ack);
        assert!(!flags.fin);
        assert!(!flags.urg);
    }

    #[test]
    fn record_serializes_with_wire_field_names() {
        let mut record = Record::default();
        record.protocol = "TCP".into();
        record.record_id = "id".into();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("SrcAddress").is_some());
        assert!(json.get("StartDateTimeMilli").is_some());
        assert!(json.get("TcpFlags").unwrap().get("syn").is_some());
        assert!(json.get("ingress_if").is_none());
        assert!(json.get("ExpPID").is_none());
    }

    #[test]
    fn empty_protocol_is_omitted() {
        let record = Record::default();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("Protocol").is_none());
    }
}
