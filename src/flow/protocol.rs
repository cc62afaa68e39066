/// Maps an IPFIX protocol identifier to its name. Identifiers outside
/// the table map to `"unknown"`.
pub fn protocol_name(id: u8) -> &'static str {
    match id {
        1 => "ICMP",
        2 => "IGMP",
        3 => "IPv4",
        6 => "TCP",
        17 => "UDP",
        41 => "IPv6",
        47 => "GRE",
        50 => "ESP",
        51 => "AH",
        58 => "IPv6-ICMP",
        115 => "L2TP",
        132 => "SCTP",
        136 => "UDPLite",
        137 => "MPLS-in-IP",
        _ => "unknown",
    }
}
