use std::fmt::Write as _;
use std::net::Ipv6Addr;

use blake2::digest::consts::U32;
use blake2::digest::{InvalidLength, Mac};
use blake2::Blake2bMac;

use crate::privacy::classify::NetworkSets;

type Blake2bMac256 = Blake2bMac<U32>;

/// The traffic category encoded into the first 32 bits of a synthetic
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    EmployeePrivate,
    EmployeePublic,
    Customer,
}

impl Category {
    pub fn prefix(self) -> &'static str {
        match self {
            Category::EmployeePrivate => "0100:a000",
            Category::EmployeePublic => "0100:b000",
            Category::Customer => "0100:c000",
        }
    }
}

/// Decides whether (and how) an endpoint address is pseudonymized.
/// `None` leaves the address untouched. A `Customer` result obliges
/// the caller to emit an IOC for the original address.
pub fn categorize(networks: &NetworkSets, ip: Ipv6Addr) -> Option<Category> {
    if networks.is_private(ip) && networks.is_employee_priv(ip) {
        Some(Category::EmployeePrivate)
    } else if networks.is_company(ip) && networks.is_employee_pub(ip) {
        Some(Category::EmployeePublic)
    } else if networks.is_public(ip) {
        Some(Category::Customer)
    } else {
        None
    }
}

/// Maps addresses to synthetic IPv6 strings via a keyed hash. The key
/// and pad come from configuration; the same input maps to the same
/// synthetic address for the lifetime of the key.
#[derive(Clone)]
pub struct Pseudonymizer {
    mac: Blake2bMac256,
    data_pad: Vec<u8>,
}

impl Pseudonymizer {
    /// `pseudo_key` must be 1..=64 bytes (a BLAKE2b key).
    pub fn new(pseudo_key: &[u8], data_pad: &[u8]) -> Result<Pseudonymizer, InvalidLength> {
        Ok(Pseudonymizer {
            mac: Blake2bMac256::new_from_slice(pseudo_key)?,
            data_pad: data_pad.to_vec(),
        })
    }

    /// The synthetic address for `ip`: the category prefix followed by
    /// bytes 4..16 of keyed BLAKE2b-256(dataPad ‖ ip) as six hex
    /// groups.
    pub fn synthesize(&self, category: Category, ip: Ipv6Addr) -> String {
        let digest = self
            .mac
            .clone()
            .chain_update(&self.data_pad)
            .chain_update(ip.octets())
            .finalize()
            .into_bytes();

        let mut address = String::with_capacity(39);
        address.push_str(category.prefix());
        for pair in digest[4..16].chunks(2) {
            // write! to a String cannot fail
            let _ = write!(address, ":{:02x}{:02x}", pair[0], pair[1]);
        }
        address
    }
}
