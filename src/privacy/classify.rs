use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

use ipnet::IpNet;
use snafu::{ResultExt, Snafu};

pub const COMPANY_PUBLIC_FILE: &str = "company-public.txt";
pub const DISCARD_FILE: &str = "discard.txt";
pub const EMPLOYEE_PRIVATE_FILE: &str = "employee-private.txt";
pub const EMPLOYEE_PUBLIC_FILE: &str = "employee-public.txt";
pub const RESERVED_FILE: &str = "reserved.txt";

#[derive(Debug, Snafu)]
pub enum NetworkFileError {
    #[snafu(display("unable to read network file {}: {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("invalid CIDR {:?} in {}: {}", line, path.display(), source))]
    InvalidCidr {
        line: String,
        path: PathBuf,
        source: ipnet::AddrParseError,
    },
}

/// The five network categories, loaded once at startup and immutable
/// afterwards. All membership tests operate on the 16-byte address
/// form; IPv4 prefixes match the IPv4-mapped representation.
#[derive(Debug, Clone, Default)]
pub struct NetworkSets {
    company_public: Vec<IpNet>,
    discard: Vec<IpNet>,
    employee_private: Vec<IpNet>,
    employee_public: Vec<IpNet>,
    reserved: Vec<IpNet>,
}

impl NetworkSets {
    /// Loads the five network list files from `dir`. One CIDR per
    /// line; `#`-prefixed lines are comments; surrounding whitespace
    /// is trimmed and blank lines are skipped.
    pub fn load(dir: &Path) -> Result<NetworkSets, NetworkFileError> {
        Ok(NetworkSets {
            company_public: load_network_list(&dir.join(COMPANY_PUBLIC_FILE))?,
            discard: load_network_list(&dir.join(DISCARD_FILE))?,
            employee_private: load_network_list(&dir.join(EMPLOYEE_PRIVATE_FILE))?,
            employee_public: load_network_list(&dir.join(EMPLOYEE_PUBLIC_FILE))?,
            reserved: load_network_list(&dir.join(RESERVED_FILE))?,
        })
    }

    /// Builds the sets from in-memory CIDR lists.
    pub fn from_lists(
        company_public: &[&str],
        discard: &[&str],
        employee_private: &[&str],
        employee_public: &[&str],
        reserved: &[&str],
    ) -> Result<NetworkSets, ipnet::AddrParseError> {
        Ok(NetworkSets {
            company_public: parse_list(company_public)?,
            discard: parse_list(discard)?,
            employee_private: parse_list(employee_private)?,
            employee_public: parse_list(employee_public)?,
            reserved: parse_list(reserved)?,
        })
    }

    /// True iff `ip` is inside any discard network.
    pub fn discard(&self, ip: Ipv6Addr) -> bool {
        contains(&self.discard, ip)
    }

    /// True iff `ip` is inside any reserved (private) network.
    pub fn is_private(&self, ip: Ipv6Addr) -> bool {
        contains(&self.reserved, ip)
    }

    pub fn is_employee_priv(&self, ip: Ipv6Addr) -> bool {
        contains(&self.employee_private, ip)
    }

    pub fn is_employee_pub(&self, ip: Ipv6Addr) -> bool {
        contains(&self.employee_public, ip)
    }

    pub fn is_company(&self, ip: Ipv6Addr) -> bool {
        contains(&self.company_public, ip)
    }

    /// An address is public when it is neither reserved nor part of
    /// the company address space.
    pub fn is_public(&self, ip: Ipv6Addr) -> bool {
        !self.is_private(ip) && !self.is_company(ip)
    }
}

fn contains(networks: &[IpNet], ip: Ipv6Addr) -> bool {
    networks.iter().any(|network| match network {
        IpNet::V4(net) => ip
            .to_ipv4_mapped()
            .map(|v4| net.contains(&v4))
            .unwrap_or(false),
        IpNet::V6(net) => net.contains(&ip),
    })
}

fn load_network_list(path: &Path) -> Result<Vec<IpNet>, NetworkFileError> {
    let contents = std::fs::read_to_string(path).context(ReadSnafu { path })?;
    let mut networks = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        networks.push(line.parse().context(InvalidCidrSnafu { line, path })?);
    }
    Ok(networks)
}

fn parse_list(cidrs: &[&str]) -> Result<Vec<IpNet>, ipnet::AddrParseError> {
    cidrs.iter().map(|cidr| cidr.parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::record::parse_ip16;
    use std::io::Write;

    fn sets() -> NetworkSets {
        NetworkSets::from_lists(
            &["198.51.100.0/24"],
            &["203.0.113.0/24", "2001:db8:dead::/48"],
            &["10.0.0.0/16"],
            &["198.51.100.0/25"],
            &["10.0.0.0/8"],
        )
        .unwrap()
    }

    fn ip(s: &str) -> Ipv6Addr {
        parse_ip16(s).unwrap()
    }

    #[test]
    fn discard_matches_v4_and_v6() {
        let sets = sets();
        assert!(sets.discard(ip("203.0.113.99")));
        assert!(sets.discard(ip("2001:db8:dead::1")));
        assert!(!sets.discard(ip("203.0.114.1")));
    }

    #[test]
    fn private_and_employee_nesting() {
        let sets = sets();
        let employee = ip("10.0.1.1");
        assert!(sets.is_private(employee));
        assert!(sets.is_employee_priv(employee));

        let reserved_only = ip("10.200.0.1");
        assert!(sets.is_private(reserved_only));
        assert!(!sets.is_employee_priv(reserved_only));
    }

    #[test]
    fn company_and_employee_pub() {
        let sets = sets();
        let employee = ip("198.51.100.7");
        assert!(sets.is_company(employee));
        assert!(sets.is_employee_pub(employee));

        let company_only = ip("198.51.100.200");
        assert!(sets.is_company(company_only));
        assert!(!sets.is_employee_pub(company_only));
    }

    #[test]
    fn public_is_neither_private_nor_company() {
        let sets = sets();
        assert!(sets.is_public(ip("8.8.8.8")));
        assert!(!sets.is_public(ip("10.0.0.1")));
        assert!(!sets.is_public(ip("198.51.100.7")));
    }

    #[test]
    fn loads_files_with_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in [
            (COMPANY_PUBLIC_FILE, "# company ranges\n198.51.100.0/24\n"),
            (DISCARD_FILE, "\n203.0.113.0/24\n\n"),
            (EMPLOYEE_PRIVATE_FILE, "  10.0.0.0/16  \n"),
            (EMPLOYEE_PUBLIC_FILE, "198.51.100.0/25\n"),
            (RESERVED_FILE, "10.0.0.0/8\n2001:db8::/32\n"),
        ] {
            let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
            file.write_all(contents.as_bytes()).unwrap();
        }
        let sets = NetworkSets::load(dir.path()).unwrap();
        assert!(sets.discard(ip("203.0.113.1")));
        assert!(sets.is_private(ip("2001:db8::1")));
        assert!(sets.is_employee_priv(ip("10.0.0.1")));
    }

    #[test]
    fn load_rejects_bad_cidr() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            COMPANY_PUBLIC_FILE,
            DISCARD_FILE,
            EMPLOYEE_PRIVATE_FILE,
            EMPLOYEE_PUBLIC_FILE,
            RESERVED_FILE,
        ] {
            std::fs::write(dir.path().join(name), "10.0.0.0/8\n").unwrap();
        }
        std::fs::write(dir.path().join(DISCARD_FILE), "not-a-cidr\n").unwrap();
        assert!(matches!(
            NetworkSets::load(dir.path()),
            Err(NetworkFileError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn load_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NetworkSets::load(dir.path()),
            Err(NetworkFileError::Read { .. })
        ));
    }
}
