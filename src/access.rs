use crate::config::Access;
use crate::image_reference::ImageReference;
use anyhow::{Context, Result, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::net::IpAddr;

/// Authorization pre-step for the pull endpoint. The service executes
/// privileged host-level operations, so requests can be restricted to a
/// client source network and a set of image reference patterns. An
/// unconfigured policy allows everything; network exposure is expected to
/// stay cluster-internal regardless.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    allowed_network: Option<IpNetwork>,
    allowed_images: Option<GlobSet>,
}

impl AccessPolicy {
    pub fn from_config(access: &Access) -> Result<Self> {
        let allowed_network = match &access.allowed_network {
            Some(cidr) => Some(
                IpNetwork::parse(cidr)
                    .with_context(|| format!("Invalid allowedNetwork {}", cidr))?,
            ),
            None => None,
        };

        let allowed_images = if access.allowed_images.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &access.allowed_images {
                builder.add(
                    Glob::new(pattern)
                        .with_context(|| format!("Invalid allowedImages pattern {}", pattern))?,
                );
            }
            Some(builder.build().context("Failed to build image allowlist")?)
        };

        Ok(AccessPolicy {
            allowed_network,
            allowed_images,
        })
    }

    pub fn permits_client(&self, client: IpAddr) -> bool {
        match &self.allowed_network {
            Some(network) => network.contains(client),
            None => true,
        }
    }

    pub fn permits_image(&self, image: &ImageReference) -> bool {
        match &self.allowed_images {
            Some(allowlist) => allowlist.is_match(image.to_string()),
            None => true,
        }
    }
}

/// An IP network in CIDR notation. A bare address is treated as a
/// single-host network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpNetwork {
    address: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    pub fn parse(s: &str) -> Result<Self> {
        let (address, prefix_len) = match s.split_once('/') {
            Some((address, prefix_len)) => {
                let address: IpAddr = address
                    .parse()
                    .with_context(|| format!("Invalid network address in {}", s))?;
                let prefix_len: u8 = prefix_len
                    .parse()
                    .with_context(|| format!("Invalid prefix length in {}", s))?;
                (address, prefix_len)
            }
            None => {
                let address: IpAddr = s
                    .parse()
                    .with_context(|| format!("Invalid network address in {}", s))?;
                (address, if address.is_ipv4() { 32 } else { 128 })
            }
        };

        let max_prefix_len = if address.is_ipv4() { 32 } else { 128 };
        if prefix_len > max_prefix_len {
            bail!("Prefix length /{} is out of range in {}", prefix_len, s);
        }

        Ok(IpNetwork {
            address,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.address, ip) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (u32::from(network) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (u128::from(network) & mask) == (u128::from(ip) & mask)
            }
            // Mixed address families never match
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allowed_network: Option<&str>, allowed_images: &[&str]) -> AccessPolicy {
        AccessPolicy::from_config(&Access {
            allowed_network: allowed_network.map(str::to_string),
            allowed_images: allowed_images.iter().map(|s| s.to_string()).collect(),
        })
        .expect("policy should build")
    }

    #[test]
    fn test_network_contains_v4() {
        let network = IpNetwork::parse("10.0.0.0/8").expect("network should parse");
        assert!(network.contains("10.1.2.3".parse().expect("ip")));
        assert!(!network.contains("11.0.0.1".parse().expect("ip")));
        assert!(!network.contains("::1".parse().expect("ip")));
    }

    #[test]
    fn test_network_contains_edge_prefixes() {
        let any = IpNetwork::parse("0.0.0.0/0").expect("network should parse");
        assert!(any.contains("203.0.113.9".parse().expect("ip")));

        let single = IpNetwork::parse("192.168.1.7/32").expect("network should parse");
        assert!(single.contains("192.168.1.7".parse().expect("ip")));
        assert!(!single.contains("192.168.1.8".parse().expect("ip")));
    }

    #[test]
    fn test_network_bare_address_is_single_host() {
        let network = IpNetwork::parse("127.0.0.1").expect("network should parse");
        assert!(network.contains("127.0.0.1".parse().expect("ip")));
        assert!(!network.contains("127.0.0.2".parse().expect("ip")));
    }

    #[test]
    fn test_network_contains_v6() {
        let network = IpNetwork::parse("fd00::/8").expect("network should parse");
        assert!(network.contains("fd12:3456::1".parse().expect("ip")));
        assert!(!network.contains("fe80::1".parse().expect("ip")));
    }

    #[test]
    fn test_network_parse_rejects_invalid_input() {
        assert!(IpNetwork::parse("not-a-network").is_err());
        assert!(IpNetwork::parse("10.0.0.0/33").is_err());
        assert!(IpNetwork::parse("10.0.0.0/abc").is_err());
    }

    #[test]
    fn test_unconfigured_policy_allows_everything() {
        let policy = policy(None, &[]);
        assert!(policy.permits_client("203.0.113.9".parse().expect("ip")));
        let image = ImageReference::parse("docker.io/library/nginx:latest").expect("reference");
        assert!(policy.permits_image(&image));
    }

    #[test]
    fn test_policy_restricts_client_network() {
        let policy = policy(Some("10.0.0.0/8"), &[]);
        assert!(policy.permits_client("10.42.0.1".parse().expect("ip")));
        assert!(!policy.permits_client("192.168.0.1".parse().expect("ip")));
    }

    #[test]
    fn test_policy_restricts_images_by_glob() {
        let policy = policy(None, &["registry.example.com/**"]);
        let internal =
            ImageReference::parse("registry.example.com/team/app:1.0").expect("reference");
        let external = ImageReference::parse("docker.io/library/nginx:latest").expect("reference");
        assert!(policy.permits_image(&internal));
        assert!(!policy.permits_image(&external));
    }

    #[test]
    fn test_policy_rejects_invalid_configuration() {
        assert!(
            AccessPolicy::from_config(&Access {
                allowed_network: Some("10.0.0.0/64".to_string()),
                allowed_images: vec![],
            })
            .is_err()
        );
    }
}
