//! Network registry — static metadata for every explorer we can probe.
//!
//! Each supported network is described here: its explorer endpoint, the
//! fixed query parameters of its balance call, where the API key goes,
//! which response decoder understands its body, and the decimal scale of
//! its native token.

use crate::adapters::ResponseDecoder;

/// The top-level tag grouping all networks of one derivation scheme.
pub const BIP44_SCHEME: &str = "Bip44";

/// Where a network's explorer expects the API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPlacement {
    /// Query-string parameter with the given name
    Query(&'static str),
    /// Request header with the given (lowercase) name
    Header(&'static str),
}

/// Static description of one explorer API target.
#[derive(Debug, Clone)]
pub struct NetworkSpec {
    /// Network identifier used in configuration and address maps
    pub id: &'static str,
    /// Human-readable name
    pub display_name: &'static str,
    /// Balance endpoint
    pub base_url: &'static str,
    /// Parameters sent with every balance call, before `address`
    pub fixed_params: &'static [(&'static str, &'static str)],
    /// Credential placement
    pub key_placement: KeyPlacement,
    /// Body decoder for a 200 response
    pub decoder: ResponseDecoder,
    /// Decimal places of the smallest integer unit (wei = 18, sun = 6)
    pub decimals: u32,
}

const ETHERSCAN_PARAMS: &[(&str, &str)] = &[("module", "account"), ("action", "balance")];

pub static NETWORKS: &[NetworkSpec] = &[
    NetworkSpec {
        id: "bsc",
        display_name: "BSC",
        base_url: "https://api.bscscan.com/api",
        fixed_params: ETHERSCAN_PARAMS,
        key_placement: KeyPlacement::Query("apikey"),
        decoder: ResponseDecoder::Etherscan,
        decimals: 18,
    },
    NetworkSpec {
        id: "ethereum",
        display_name: "Ethereum",
        base_url: "https://api.etherscan.io/api",
        fixed_params: ETHERSCAN_PARAMS,
        key_placement: KeyPlacement::Query("apikey"),
        decoder: ResponseDecoder::Etherscan,
        decimals: 18,
    },
    NetworkSpec {
        id: "polygon",
        display_name: "Polygon",
        base_url: "https://api.polygonscan.com/api",
        fixed_params: ETHERSCAN_PARAMS,
        key_placement: KeyPlacement::Query("apikey"),
        decoder: ResponseDecoder::Etherscan,
        decimals: 18,
    },
    NetworkSpec {
        id: "tron",
        display_name: "Tron",
        base_url: "https://apilist.tronscanapi.com/api/account/token_asset_overview",
        fixed_params: &[],
        key_placement: KeyPlacement::Header("tron-pro-api-key"),
        decoder: ResponseDecoder::Tronscan,
        decimals: 6,
    },
];

/// Look up a network by identifier.
pub fn get_network(id: &str) -> Option<&'static NetworkSpec> {
    NETWORKS.iter().find(|n| n.id == id)
}

/// Identifiers of all supported networks, in registry order.
pub fn supported_ids() -> Vec<&'static str> {
    NETWORKS.iter().map(|n| n.id).collect()
}

/// Display name for a network id, falling back to the id itself.
pub fn display_name(id: &str) -> &str {
    get_network(id).map(|n| n.display_name).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        assert_eq!(get_network("tron").map(|n| n.decimals), Some(6));
        assert!(get_network("solana").is_none());
    }

    #[test]
    fn test_only_tron_uses_header_key() {
        for net in NETWORKS {
            match net.key_placement {
                KeyPlacement::Header(_) => assert_eq!(net.id, "tron"),
                KeyPlacement::Query(name) => assert_eq!(name, "apikey"),
            }
        }
    }

    #[test]
    fn test_header_names_are_valid_static_names() {
        for net in NETWORKS {
            if let KeyPlacement::Header(name) = net.key_placement {
                assert_eq!(name, name.to_ascii_lowercase());
                assert!(http::HeaderName::from_bytes(name.as_bytes()).is_ok());
            }
        }
    }

    #[test]
    fn test_four_networks_supported() {
        assert_eq!(supported_ids(), vec!["bsc", "ethereum", "polygon", "tron"]);
    }
}
