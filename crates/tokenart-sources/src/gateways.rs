use serde::Deserialize;

/// Gateway prefixes used to rewrite content-addressed identifiers into fetchable URLs.
///
/// Each list is ordered by preference. A candidate is formed by appending the content path to
/// the gateway prefix verbatim, so prefixes usually end with a `/`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateways for `ipfs:` identifiers.
    pub ipfs: Vec<String>,
    /// Gateways for `ipns:` identifiers.
    pub ipns: Vec<String>,
    /// Gateways for `ar:` (Arweave) identifiers.
    pub arweave: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ipfs: vec![
                "https://cloudflare-ipfs.com/ipfs/".into(),
                "https://ipfs.io/ipfs/".into(),
            ],
            ipns: vec![
                "https://cloudflare-ipfs.com/ipns/".into(),
                "https://ipfs.io/ipns/".into(),
            ],
            arweave: vec!["https://arweave.net/".into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_override() {
        let yaml = r#"
            ipfs:
              - https://gateway.pinata.cloud/ipfs/
        "#;
        let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.ipfs, vec!["https://gateway.pinata.cloud/ipfs/"]);
        assert_eq!(config.ipns, GatewayConfig::default().ipns);
        assert_eq!(config.arweave, GatewayConfig::default().arweave);
    }
}
