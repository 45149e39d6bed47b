use data_url::DataUrl;
use url::Url;

use crate::{CandidateList, GatewayConfig, Identifier};

/// Maps raw [`Identifier`]s to the URLs they can be fetched from.
///
/// Normalization is pure and deterministic: the same identifier always yields the same
/// candidates in the same order. Unknown schemes yield an empty list, which signals an
/// unresolvable identifier rather than an error.
#[derive(Clone, Debug, Default)]
pub struct UriNormalizer {
    gateways: GatewayConfig,
}

impl UriNormalizer {
    /// Creates a normalizer rewriting content-addressed schemes through the given gateways.
    pub fn new(gateways: GatewayConfig) -> Self {
        Self { gateways }
    }

    /// Computes the ordered [`CandidateList`] for `identifier`.
    ///
    /// `http(s)` identifiers pass through as their single candidate in parsed URL form. The host
    /// is lowercased, an empty path becomes `/` and unsafe characters are percent-encoded, so
    /// the candidate may differ textually from the identifier. Identifiers that do not parse as
    /// a URL are unresolvable.
    pub fn normalize(&self, identifier: &Identifier) -> CandidateList {
        let raw = identifier.as_str();
        let Some(scheme) = identifier.scheme() else {
            return vec![];
        };
        // `scheme` is validated ASCII, so this slices on a char boundary.
        let rest = &raw[scheme.len() + 1..];

        match scheme.as_str() {
            "http" | "https" => Url::parse(raw).into_iter().collect(),
            "data" => match DataUrl::process(raw) {
                Ok(_) => Url::parse(raw).into_iter().collect(),
                Err(_) => vec![],
            },
            "ipfs" => {
                let path = strip_namespace(strip_slashes(rest), "ipfs");
                gateway_urls(&self.gateways.ipfs, path)
            }
            "ipns" => {
                let path = strip_namespace(strip_slashes(rest), "ipns");
                gateway_urls(&self.gateways.ipns, path)
            }
            "ar" => gateway_urls(&self.gateways.arweave, strip_slashes(rest)),
            _ => {
                tracing::trace!(%identifier, "Unrecognized identifier scheme");
                vec![]
            }
        }
    }
}

fn strip_slashes(rest: &str) -> &str {
    rest.strip_prefix("//").unwrap_or(rest)
}

/// Strips a redundant namespace segment, as in `ipfs://ipfs/<cid>`.
fn strip_namespace<'a>(path: &'a str, namespace: &str) -> &'a str {
    match path.split_once('/') {
        Some((first, rest)) if first.eq_ignore_ascii_case(namespace) => rest,
        _ => path,
    }
}

fn gateway_urls(gateways: &[String], path: &str) -> CandidateList {
    if path.is_empty() {
        return vec![];
    }
    gateways
        .iter()
        .filter_map(|prefix| Url::parse(&format!("{prefix}{path}")).ok())
        .collect()
}
