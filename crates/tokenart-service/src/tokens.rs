//! Listing of the NFTs a user holds on a bridge.
//!
//! Token lists come from per-chain subgraphs. Each [`Token`] carries the identifier of its
//! artwork, which is what displays hand to a
//! [`ResolutionController`](crate::resolver::ResolutionController).

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

use tokenart_sources::Identifier;

use crate::config::{BridgeConfig, Config};
use crate::utils::http::{create_client, DownloadTimeouts};

/// The NFT standard of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenStandard {
    /// Unique tokens.
    Eip721,
    /// Multi tokens, which may be held in amounts.
    Eip1155,
}

impl fmt::Display for TokenStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenStandard::Eip721 => f.write_str("ERC-721"),
            TokenStandard::Eip1155 => f.write_str("ERC-1155"),
        }
    }
}

/// A token held by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub standard: TokenStandard,
    /// Name of the token contract, if it has one.
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// Address of the token contract.
    pub address: String,
    pub token_id: String,
    /// The amount held. Always `1` for [`TokenStandard::Eip721`].
    pub amount: String,
    /// The artwork of the token, usually pointing at a metadata document.
    pub image: Option<Identifier>,
}

impl Token {
    fn matches(&self, search: &str) -> bool {
        [
            self.name.as_deref(),
            self.symbol.as_deref(),
            Some(self.address.as_str()),
            Some(self.token_id.as_str()),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(search))
    }
}

#[derive(Debug, Error)]
pub enum TokenListError {
    #[error("failed to query subgraph")]
    Http(#[from] reqwest::Error),
    #[error("invalid subgraph endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("subgraph responded with status code {0}")]
    Status(StatusCode),
    #[error("subgraph query failed: {0}")]
    Query(String),
}

/// Source of the tokens held by an account.
#[async_trait]
pub trait TokenListProvider: Send + Sync {
    /// Fetches the tokens of `standard` that `account` holds on `chain_id`.
    ///
    /// `endpoint` names the subgraph to query, as configured for the bridge.
    async fn fetch_tokens(
        &self,
        standard: TokenStandard,
        chain_id: u64,
        account: &str,
        endpoint: &str,
    ) -> Result<Vec<Token>, TokenListError>;
}

const EIP721_QUERY: &str = r#"
query UserTokens($owner: String!) {
  tokens(where: { owner: $owner }, first: 1000) {
    contract { id name symbol }
    tokenID
    tokenURI
  }
}
"#;

const EIP1155_QUERY: &str = r#"
query UserTokens($owner: String!) {
  balances(where: { account: $owner, value_gt: "0" }, first: 1000) {
    token {
      registry { id name symbol }
      identifier
      URI
    }
    value
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Contract {
    id: String,
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Eip721Data {
    tokens: Vec<Eip721Token>,
}

#[derive(Debug, Deserialize)]
struct Eip721Token {
    contract: Contract,
    #[serde(rename = "tokenID")]
    token_id: String,
    #[serde(rename = "tokenURI")]
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Eip1155Data {
    balances: Vec<Eip1155Balance>,
}

#[derive(Debug, Deserialize)]
struct Eip1155Balance {
    token: Eip1155Token,
    value: String,
}

#[derive(Debug, Deserialize)]
struct Eip1155Token {
    registry: Contract,
    identifier: String,
    #[serde(rename = "URI")]
    uri: Option<String>,
}

fn image(uri: Option<String>) -> Option<Identifier> {
    uri.filter(|uri| !uri.trim().is_empty()).map(Identifier::from)
}

impl From<Eip721Token> for Token {
    fn from(token: Eip721Token) -> Self {
        Token {
            standard: TokenStandard::Eip721,
            name: token.contract.name,
            symbol: token.contract.symbol,
            address: token.contract.id,
            token_id: token.token_id,
            amount: "1".into(),
            image: image(token.token_uri),
        }
    }
}

impl From<Eip1155Balance> for Token {
    fn from(balance: Eip1155Balance) -> Self {
        Token {
            standard: TokenStandard::Eip1155,
            name: balance.token.registry.name,
            symbol: balance.token.registry.symbol,
            address: balance.token.registry.id,
            token_id: balance.token.identifier,
            amount: balance.value,
            image: image(balance.token.uri),
        }
    }
}

/// Queries token lists from GraphQL subgraphs below a common base URL.
#[derive(Debug, Clone)]
pub struct SubgraphTokenList {
    client: Client,
    graph_url: String,
}

impl SubgraphTokenList {
    pub fn new(client: Client, graph_url: impl Into<String>) -> Self {
        Self {
            client,
            graph_url: graph_url.into(),
        }
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let client = create_client(&DownloadTimeouts::from_config(config))?;
        Ok(Self::new(client, config.graph_url.clone()))
    }

    async fn query<T>(&self, endpoint: &str, query: &str, account: &str) -> Result<T, TokenListError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let raw = format!("{}{}", self.graph_url, endpoint);
        let url = Url::parse(&raw).map_err(|_| TokenListError::InvalidEndpoint(raw))?;
        tracing::trace!("Querying token list from `{}`", url);

        let body = json!({
            "query": query,
            "variables": { "owner": account.to_lowercase() },
        });
        let response = self.client.post(url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenListError::Status(status));
        }

        let response: GraphQlResponse<T> = response.json().await?;
        if let Some(error) = response.errors.into_iter().next() {
            return Err(TokenListError::Query(error.message));
        }
        response
            .data
            .ok_or_else(|| TokenListError::Query("response without data".into()))
    }
}

#[async_trait]
impl TokenListProvider for SubgraphTokenList {
    async fn fetch_tokens(
        &self,
        standard: TokenStandard,
        chain_id: u64,
        account: &str,
        endpoint: &str,
    ) -> Result<Vec<Token>, TokenListError> {
        let tokens: Vec<Token> = match standard {
            TokenStandard::Eip721 => {
                let data: Eip721Data = self.query(endpoint, EIP721_QUERY, account).await?;
                data.tokens.into_iter().map(Token::from).collect()
            }
            TokenStandard::Eip1155 => {
                let data: Eip1155Data = self.query(endpoint, EIP1155_QUERY, account).await?;
                data.balances.into_iter().map(Token::from).collect()
            }
        };

        tracing::debug!(%standard, chain_id, count = tokens.len(), "Fetched token list");
        Ok(tokens)
    }
}

/// The tokens held by a user, split by standard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTokens {
    pub eip721: Vec<Token>,
    pub eip1155: Vec<Token>,
}

impl UserTokens {
    /// Returns the tokens whose name, symbol, address or token id contains `search`.
    ///
    /// Matching is case-insensitive. An empty search matches every token.
    pub fn filter(&self, search: &str) -> UserTokens {
        let search = search.to_lowercase();
        let filter = |tokens: &[Token]| {
            tokens
                .iter()
                .filter(|token| token.matches(&search))
                .cloned()
                .collect()
        };
        UserTokens {
            eip721: filter(&self.eip721),
            eip1155: filter(&self.eip1155),
        }
    }

    /// Iterates over all tokens, ERC-721 first.
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.eip721.iter().chain(&self.eip1155)
    }
}

/// Loads the tokens `account` holds on `chain_id` of `bridge`.
///
/// Without a chain or an account there is nothing to list. Both standards are fetched
/// concurrently from the subgraphs the bridge configures for the chain.
pub async fn load_user_tokens(
    provider: &dyn TokenListProvider,
    bridge: &BridgeConfig,
    chain_id: Option<u64>,
    account: Option<&str>,
) -> Result<UserTokens, TokenListError> {
    let (Some(chain_id), Some(account)) = (chain_id, account) else {
        return Ok(UserTokens::default());
    };

    let (eip721, eip1155) = futures::try_join!(
        provider.fetch_tokens(
            TokenStandard::Eip721,
            chain_id,
            account,
            bridge.subgraph(TokenStandard::Eip721, chain_id),
        ),
        provider.fetch_tokens(
            TokenStandard::Eip1155,
            chain_id,
            account,
            bridge.subgraph(TokenStandard::Eip1155, chain_id),
        ),
    )?;

    Ok(UserTokens { eip721, eip1155 })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract;
    use axum::http::StatusCode as HttpStatus;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use serde_json::Value;
    use tokenart_test::Server;

    use super::*;

    const ACCOUNT: &str = "0xAbC0000000000000000000000000000000000001";

    fn bridge() -> BridgeConfig {
        BridgeConfig {
            label: "Sandbox to Goerli".into(),
            home_chain_id: 99999,
            foreign_chain_id: 5,
            home_721_subgraph: "home-721".into(),
            foreign_721_subgraph: "foreign-721".into(),
            home_1155_subgraph: "home-1155".into(),
            foreign_1155_subgraph: "foreign-1155".into(),
        }
    }

    /// Serves both token standards for any subgraph name, recording the requested names.
    fn subgraph_server() -> (Server, Arc<Mutex<Vec<String>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        let handler = move |extract::Path(name): extract::Path<String>,
                            extract::Json(body): extract::Json<Value>| {
            let requests = recorded.clone();
            async move {
                requests.lock().unwrap().push(name.clone());
                assert_eq!(body["variables"]["owner"], ACCOUNT.to_lowercase());

                if name == "broken" {
                    return axum::Json(json!({ "errors": [{ "message": "indexing error" }] }))
                        .into_response();
                }
                if name == "missing" {
                    return HttpStatus::NOT_FOUND.into_response();
                }

                let query = body["query"].as_str().unwrap_or_default();
                let data = if query.contains("balances") {
                    json!({ "balances": [{
                        "token": {
                            "registry": { "id": "0x1155", "name": "Cards", "symbol": "CARD" },
                            "identifier": "7",
                            "URI": "ipfs://QmCard/7.json",
                        },
                        "value": "3",
                    }] })
                } else {
                    json!({ "tokens": [
                        {
                            "contract": { "id": "0x721a", "name": "Gods", "symbol": "GOD" },
                            "tokenID": "42",
                            "tokenURI": "https://example.com/42.json",
                        },
                        {
                            "contract": { "id": "0x721b", "name": null, "symbol": null },
                            "tokenID": "1",
                            "tokenURI": "",
                        },
                    ] })
                };
                axum::Json(json!({ "data": data })).into_response()
            }
        };

        let router = Router::new().route("/subgraphs/name/:name", post(handler));
        (Server::with_router(router), requests)
    }

    #[tokio::test]
    async fn test_load_user_tokens() {
        tokenart_test::setup();
        let (server, requests) = subgraph_server();
        let provider = SubgraphTokenList::new(Client::new(), server.url("subgraphs/name/"));

        let tokens = load_user_tokens(&provider, &bridge(), Some(5), Some(ACCOUNT))
            .await
            .unwrap();

        let mut requested = requests.lock().unwrap().clone();
        requested.sort();
        assert_eq!(requested, ["foreign-1155", "foreign-721"]);

        assert_eq!(tokens.eip721.len(), 2);
        assert_eq!(
            tokens.eip721[0],
            Token {
                standard: TokenStandard::Eip721,
                name: Some("Gods".into()),
                symbol: Some("GOD".into()),
                address: "0x721a".into(),
                token_id: "42".into(),
                amount: "1".into(),
                image: Some(Identifier::new("https://example.com/42.json")),
            }
        );
        assert_eq!(tokens.eip721[1].image, None);

        assert_eq!(tokens.eip1155.len(), 1);
        assert_eq!(tokens.eip1155[0].amount, "3");
        assert_eq!(
            tokens.eip1155[0].image,
            Some(Identifier::new("ipfs://QmCard/7.json"))
        );
    }

    #[tokio::test]
    async fn test_home_chain_subgraphs() {
        tokenart_test::setup();
        let (server, requests) = subgraph_server();
        let provider = SubgraphTokenList::new(Client::new(), server.url("subgraphs/name/"));

        load_user_tokens(&provider, &bridge(), Some(99999), Some(ACCOUNT))
            .await
            .unwrap();

        let mut requested = requests.lock().unwrap().clone();
        requested.sort();
        assert_eq!(requested, ["home-1155", "home-721"]);
    }

    #[tokio::test]
    async fn test_missing_chain_or_account() {
        tokenart_test::setup();
        let (server, requests) = subgraph_server();
        let provider = SubgraphTokenList::new(Client::new(), server.url("subgraphs/name/"));

        let tokens = load_user_tokens(&provider, &bridge(), None, Some(ACCOUNT))
            .await
            .unwrap();
        assert_eq!(tokens, UserTokens::default());

        let tokens = load_user_tokens(&provider, &bridge(), Some(5), None)
            .await
            .unwrap();
        assert_eq!(tokens, UserTokens::default());

        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subgraph_errors() {
        tokenart_test::setup();
        let (server, _) = subgraph_server();
        let provider = SubgraphTokenList::new(Client::new(), server.url("subgraphs/name/"));

        let err = provider
            .fetch_tokens(TokenStandard::Eip721, 5, ACCOUNT, "broken")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "subgraph query failed: indexing error");

        let err = provider
            .fetch_tokens(TokenStandard::Eip1155, 5, ACCOUNT, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, TokenListError::Status(StatusCode::NOT_FOUND)));
    }

    #[test]
    fn test_filter() {
        let token = |name: Option<&str>, symbol: &str, address: &str, token_id: &str| Token {
            standard: TokenStandard::Eip721,
            name: name.map(Into::into),
            symbol: Some(symbol.into()),
            address: address.into(),
            token_id: token_id.into(),
            amount: "1".into(),
            image: None,
        };
        let tokens = UserTokens {
            eip721: vec![
                token(Some("Gods Unchained"), "GU", "0xAAA1", "10"),
                token(None, "CARD", "0xbbb2", "2077"),
            ],
            eip1155: vec![Token {
                standard: TokenStandard::Eip1155,
                ..token(Some("Cosmetics"), "COS", "0xccc3", "5")
            }],
        };

        let names = |tokens: &UserTokens| -> Vec<String> {
            tokens.iter().map(|token| token.token_id.clone()).collect()
        };

        assert_eq!(names(&tokens.filter("")), ["10", "2077", "5"]);
        assert_eq!(names(&tokens.filter("gods")), ["10"]);
        assert_eq!(names(&tokens.filter("card")), ["2077"]);
        assert_eq!(names(&tokens.filter("0XBBB")), ["2077"]);
        assert_eq!(names(&tokens.filter("207")), ["2077"]);
        assert_eq!(names(&tokens.filter("cos")), ["5"]);
        assert_eq!(names(&tokens.filter("nothing")), Vec::<String>::new());
    }
}
