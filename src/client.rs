//! Client side of the contract API.
//!
//! [`LedgerApi`] is what the session controller talks to. [`LedgerClient`]
//! implements it over HTTP; [`LedgerService`] implements it in-process with
//! the same error shapes the HTTP API produces.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use love_ledger_sdk::{Contract, LedgerService, RecordStore, ServiceError, Stats, VerifyOutcome};

use crate::api::ApiError;
use crate::config::DEFAULT_PREFIX;
use crate::wire::{
    ContractActionBody, ContractEnvelope, CreateContractBody, ErrorBody, PairBody, StatsEnvelope,
    VerifyEnvelope, WalletContractEnvelope,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The server answered with an error status.
    #[error("{}", .message.as_deref().unwrap_or("request failed"))]
    Api {
        status: u16,
        message: Option<String>,
        details: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Remote contract lifecycle operations.
#[allow(async_fn_in_trait)]
pub trait LedgerApi {
    async fn create_contract(&self, body: &CreateContractBody) -> Result<Contract, ClientError>;

    async fn pair(&self, contract_id: &str, partner_wallet: &str) -> Result<Contract, ClientError>;

    async fn verify(&self, contract_id: &str, wallet: &str) -> Result<VerifyOutcome, ClientError>;

    async fn unpair(&self, contract_id: &str, wallet: &str) -> Result<Contract, ClientError>;

    async fn get_contract(&self, contract_id: &str) -> Result<Contract, ClientError>;

    async fn get_contract_by_wallet(&self, wallet: &str) -> Result<Option<Contract>, ClientError>;

    async fn stats(&self) -> Result<Stats, ClientError>;
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme, host and port of the server, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Mount path of the API (default: `/api`).
    pub prefix: String,
    /// Sent as `Authorization: Bearer <token>`.
    pub token: String,
    /// Per-request timeout (default: 30s).
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            token: token.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }
}

#[derive(Debug, Clone)]
pub struct LedgerClient {
    http: reqwest::Client,
    base: Url,
    prefix: Vec<String>,
    token: String,
}

impl LedgerClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ClientError::Transport(format!("invalid base url {}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Transport(format!(
                "invalid base url {}",
                config.base_url
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let prefix = config
            .prefix
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            http,
            base,
            prefix,
            token: config.token,
        })
    }

    /// `segments` are appended after the prefix and percent-encoded.
    pub fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(self.prefix.iter().map(String::as_str));
            path.extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.http
            .request(method, self.url(segments))
            .bearer_auth(&self.token)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        send(self.request(Method::GET, segments)).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ClientError> {
        send(self.request(Method::POST, segments).json(body)).await
    }

    pub async fn health(&self) -> Result<(), ClientError> {
        let _: serde_json::Value = self.get(&["health"]).await?;
        Ok(())
    }
}

/// Error bodies are decoded into [`ClientError::Api`]; a non-JSON error body
/// leaves `message` empty.
async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = request
        .send()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    if !status.is_success() {
        let body = serde_json::from_str::<ErrorBody>(&text).ok();
        log::debug!("client: {} {}", status.as_u16(), text);
        return Err(ClientError::Api {
            status: status.as_u16(),
            message: body.as_ref().map(|b| b.error.clone()),
            details: body.and_then(|b| b.details),
        });
    }
    serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
}

impl LedgerApi for LedgerClient {
    async fn create_contract(&self, body: &CreateContractBody) -> Result<Contract, ClientError> {
        let envelope: ContractEnvelope = self.post(&["contracts", "create"], body).await?;
        Ok(envelope.contract)
    }

    async fn pair(&self, contract_id: &str, partner_wallet: &str) -> Result<Contract, ClientError> {
        let body = PairBody {
            contract_id: contract_id.to_string(),
            partner_wallet: partner_wallet.to_string(),
        };
        let envelope: ContractEnvelope = self.post(&["contracts", "pair"], &body).await?;
        Ok(envelope.contract)
    }

    async fn verify(&self, contract_id: &str, wallet: &str) -> Result<VerifyOutcome, ClientError> {
        let body = ContractActionBody {
            contract_id: contract_id.to_string(),
            wallet: wallet.to_string(),
        };
        let envelope: VerifyEnvelope = self.post(&["contracts", "verify"], &body).await?;
        Ok(VerifyOutcome {
            contract: envelope.contract,
            both_verified: envelope.both_verified,
        })
    }

    async fn unpair(&self, contract_id: &str, wallet: &str) -> Result<Contract, ClientError> {
        let body = ContractActionBody {
            contract_id: contract_id.to_string(),
            wallet: wallet.to_string(),
        };
        let envelope: ContractEnvelope = self.post(&["contracts", "unpair"], &body).await?;
        Ok(envelope.contract)
    }

    async fn get_contract(&self, contract_id: &str) -> Result<Contract, ClientError> {
        let envelope: ContractEnvelope = self.get(&["contracts", contract_id]).await?;
        Ok(envelope.contract)
    }

    async fn get_contract_by_wallet(&self, wallet: &str) -> Result<Option<Contract>, ClientError> {
        let envelope: WalletContractEnvelope =
            self.get(&["contracts", "wallet", wallet]).await?;
        Ok(envelope.contract)
    }

    async fn stats(&self) -> Result<Stats, ClientError> {
        let envelope: StatsEnvelope = self.get(&["stats"]).await?;
        Ok(envelope.stats)
    }
}

// ============================================================================
// In-process
// ============================================================================

fn service_error(err: ServiceError, action: &str) -> ClientError {
    let (status, body) = ApiError::from_service(err, action).into_parts();
    ClientError::Api {
        status: status.as_u16(),
        message: Some(body.error),
        details: body.details,
    }
}

impl<S: RecordStore> LedgerApi for LedgerService<S> {
    async fn create_contract(&self, body: &CreateContractBody) -> Result<Contract, ClientError> {
        let request = body
            .clone()
            .into_request()
            .map_err(|e| service_error(e.into(), "create contract"))?;
        LedgerService::create_contract(self, request)
            .await
            .map_err(|e| service_error(e, "create contract"))
    }

    async fn pair(&self, contract_id: &str, partner_wallet: &str) -> Result<Contract, ClientError> {
        LedgerService::pair(self, contract_id, partner_wallet)
            .await
            .map_err(|e| service_error(e, "pair wallet"))
    }

    async fn verify(&self, contract_id: &str, wallet: &str) -> Result<VerifyOutcome, ClientError> {
        LedgerService::verify(self, contract_id, wallet)
            .await
            .map_err(|e| service_error(e, "verify"))
    }

    async fn unpair(&self, contract_id: &str, wallet: &str) -> Result<Contract, ClientError> {
        LedgerService::unpair(self, contract_id, wallet)
            .await
            .map_err(|e| service_error(e, "unpair"))
    }

    async fn get_contract(&self, contract_id: &str) -> Result<Contract, ClientError> {
        LedgerService::get_contract(self, contract_id)
            .await
            .map_err(|e| service_error(e, "fetch contract"))
    }

    async fn get_contract_by_wallet(&self, wallet: &str) -> Result<Option<Contract>, ClientError> {
        LedgerService::get_contract_by_wallet(self, wallet)
            .await
            .map_err(|e| service_error(e, "fetch contract"))
    }

    async fn stats(&self) -> Result<Stats, ClientError> {
        LedgerService::stats(self)
            .await
            .map_err(|e| service_error(e, "fetch stats"))
    }
}

#[cfg(test)]
mod tests {
    use love_ledger_sdk::MemoryStore;

    use super::*;

    fn client(base: &str, prefix: &str) -> LedgerClient {
        LedgerClient::new(ClientConfig::new(base, "t").with_prefix(prefix)).unwrap()
    }

    #[test]
    fn urls_join_prefix_and_encode_segments() {
        let c = client("http://127.0.0.1:8080", "/api");
        assert_eq!(
            c.url(&["contracts", "wallet", "0xabc"]).as_str(),
            "http://127.0.0.1:8080/api/contracts/wallet/0xabc"
        );
        assert_eq!(
            c.url(&["contracts", "a/b c"]).as_str(),
            "http://127.0.0.1:8080/api/contracts/a%2Fb%20c"
        );

        let c = client("http://localhost:9000/base/", "");
        assert_eq!(c.url(&["stats"]).as_str(), "http://localhost:9000/base/stats");
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let err = LedgerClient::new(ClientConfig::new("not a url", "t")).unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[test]
    fn api_error_displays_server_message() {
        let err = ClientError::Api {
            status: 404,
            message: Some("contract not found: x".into()),
            details: None,
        };
        assert_eq!(err.to_string(), "contract not found: x");
        assert_eq!(err.status(), Some(404));

        let err = ClientError::Api {
            status: 502,
            message: None,
            details: None,
        };
        assert_eq!(err.to_string(), "request failed");
    }

    #[tokio::test]
    async fn in_process_errors_match_http_shapes() {
        let service = LedgerService::new(MemoryStore::new());
        let err = LedgerApi::pair(&service, "nope", "0xb0b").await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Api {
                status: 404,
                message: Some("contract not found: nope".into()),
                details: None,
            }
        );

        let body = CreateContractBody {
            creator_wallet: Some("0xa11ce".into()),
            ..Default::default()
        };
        let err = LedgerApi::create_contract(&service, &body).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
    }
}
