use crate::domain::models::RiffCard;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use url::Url;

const SQL_ENDPOINT: &str = "api/query/sql";
const RIFF_CARDS_BY_BLOCK_IDS_ENDPOINT: &str = "api/riff/getRiffCardsByBlockIDs";
const ADD_RIFF_CARDS_ENDPOINT: &str = "api/riff/addRiffCards";
const REMOVE_RIFF_CARDS_ENDPOINT: &str = "api/riff/removeRiffCards";

pub type HostRow = serde_json::Map<String, serde_json::Value>;

/// The host note application's document/query API.
#[async_trait]
pub trait HostApiClient: Send + Sync {
    async fn query_sql(&self, statement: &str) -> Result<Vec<HostRow>, InfraError>;

    async fn riff_cards_by_block_ids(&self, block_ids: &[String]) -> Result<Vec<RiffCard>, InfraError>;

    async fn add_riff_cards(&self, deck_id: &str, block_ids: &[String]) -> Result<(), InfraError>;

    async fn remove_riff_cards(&self, deck_id: &str, block_ids: &[String]) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestHostClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ApiEnvelope {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, serde::Deserialize)]
struct RiffBlocksPayload {
    #[serde(default)]
    blocks: Vec<RiffBlockPayload>,
}

#[derive(Debug, serde::Deserialize)]
struct RiffBlockPayload {
    id: String,
    #[serde(rename = "riffCardID", default)]
    riff_card_id: String,
    #[serde(rename = "riffCard", default)]
    riff_card: Option<RiffCardStatePayload>,
    #[serde(default)]
    ial: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, serde::Deserialize)]
struct RiffCardStatePayload {
    #[serde(default)]
    state: i64,
}

impl ReqwestHostClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid host url '{base_url}': {error}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, InfraError> {
        self.base_url
            .join(path)
            .map_err(|error| InfraError::HostApi(format!("invalid endpoint '{path}': {error}")))
    }

    /// POSTs a JSON body to a host endpoint and unwraps the `{code, msg, data}` envelope.
    pub async fn post_api(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, InfraError> {
        let mut request = self.client.post(self.endpoint(path)?).json(body);
        if let Some(token) = self.token.as_deref() {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|error| InfraError::HostApi(format!("network error calling {path}: {error}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|error| InfraError::HostApi(format!("failed reading {path} response: {error}")))?;

        decode_envelope(path, status, &text)
    }
}

fn decode_envelope(
    path: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> Result<serde_json::Value, InfraError> {
    if !status.is_success() {
        return Err(InfraError::HostApi(format!(
            "{path} failed: http {}; body={body}",
            status.as_u16()
        )));
    }
    let envelope: ApiEnvelope = serde_json::from_str(body)
        .map_err(|error| InfraError::HostApi(format!("invalid {path} payload: {error}; body={body}")))?;
    if envelope.code != 0 {
        return Err(InfraError::HostApi(format!(
            "{path} failed: code={} msg={}",
            envelope.code, envelope.msg
        )));
    }
    Ok(envelope.data)
}

fn rows_from_data(data: serde_json::Value) -> Result<Vec<HostRow>, InfraError> {
    match data {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::Object(row) => Some(row),
                _ => None,
            })
            .collect()),
        other => Err(InfraError::HostApi(format!(
            "sql query returned non-array data: {other}"
        ))),
    }
}

fn riff_cards_from_data(data: serde_json::Value) -> Result<Vec<RiffCard>, InfraError> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    let payload: RiffBlocksPayload = serde_json::from_value(data)?;
    Ok(payload
        .blocks
        .into_iter()
        .filter(|block| !block.riff_card_id.trim().is_empty())
        .map(|block| RiffCard {
            id: block.riff_card_id,
            block_id: block.id,
            priority: None,
            state: block.riff_card.map(|card| card.state).unwrap_or_default(),
            ial: block.ial,
        })
        .collect())
}

#[async_trait]
impl HostApiClient for ReqwestHostClient {
    async fn query_sql(&self, statement: &str) -> Result<Vec<HostRow>, InfraError> {
        let data = self
            .post_api(SQL_ENDPOINT, &serde_json::json!({ "stmt": statement }))
            .await?;
        rows_from_data(data)
    }

    async fn riff_cards_by_block_ids(&self, block_ids: &[String]) -> Result<Vec<RiffCard>, InfraError> {
        if block_ids.is_empty() {
            return Ok(Vec::new());
        }
        let data = self
            .post_api(
                RIFF_CARDS_BY_BLOCK_IDS_ENDPOINT,
                &serde_json::json!({ "blockIDs": block_ids }),
            )
            .await?;
        riff_cards_from_data(data)
    }

    async fn add_riff_cards(&self, deck_id: &str, block_ids: &[String]) -> Result<(), InfraError> {
        if block_ids.is_empty() {
            return Ok(());
        }
        self.post_api(
            ADD_RIFF_CARDS_ENDPOINT,
            &serde_json::json!({ "deckID": deck_id, "blockIDs": block_ids }),
        )
        .await?;
        Ok(())
    }

    async fn remove_riff_cards(&self, deck_id: &str, block_ids: &[String]) -> Result<(), InfraError> {
        if block_ids.is_empty() {
            return Ok(());
        }
        self.post_api(
            REMOVE_RIFF_CARDS_ENDPOINT,
            &serde_json::json!({ "deckID": deck_id, "blockIDs": block_ids }),
        )
        .await?;
        Ok(())
    }
}

/// Single-quoted SQL string literal for an opaque identifier.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
