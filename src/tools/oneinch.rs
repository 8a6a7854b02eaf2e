//! 1inch Swap API adapters
//!
//! Each tool performs exactly one GET against `{base_url}/{chain_id}{path}`
//! with the static bearer credential. No retries and no caching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::amount::Amount;
use super::{Tool, ToolError};

const SERVICE: &str = "1inch";

/// Whether `s` is `0x` followed by 40 hex digits
pub fn is_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .is_some_and(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Unsigned transaction data returned to the client for signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub to: String,
    pub data: String,
    pub value: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
}

impl TransactionPayload {
    /// Structurally check an upstream payload and normalize its value
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let to = value["to"].as_str().ok_or("payload has no to field")?;
        if !is_address(to) {
            return Err(format!("payload to is not an address: {}", to));
        }

        let data = value["data"].as_str().ok_or("payload has no data field")?;
        let hex_part = data.strip_prefix("0x").ok_or("payload data must start with 0x")?;
        hex::decode(hex_part).map_err(|e| format!("payload data is not hex: {}", e))?;

        let amount = match &value["value"] {
            Value::String(s) => s.parse::<Amount>().map_err(|e| format!("payload value: {}", e))?,
            Value::Number(n) => n
                .as_u64()
                .map(|v| Amount::from(v as u128))
                .ok_or("payload value must be a non-negative integer")?,
            Value::Null => Amount::ZERO,
            _ => return Err("payload value has the wrong type".to_string()),
        };

        let gas_price = match &value["gasPrice"] {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };

        Ok(Self {
            to: to.to_string(),
            data: data.to_string(),
            value: amount,
            gas_price,
        })
    }

    /// The tool output shape: decimal `value`, `gasPrice` only when known
    pub fn to_json(&self) -> Value {
        let mut out = json!({
            "to": self.to,
            "data": self.data,
            "value": self.value.to_string(),
        });
        if let Some(gas_price) = &self.gas_price {
            out["gasPrice"] = Value::String(gas_price.clone());
        }
        out
    }
}

/// HTTP client bound to one chain of the 1inch Swap API
pub struct OneInchClient {
    http: Client,
    endpoint: String,
    api_key: String,
}

impl OneInchClient {
    pub fn new(
        base_url: &str,
        chain_id: u64,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), chain_id),
            api_key: api_key.into(),
        })
    }

    /// Endpoint including the chain id
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ToolError> {
        let url = format!("{}{}", self.endpoint, path);
        log::debug!("1inch GET {} {:?}", path, query);

        let response = self
            .http
            .get(&url)
            .query(query)
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                log::error!("1inch request to {} failed: {}", path, e);
                ToolError::Upstream {
                    service: SERVICE.to_string(),
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ToolError::Upstream {
            service: SERVICE.to_string(),
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            log::error!("1inch API error {} on {}: {}", status.as_u16(), path, text);
            return Err(ToolError::Upstream {
                service: SERVICE.to_string(),
                status: Some(status.as_u16()),
                message: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            log::error!("Failed to parse 1inch response from {}: {}", path, e);
            ToolError::Upstream {
                service: SERVICE.to_string(),
                status: Some(status.as_u16()),
                message: format!("unparsable body: {}", e),
            }
        })
    }

    fn malformed(path: &str, message: impl Into<String>) -> ToolError {
        let message = message.into();
        log::error!("Malformed 1inch response from {}: {}", path, message);
        ToolError::Upstream {
            service: SERVICE.to_string(),
            status: None,
            message,
        }
    }

    fn amount_field(path: &str, body: &Value, field: &str) -> Result<Amount, ToolError> {
        body[field]
            .as_str()
            .ok_or_else(|| Self::malformed(path, format!("missing {}", field)))?
            .parse()
            .map_err(|e| Self::malformed(path, format!("{}: {}", field, e)))
    }

    /// Expected output amount for swapping `amount` of `src` into `dst`
    pub async fn get_quote(&self, src: &str, dst: &str, amount: Amount) -> Result<Amount, ToolError> {
        let path = "/quote";
        let query = [("src", src.to_string()), ("dst", dst.to_string()), ("amount", amount.to_string())];
        let body = self.get(path, &query).await?;
        Self::amount_field(path, &body, "dstAmount")
    }

    /// Current router allowance of `token_address` for `wallet_address`
    pub async fn check_allowance(&self, token_address: &str, wallet_address: &str) -> Result<Amount, ToolError> {
        let path = "/approve/allowance";
        let query = [
            ("tokenAddress", token_address.to_string()),
            ("walletAddress", wallet_address.to_string()),
        ];
        let body = self.get(path, &query).await?;
        Self::amount_field(path, &body, "allowance")
    }

    /// Approval transaction letting the router spend `amount` of `token_address`
    pub async fn get_approve_transaction(
        &self,
        token_address: &str,
        amount: Amount,
    ) -> Result<TransactionPayload, ToolError> {
        let path = "/approve/transaction";
        let query = [("tokenAddress", token_address.to_string()), ("amount", amount.to_string())];
        let body = self.get(path, &query).await?;
        TransactionPayload::from_value(&body).map_err(|e| Self::malformed(path, e))
    }

    /// Swap transaction; `from` is lowercased and partial fills are disabled
    pub async fn get_swap_transaction(&self, params: &SwapParams) -> Result<TransactionPayload, ToolError> {
        let path = "/swap";
        let query = [
            ("src", params.src_token.clone()),
            ("dst", params.dst_token.clone()),
            ("amount", params.amount.to_string()),
            ("from", params.from.to_lowercase()),
            ("slippage", params.slippage.to_string()),
            ("disableEstimate", "false".to_string()),
            ("allowPartialFill", "false".to_string()),
        ];
        let body = self.get(path, &query).await?;
        TransactionPayload::from_value(&body["tx"]).map_err(|e| Self::malformed(path, e))
    }
}

/// Parameters of a swap transaction request
#[derive(Debug, Clone, PartialEq)]
pub struct SwapParams {
    pub src_token: String,
    pub dst_token: String,
    pub amount: Amount,
    pub from: String,
    pub slippage: f64,
}

#[derive(Deserialize)]
struct QuoteInput {
    src: String,
    dst: String,
    amount: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllowanceInput {
    token_address: String,
    wallet_address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveInput {
    token_address: String,
    amount: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapInput {
    src_token: String,
    dst_token: String,
    amount: String,
    from: String,
    slippage: Option<f64>,
}

/// The closed set of direct swap tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapToolKind {
    GetQuote,
    CheckAllowance,
    GetApproveTransaction,
    GetSwapTransaction,
}

impl SwapToolKind {
    pub const ALL: [SwapToolKind; 4] = [
        SwapToolKind::GetQuote,
        SwapToolKind::CheckAllowance,
        SwapToolKind::GetApproveTransaction,
        SwapToolKind::GetSwapTransaction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SwapToolKind::GetQuote => "getQuote",
            SwapToolKind::CheckAllowance => "checkAllowance",
            SwapToolKind::GetApproveTransaction => "getApproveTransaction",
            SwapToolKind::GetSwapTransaction => "getSwapTransaction",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SwapToolKind::GetQuote => "Get the expected output amount for swapping one token into another via 1inch.",
            SwapToolKind::CheckAllowance => "Check token allowance for the provided wallet address",
            SwapToolKind::GetApproveTransaction => {
                "Get an approval transaction payload from 1inch Swap API for the provided token and amount."
            }
            SwapToolKind::GetSwapTransaction => "Get a swap transaction payload from 1inch Swap API.",
        }
    }

    pub fn input_schema(&self) -> Value {
        let amount = json!({"type": "string", "pattern": "^\\d+$", "description": "Integer amount in smallest units"});
        match self {
            SwapToolKind::GetQuote => json!({
                "type": "object",
                "properties": {
                    "src": {"type": "string", "description": "Source token address"},
                    "dst": {"type": "string", "description": "Destination token address"},
                    "amount": amount
                },
                "required": ["src", "dst", "amount"]
            }),
            SwapToolKind::CheckAllowance => json!({
                "type": "object",
                "properties": {
                    "tokenAddress": {"type": "string"},
                    "walletAddress": {"type": "string"}
                },
                "required": ["tokenAddress", "walletAddress"]
            }),
            SwapToolKind::GetApproveTransaction => json!({
                "type": "object",
                "properties": {
                    "tokenAddress": {"type": "string"},
                    "amount": amount
                },
                "required": ["tokenAddress", "amount"]
            }),
            SwapToolKind::GetSwapTransaction => json!({
                "type": "object",
                "properties": {
                    "srcToken": {"type": "string"},
                    "dstToken": {"type": "string"},
                    "amount": amount,
                    "from": {"type": "string", "description": "Wallet address sending the swap"},
                    "slippage": {"type": "number", "description": "Slippage percent, defaults to 1"}
                },
                "required": ["srcToken", "dstToken", "amount", "from"]
            }),
        }
    }
}

/// One direct swap tool bound to a shared client
pub struct SwapTool {
    kind: SwapToolKind,
    client: Arc<OneInchClient>,
}

impl SwapTool {
    pub fn new(kind: SwapToolKind, client: Arc<OneInchClient>) -> Self {
        Self { kind, client }
    }

    /// All swap tools sharing one client
    pub fn all(client: Arc<OneInchClient>) -> Vec<Arc<dyn Tool>> {
        SwapToolKind::ALL
            .iter()
            .map(|kind| Arc::new(SwapTool::new(*kind, Arc::clone(&client))) as Arc<dyn Tool>)
            .collect()
    }

    fn parse<T: for<'de> Deserialize<'de>>(&self, input: Value) -> Result<T, ToolError> {
        serde_json::from_value(input).map_err(|e| ToolError::validation(self.kind.name(), e.to_string()))
    }

    fn non_empty<'a>(&self, field: &str, value: &'a str) -> Result<&'a str, ToolError> {
        if value.trim().is_empty() {
            return Err(ToolError::validation(self.kind.name(), format!("{} must not be empty", field)));
        }
        Ok(value)
    }

    fn amount(&self, raw: &str) -> Result<Amount, ToolError> {
        raw.parse()
            .map_err(|e| ToolError::validation(self.kind.name(), format!("amount: {}", e)))
    }
}

#[async_trait]
impl Tool for SwapTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn input_schema(&self) -> Value {
        self.kind.input_schema()
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        match self.kind {
            SwapToolKind::GetQuote => {
                let input: QuoteInput = self.parse(input)?;
                let src = self.non_empty("src", &input.src)?;
                let dst = self.non_empty("dst", &input.dst)?;
                let amount = self.amount(&input.amount)?;
                let dst_amount = self.client.get_quote(src, dst, amount).await?;
                Ok(json!({"dstAmount": dst_amount}))
            }
            SwapToolKind::CheckAllowance => {
                let input: AllowanceInput = self.parse(input)?;
                let token = self.non_empty("tokenAddress", &input.token_address)?;
                let allowance = self.client.check_allowance(token, &input.wallet_address).await?;
                Ok(json!({"allowance": allowance}))
            }
            SwapToolKind::GetApproveTransaction => {
                let input: ApproveInput = self.parse(input)?;
                let token = self.non_empty("tokenAddress", &input.token_address)?;
                let amount = self.amount(&input.amount)?;
                let payload = self.client.get_approve_transaction(token, amount).await?;
                Ok(payload.to_json())
            }
            SwapToolKind::GetSwapTransaction => {
                let input: SwapInput = self.parse(input)?;
                let slippage = input.slippage.unwrap_or(1.0);
                if !(0.0..=50.0).contains(&slippage) {
                    return Err(ToolError::validation(
                        self.kind.name(),
                        "slippage must be between 0 and 50",
                    ));
                }
                let params = SwapParams {
                    src_token: self.non_empty("srcToken", &input.src_token)?.to_string(),
                    dst_token: self.non_empty("dstToken", &input.dst_token)?.to_string(),
                    amount: self.amount(&input.amount)?,
                    from: input.from,
                    slippage,
                };
                let payload = self.client.get_swap_transaction(&params).await?;
                Ok(payload.to_json())
            }
        }
    }
}
