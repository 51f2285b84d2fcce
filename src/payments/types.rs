use crate::error::{AppError, AppResult};
use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "TZS";

/// Mobile-money carriers accepted by the USSD push endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MobileNetwork {
    #[serde(rename = "MPESA")]
    Mpesa,
    #[serde(rename = "TIGOPESA")]
    TigoPesa,
    #[serde(rename = "AIRTELMONEY")]
    AirtelMoney,
    #[serde(rename = "HALOPESA")]
    HaloPesa,
}

impl MobileNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            MobileNetwork::Mpesa => "MPESA",
            MobileNetwork::TigoPesa => "TIGOPESA",
            MobileNetwork::AirtelMoney => "AIRTELMONEY",
            MobileNetwork::HaloPesa => "HALOPESA",
        }
    }

    pub fn all() -> &'static [MobileNetwork] {
        &[
            MobileNetwork::Mpesa,
            MobileNetwork::TigoPesa,
            MobileNetwork::AirtelMoney,
            MobileNetwork::HaloPesa,
        ]
    }
}

impl std::fmt::Display for MobileNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MobileNetwork {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        match normalized.as_str() {
            "MPESA" => Ok(MobileNetwork::Mpesa),
            "TIGOPESA" => Ok(MobileNetwork::TigoPesa),
            "AIRTELMONEY" => Ok(MobileNetwork::AirtelMoney),
            "HALOPESA" => Ok(MobileNetwork::HaloPesa),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported network: {}", value),
                field: Some("network".to_string()),
            }),
        }
    }
}

/// Ledger status taxonomy. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Processing => "processing",
            LedgerStatus::Completed => "completed",
            LedgerStatus::Failed => "failed",
            LedgerStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LedgerStatus::Completed | LedgerStatus::Failed | LedgerStatus::Cancelled
        )
    }

    pub fn valid_transitions(&self) -> Vec<LedgerStatus> {
        match self {
            LedgerStatus::Pending | LedgerStatus::Processing => vec![
                LedgerStatus::Processing,
                LedgerStatus::Completed,
                LedgerStatus::Failed,
                LedgerStatus::Cancelled,
            ],
            // Terminal states - no valid transitions
            LedgerStatus::Completed | LedgerStatus::Failed | LedgerStatus::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, target: LedgerStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Map a provider status string onto the ledger taxonomy. Anything that is
    /// not a recognised terminal status is still in flight.
    pub fn from_provider_status(status: &str) -> Self {
        match status.trim().to_uppercase().as_str() {
            "COMPLETED" | "PAYMENT_RECEIVED" | "SUCCESS" | "SETTLED" => LedgerStatus::Completed,
            "FAILED" => LedgerStatus::Failed,
            "CANCELLED" | "CANCELED" => LedgerStatus::Cancelled,
            _ => LedgerStatus::Processing,
        }
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(LedgerStatus::Pending),
            "processing" => Ok(LedgerStatus::Processing),
            "completed" => Ok(LedgerStatus::Completed),
            "failed" => Ok(LedgerStatus::Failed),
            "cancelled" => Ok(LedgerStatus::Cancelled),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown ledger status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

/// A validated payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRequest {
    pub amount: BigDecimal,
    pub currency: String,
    pub phone_number: String,
    pub network: MobileNetwork,
    pub reference: String,
    pub description: String,
    pub order_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
}

impl PaymentRequest {
    /// Body shared by the preview and USSD push endpoints.
    pub fn provider_body(&self) -> JsonValue {
        serde_json::json!({
            "amount": amount_to_json(&self.amount),
            "currency": self.currency,
            "phone_number": self.phone_number,
            "network": self.network,
            "reference": self.reference,
            "description": self.description,
        })
    }
}

/// Providers expect a JSON number, not the string form serde gives BigDecimal.
fn amount_to_json(amount: &BigDecimal) -> JsonValue {
    let normalized = amount.normalized();
    let text = if normalized.fractional_digit_count() <= 0 {
        normalized.with_scale(0).to_string()
    } else {
        normalized.to_string()
    };
    serde_json::from_str::<JsonValue>(&text).unwrap_or(JsonValue::String(text))
}

/// Wire body of `validate` / `initiate`. Every field is optional so missing
/// fields surface as a 400 instead of a deserialisation failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentPayload {
    #[serde(default)]
    pub amount: Option<JsonValue>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

impl PaymentPayload {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if parse_amount(self.amount.as_ref()).map_or(true, |a| a.is_zero()) {
            missing.push("amount");
        }
        if non_empty(&self.phone_number).is_none() {
            missing.push("phone_number");
        }
        if non_empty(&self.network).is_none() {
            missing.push("network");
        }
        if non_empty(&self.reference).is_none() {
            missing.push("reference");
        }
        missing
    }

    pub fn into_request(self, default_currency: &str) -> AppResult<PaymentRequest> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(AppError::missing_fields(&missing));
        }

        let amount = parse_amount(self.amount.as_ref())
            .ok_or_else(|| AppError::invalid_field("amount", "must be a decimal number"))?;
        if amount < BigDecimal::zero() {
            return Err(AppError::invalid_field("amount", "must be greater than zero"));
        }

        let network_raw = non_empty(&self.network).unwrap_or_default();
        let network = MobileNetwork::from_str(&network_raw).map_err(|_| {
            AppError::invalid_field(
                "network",
                &format!(
                    "unsupported network '{}', expected one of {}",
                    network_raw,
                    MobileNetwork::all()
                        .iter()
                        .map(|n| n.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
        })?;

        Ok(PaymentRequest {
            amount,
            currency: non_empty(&self.currency).unwrap_or_else(|| default_currency.to_string()),
            phone_number: non_empty(&self.phone_number).unwrap_or_default(),
            network,
            reference: non_empty(&self.reference).unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            order_id: parse_link("order_id", self.order_id.as_deref())?,
            subscription_id: parse_link("subscription_id", self.subscription_id.as_deref())?,
        })
    }
}

/// Body of `check-status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusQuery {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

impl StatusQuery {
    pub fn transaction_id(&self) -> Option<String> {
        non_empty(&self.transaction_id)
    }

    pub fn reference(&self) -> Option<String> {
        non_empty(&self.reference)
    }
}

/// Raw provider JSON, passed back to the caller untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ProviderResponse(pub JsonValue);

impl ProviderResponse {
    /// Provider-assigned id: `transaction_id`, falling back to `reference`.
    pub fn transaction_id(&self) -> Option<String> {
        ["transaction_id", "reference"]
            .iter()
            .find_map(|key| json_string(self.0.get(*key)))
    }

    pub fn status(&self) -> Option<String> {
        json_string(self.0.get("status"))
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }
}

/// `ORDER-<first 8 chars of the order id>` in upper case, with `-<attempt>`
/// appended from the second attempt on.
///
/// References are unique in the ledger: reusing one for a retry leaves the
/// new push unrecorded and status checks keep resolving the first attempt.
pub fn order_reference(order_id: &Uuid, attempt: u32) -> String {
    let id = order_id.to_string();
    let base = format!("ORDER-{}", id[..8].to_uppercase());
    if attempt > 1 {
        format!("{}-{}", base, attempt)
    } else {
        base
    }
}

/// `SUB-<first 8 chars of the user id>-<unix millis>`.
pub fn subscription_reference(user_id: &Uuid, now_millis: i64) -> String {
    let id = user_id.to_string();
    format!("SUB-{}-{}", &id[..8], now_millis)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn json_string(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_amount(value: Option<&JsonValue>) -> Option<BigDecimal> {
    match value? {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn parse_link(field: &str, value: Option<&str>) -> AppResult<Option<Uuid>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|_| AppError::invalid_field(field, "must be a UUID")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: JsonValue) -> PaymentPayload {
        serde_json::from_value(value).expect("payload should deserialize")
    }

    #[test]
    fn network_parsing_accepts_wire_names() {
        assert_eq!(MobileNetwork::from_str("MPESA").unwrap(), MobileNetwork::Mpesa);
        assert_eq!(MobileNetwork::from_str("m-pesa").unwrap(), MobileNetwork::Mpesa);
        assert_eq!(
            MobileNetwork::from_str("AirtelMoney").unwrap(),
            MobileNetwork::AirtelMoney
        );
        assert!(MobileNetwork::from_str("VODACOM").is_err());
    }

    #[test]
    fn provider_status_mapping() {
        assert_eq!(LedgerStatus::from_provider_status("COMPLETED"), LedgerStatus::Completed);
        assert_eq!(
            LedgerStatus::from_provider_status("PAYMENT_RECEIVED"),
            LedgerStatus::Completed
        );
        assert_eq!(LedgerStatus::from_provider_status("FAILED"), LedgerStatus::Failed);
        assert_eq!(LedgerStatus::from_provider_status("CANCELLED"), LedgerStatus::Cancelled);
        assert_eq!(LedgerStatus::from_provider_status("PROCESSING"), LedgerStatus::Processing);
        assert_eq!(LedgerStatus::from_provider_status("PENDING"), LedgerStatus::Processing);
        assert_eq!(LedgerStatus::from_provider_status("whatever"), LedgerStatus::Processing);
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in [
            LedgerStatus::Completed,
            LedgerStatus::Failed,
            LedgerStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
        assert!(LedgerStatus::Pending.can_transition_to(LedgerStatus::Processing));
        assert!(LedgerStatus::Processing.can_transition_to(LedgerStatus::Processing));
        assert!(!LedgerStatus::Processing.can_transition_to(LedgerStatus::Pending));
    }

    #[test]
    fn missing_fields_are_reported() {
        let p = payload(json!({ "amount": 0, "network": "MPESA" }));
        assert_eq!(p.missing_fields(), vec!["amount", "phone_number", "reference"]);

        let err = p.into_request(DEFAULT_CURRENCY).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn into_request_applies_default_currency() {
        let request = payload(json!({
            "amount": 15000,
            "phone_number": "255712345678",
            "network": "TIGOPESA",
            "reference": "ORDER-ABCDEF12",
            "description": "Order payment"
        }))
        .into_request(DEFAULT_CURRENCY)
        .expect("valid payload");

        assert_eq!(request.currency, "TZS");
        assert_eq!(request.network, MobileNetwork::TigoPesa);
        assert_eq!(request.provider_body()["amount"], json!(15000));
    }

    #[test]
    fn into_request_rejects_bad_links_and_networks() {
        let bad_order = payload(json!({
            "amount": "100",
            "phone_number": "255712345678",
            "network": "MPESA",
            "reference": "r-1",
            "order_id": "not-a-uuid"
        }));
        assert_eq!(bad_order.into_request("TZS").unwrap_err().status_code(), 400);

        let bad_network = payload(json!({
            "amount": 100,
            "phone_number": "255712345678",
            "network": "VODACOM",
            "reference": "r-1"
        }));
        assert_eq!(bad_network.into_request("TZS").unwrap_err().status_code(), 400);
    }

    #[test]
    fn provider_response_extracts_transaction_id() {
        let with_id = ProviderResponse(json!({ "transaction_id": "X", "reference": "R" }));
        assert_eq!(with_id.transaction_id().as_deref(), Some("X"));

        let reference_only = ProviderResponse(json!({ "reference": "R", "status": "PROCESSING" }));
        assert_eq!(reference_only.transaction_id().as_deref(), Some("R"));
        assert_eq!(reference_only.status().as_deref(), Some("PROCESSING"));

        assert!(ProviderResponse(json!({})).transaction_id().is_none());
    }

    #[test]
    fn reference_helpers() {
        let order_id = Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000000").unwrap();
        assert_eq!(order_reference(&order_id, 1), "ORDER-3F2A9C1E");
        assert_eq!(order_reference(&order_id, 2), "ORDER-3F2A9C1E-2");
        assert_ne!(order_reference(&order_id, 1), order_reference(&order_id, 3));

        let user_id = Uuid::parse_str("ab12cd34-0000-4000-8000-000000000000").unwrap();
        assert_eq!(
            subscription_reference(&user_id, 1_700_000_000_000),
            "SUB-ab12cd34-1700000000000"
        );
    }
}
