//! Payment Orchestrator Service
//!
//! Runs the three payment actions for an authenticated caller: preview,
//! USSD push and status check. Owns the ledger bookkeeping around them and
//! the order/subscription side effects of a completed payment.

use crate::auth::UserIdentity;
use crate::config::PaymentConfig;
use crate::database::repository::{
    NewLedgerEntry, OrderStore, StatusUpdate, TransactionLedger,
};
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::logging::mask_phone_number;
use crate::middleware::logging::log_external_call;
use crate::payments::error::PaymentError;
use crate::payments::provider::MobileMoneyGateway;
use crate::payments::token::CredentialCache;
use crate::payments::types::{
    LedgerStatus, PaymentPayload, PaymentRequest, ProviderResponse, StatusQuery,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Configuration for the payment orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Used when the caller omits `currency`
    pub default_currency: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_currency: "TZS".to_string(),
        }
    }
}

impl From<&PaymentConfig> for OrchestratorConfig {
    fn from(config: &PaymentConfig) -> Self {
        Self {
            default_currency: config.default_currency.clone(),
        }
    }
}

pub struct PaymentOrchestrator {
    credentials: Arc<CredentialCache>,
    gateway: Arc<dyn MobileMoneyGateway>,
    ledger: Arc<dyn TransactionLedger>,
    orders: Arc<dyn OrderStore>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        credentials: Arc<CredentialCache>,
        gateway: Arc<dyn MobileMoneyGateway>,
        ledger: Arc<dyn TransactionLedger>,
        orders: Arc<dyn OrderStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            credentials,
            gateway,
            ledger,
            orders,
            config,
        }
    }

    /// Ask the provider whether the payment is payable without moving money.
    pub async fn validate(
        &self,
        user: &UserIdentity,
        payload: PaymentPayload,
    ) -> AppResult<JsonValue> {
        let request = payload.into_request(&self.config.default_currency)?;
        info!(
            user_id = %user.id,
            reference = %request.reference,
            network = %request.network,
            phone = %mask_phone_number(&request.phone_number),
            "validating payment"
        );

        let token = self.token().await?;
        let preview = log_external_call(
            self.gateway.name(),
            "ussd-push/preview",
            self.gateway.validate(&token, &request),
        )
        .await;

        match preview {
            Ok(response) => Ok(response.into_inner()),
            Err(e) => Err(self.provider_failure("ussd-push/preview", e).await),
        }
    }

    /// Push a payment prompt to the subscriber and record it as pending.
    pub async fn initiate(
        &self,
        user: &UserIdentity,
        payload: PaymentPayload,
    ) -> AppResult<JsonValue> {
        let request = payload.into_request(&self.config.default_currency)?;
        info!(
            user_id = %user.id,
            reference = %request.reference,
            amount = %request.amount,
            currency = %request.currency,
            network = %request.network,
            phone = %mask_phone_number(&request.phone_number),
            "initiating payment"
        );

        let token = self.token().await?;

        // Some provider accounts reject previews yet accept the push itself.
        if let Err(e) = log_external_call(
            self.gateway.name(),
            "ussd-push/preview",
            self.gateway.validate(&token, &request),
        )
        .await
        {
            warn!(
                reference = %request.reference,
                error = %e,
                "payment preview failed, continuing with initiation"
            );
        }

        let response = match log_external_call(
            self.gateway.name(),
            "ussd-push",
            self.gateway.initiate(&token, &request),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(reference = %request.reference, error = %e, "payment initiation failed");
                return Err(self.provider_failure("ussd-push", e).await);
            }
        };

        self.record_pending(user.id, &request, &response).await;

        info!(
            reference = %request.reference,
            transaction_id = ?response.transaction_id(),
            "payment initiated"
        );
        Ok(response.into_inner())
    }

    /// Query the provider for a transaction and fold the result into the ledger.
    ///
    /// The ledger is only written when the caller supplied a `reference`, and
    /// only with the provider transaction recorded on that row.
    pub async fn check_status(
        &self,
        user: &UserIdentity,
        query: StatusQuery,
    ) -> AppResult<JsonValue> {
        let (transaction_id, ledger_reference) = match (query.transaction_id(), query.reference()) {
            (supplied, Some(reference)) => {
                let stored = self.stored_transaction_id(user.id, &reference).await?;
                match (supplied, stored) {
                    (Some(supplied), Some(stored)) if supplied != stored => {
                        warn!(
                            reference = %reference,
                            supplied = %supplied,
                            recorded = %stored,
                            "transaction_id does not match the recorded transaction, using the recorded one"
                        );
                        (stored, Some(reference))
                    }
                    (_, Some(stored)) => (stored, Some(reference)),
                    (Some(supplied), None) => {
                        warn!(
                            reference = %reference,
                            transaction_id = %supplied,
                            "reference has no recorded transaction, ledger left unchanged"
                        );
                        (supplied, None)
                    }
                    (None, None) => return Err(AppError::transaction_not_found(&reference)),
                }
            }
            (Some(id), None) => (id, None),
            (None, None) => {
                return Err(AppError::new(AppErrorKind::Validation(
                    ValidationError::MissingIdentifier,
                )))
            }
        };

        let token = self.token().await?;
        let response = match log_external_call(
            self.gateway.name(),
            "transactions",
            self.gateway.check_status(&token, &transaction_id),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(transaction_id = %transaction_id, error = %e, "status check failed");
                return Err(self.provider_failure("transactions", e).await);
            }
        };

        if let (Some(reference), Some(provider_status)) = (ledger_reference, response.status()) {
            let status = LedgerStatus::from_provider_status(&provider_status);
            self.record_status(user.id, &reference, status, &transaction_id)
                .await;
        }

        Ok(response.into_inner())
    }

    async fn token(&self) -> AppResult<String> {
        self.credentials.get_token().await.map_err(|e| {
            error!(error = %e, "could not obtain provider access token");
            AppError::from(e)
        })
    }

    /// Convert a provider failure, dropping the cached token if the provider
    /// rejected it.
    async fn provider_failure(&self, operation: &str, err: PaymentError) -> AppError {
        let rejected_token = matches!(
            &err,
            PaymentError::GatewayError { provider_code: Some(code), .. } if code == "401"
        ) || matches!(err, PaymentError::AuthenticationFailed { .. });
        if rejected_token {
            self.credentials.invalidate().await;
        }
        AppError::from(err).with_context(format!("{} {}", self.gateway.name(), operation))
    }

    async fn stored_transaction_id(
        &self,
        user_id: Uuid,
        reference: &str,
    ) -> AppResult<Option<String>> {
        let row = self.ledger.find_by_reference(reference, user_id).await?;
        Ok(row
            .and_then(|row| row.provider_transaction_id)
            .filter(|id| !id.is_empty()))
    }

    async fn record_pending(&self, user_id: Uuid, request: &PaymentRequest, response: &ProviderResponse) {
        let entry = NewLedgerEntry {
            user_id,
            order_id: request.order_id,
            subscription_id: request.subscription_id,
            amount: request.amount.clone(),
            currency: request.currency.clone(),
            network: request.network.as_str().to_string(),
            phone_number: request.phone_number.clone(),
            reference: request.reference.clone(),
            provider_transaction_id: response.transaction_id(),
            description: request.description.clone(),
        };

        // The push already reached the handset; a ledger failure must not
        // turn the response into an error.
        if let Err(e) = self.ledger.record_pending(entry).await {
            warn!(
                reference = %request.reference,
                error = %e,
                "failed to record pending payment, continuing"
            );
        }
    }

    async fn record_status(
        &self,
        user_id: Uuid,
        reference: &str,
        status: LedgerStatus,
        transaction_id: &str,
    ) {
        let update = match self
            .ledger
            .apply_status(reference, user_id, status, Some(transaction_id))
            .await
        {
            Ok(update) => update,
            Err(e) => {
                warn!(reference, error = %e, "failed to update payment status");
                return;
            }
        };

        match &update {
            StatusUpdate::Missing => {
                warn!(reference, "status check for unknown reference");
            }
            StatusUpdate::Ignored { current } => {
                warn!(
                    reference,
                    current = %current,
                    requested = %status,
                    "ignoring status update for settled payment"
                );
            }
            StatusUpdate::Applied { previous, row } => {
                info!(
                    reference,
                    from = %previous,
                    to = %row.status,
                    "payment status updated"
                );
            }
        }

        if !update.completed_now() {
            return;
        }

        if let StatusUpdate::Applied { row, .. } = update {
            if let Some(order_id) = row.order_id {
                match self.orders.confirm_order(order_id).await {
                    Ok(true) => info!(%order_id, reference, "order confirmed"),
                    Ok(false) => warn!(%order_id, reference, "order to confirm not found"),
                    Err(e) => error!(%order_id, error = %e, "failed to confirm order"),
                }
            }
            if let Some(subscription_id) = row.subscription_id {
                match self.orders.activate_subscription(subscription_id).await {
                    Ok(true) => info!(%subscription_id, reference, "subscription activated"),
                    Ok(false) => warn!(%subscription_id, reference, "subscription not found"),
                    Err(e) => error!(%subscription_id, error = %e, "failed to activate subscription"),
                }
            }
        }
    }
}
