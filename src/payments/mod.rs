//! Mobile-money payment primitives: wire types, phone handling, provider
//! access tokens and the ClickPesa USSD-push gateway.

pub mod error;
pub mod phone;
pub mod provider;
pub mod providers;
pub mod token;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::MobileMoneyGateway;
pub use providers::{ClickPesaConfig, ClickPesaGateway};
pub use token::{CredentialCache, SharedTokenStore, TokenIssuer};
pub use types::{
    LedgerStatus, MobileNetwork, PaymentPayload, PaymentRequest, ProviderResponse, StatusQuery,
};
