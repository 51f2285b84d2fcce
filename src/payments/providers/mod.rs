pub mod clickpesa;

pub use clickpesa::{ClickPesaConfig, ClickPesaGateway};
