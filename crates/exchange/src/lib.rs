pub mod remote;
pub mod traits;

pub use remote::BybitClient;
pub use traits::{ExchangeGateway, Fill, GatewayError, OrderRecord, TickerSummary};
