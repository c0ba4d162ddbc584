pub mod card_gateway;
pub mod sap_odata;

pub use card_gateway::CardGatewayClient;
pub use sap_odata::SapODataClient;
