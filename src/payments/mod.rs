pub mod error;
pub mod provider;
pub mod providers;
pub mod router;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentGateway;
pub use router::GatewayRouter;
pub use types::{
    CallbackPayload, CallbackStatus, Destination, GatewayRequest, GatewayResponse, GatewayStatus,
    PaymentChannel, PaymentDirection,
};
