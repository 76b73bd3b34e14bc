pub mod auth;
pub mod broker;
pub mod gateway;

pub use auth::{AuthError, AuthValidator, SubscriberClaims};
pub use broker::Broker;
pub use gateway::{router, GatewayState};
