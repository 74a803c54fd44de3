//! RPC网关: Worker通道与运维通道的HTTP入口

pub mod handlers;
pub mod response;
pub mod routes;
pub mod state;

pub use response::{ResponseCode, RpcResponse};
pub use routes::create_router;
pub use state::{AppState, GatewayState};
