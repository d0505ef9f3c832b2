//! Gateway: HTTP + WebSocket surface.
//!
//! Single port serves the health probe, the provider webhook and the WebSocket that
//! dashboard clients use. Protocol: first request must be `connect`; then requests
//! (req/res), and event frames for every channel the client subscribed to.

mod protocol;
mod server;

pub use protocol::{
    ChannelParams, ConnectParams, GetMessageParams, HelloOk, RecentParams, WsRequest, WsResponse,
};
pub use server::{router, run_gateway, run_ingestion, GatewayState};
