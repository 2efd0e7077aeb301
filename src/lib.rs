pub mod auth;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod gateway;
pub mod infra;
pub mod logging;
pub mod security;
pub mod server;
pub mod service;
pub mod session;

pub use auth::{TokenInfo, TokenKind, TokenManager};
pub use config::GatewayConfig;
pub use device::{AuthorizationGrant, DeviceAuthorizationGraph, DeviceDirectory, DeviceInfo, GrantStatus};
pub use error::{ErrorCode, ErrorResponse, GatewayError, Result};
pub use gateway::{CommandGateway, CommandOutcome, CommandStatus};
pub use server::{GatewayServer, GatewayStats};
pub use session::{SessionHandle, SessionManager};
