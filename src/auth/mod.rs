pub mod token_manager;

pub use token_manager::{
    TokenInfo, TokenKind, TokenManager, ACCESS_TOKEN_TTL_SECS, REFRESH_TOKEN_TTL_SECS,
};
