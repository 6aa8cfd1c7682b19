pub mod repo;

pub use repo::{RefreshToken, TokenKind};
