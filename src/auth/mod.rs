pub mod claims;
pub mod crypto;
pub mod dto;
pub mod handlers;
pub mod identity;
pub mod jwt;
pub mod provider;
pub mod service;

pub use handlers::router;
