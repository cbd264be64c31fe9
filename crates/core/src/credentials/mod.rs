//! Credential lifecycle for provider access tokens.
//!
//! This module contains:
//! - `model`: The shared [`Token`] and its validity rule
//! - `store`: The [`TokenStore`] persistence seam
//! - `file_store`: A JSON file implementation of the store
//! - `manager`: [`CredentialManager`], the cache + single-flight refresh

mod file_store;
mod manager;
mod model;
mod store;

pub use file_store::JsonFileTokenStore;
pub use manager::CredentialManager;
pub use model::Token;
pub use store::TokenStore;
