use diesel::prelude::*;

use barsync_core::credentials::Token;

use crate::errors::StorageError;
use crate::utils::{decode_timestamp, encode_timestamp};

/// One row of `provider_tokens`; at most one per provider.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::provider_tokens)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProviderTokenDB {
    pub provider: String,
    pub access_token: String,
    pub expires_at: String,
    pub created_at: String,
}

impl ProviderTokenDB {
    pub fn from_token(provider: &str, token: &Token) -> Self {
        Self {
            provider: provider.to_string(),
            access_token: token.value.clone(),
            expires_at: encode_timestamp(token.expires_at),
            created_at: encode_timestamp(token.issued_at),
        }
    }
}

impl TryFrom<ProviderTokenDB> for Token {
    type Error = StorageError;

    fn try_from(db: ProviderTokenDB) -> Result<Self, Self::Error> {
        Ok(Token {
            issued_at: decode_timestamp(&db.created_at)?,
            expires_at: decode_timestamp(&db.expires_at)?,
            value: db.access_token,
        })
    }
}
