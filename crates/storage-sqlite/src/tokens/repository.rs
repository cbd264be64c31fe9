use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;

use barsync_core::credentials::{Token, TokenStore};
use barsync_core::Result;

use super::model::ProviderTokenDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::provider_tokens::dsl as tokens_dsl;

/// Token store backed by the `provider_tokens` table, keyed by provider id so
/// several providers can share one database.
pub struct SqliteTokenStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
    provider: String,
}

impl SqliteTokenStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle, provider: impl Into<String>) -> Self {
        Self {
            pool,
            writer,
            provider: provider.into(),
        }
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn load(&self) -> Result<Option<Token>> {
        let mut conn = get_connection(&self.pool)?;

        let row = tokens_dsl::provider_tokens
            .find(&self.provider)
            .select(ProviderTokenDB::as_select())
            .first::<ProviderTokenDB>(&mut conn)
            .optional()
            .into_core()?;

        match row {
            Some(row) => Ok(Some(Token::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, token: &Token) -> Result<()> {
        let row = ProviderTokenDB::from_token(&self.provider, token);
        let provider = self.provider.clone();

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::replace_into(tokens_dsl::provider_tokens)
                    .values(&row)
                    .execute(conn)
                    .into_core()?;
                Ok(())
            })
            .await?;

        debug!("Stored access token for {}", provider);
        Ok(())
    }
}
