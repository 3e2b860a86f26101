use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgQueryResult};
use sqlx::query::{Query, QueryAs};
use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{TokenStore, TxWork};
use crate::abilities::AbilitySet;
use crate::errors::StoreError;
use crate::token::{SubjectRef, Token, TokenId, TokenType};

const TOKEN_COLUMNS: &str = "id, token_type, subject_type, subject_id, group_id, name, \
     secret_hash, abilities, revoked_at, expires_at, last_used_at, created_at, updated_at";

/// Postgres-backed token store.
///
/// A store handle either runs against the pool or against one shared
/// transaction; `run_in_transaction` hands the work a transaction-scoped
/// handle so every call inside commits or rolls back together.
#[derive(Clone)]
pub struct PgTokenStore {
    exec: PgExec,
}

#[derive(Clone)]
enum PgExec {
    Pool(PgPool),
    Tx(Arc<Mutex<Transaction<'static, Postgres>>>),
}

impl PgTokenStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            exec: PgExec::Pool(pool),
        }
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        match &self.exec {
            PgExec::Pool(pool) => {
                sqlx::migrate!("./migrations").run(pool).await?;
                Ok(())
            }
            PgExec::Tx(_) => anyhow::bail!("cannot run migrations inside a transaction"),
        }
    }

    async fn execute(
        &self,
        query: Query<'_, Postgres, PgArguments>,
    ) -> Result<PgQueryResult, sqlx::Error> {
        match &self.exec {
            PgExec::Pool(pool) => query.execute(pool).await,
            PgExec::Tx(tx) => {
                let mut tx = tx.lock().await;
                query.execute(&mut **tx).await
            }
        }
    }

    async fn fetch_optional(
        &self,
        query: QueryAs<'_, Postgres, TokenRow, PgArguments>,
    ) -> Result<Option<TokenRow>, sqlx::Error> {
        match &self.exec {
            PgExec::Pool(pool) => query.fetch_optional(pool).await,
            PgExec::Tx(tx) => {
                let mut tx = tx.lock().await;
                query.fetch_optional(&mut **tx).await
            }
        }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn find_by_type_and_hash(
        &self,
        token_type: Option<TokenType>,
        secret_hash: &str,
    ) -> Result<Option<Token>, StoreError> {
        let sql = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens \
             WHERE ($1::text IS NULL OR token_type = $1) AND secret_hash = $2"
        );
        let query = sqlx::query_as::<_, TokenRow>(&sql)
            .bind(token_type.map(|t| t.as_str().to_string()))
            .bind(secret_hash);
        let row = self.fetch_optional(query).await?;
        row.map(TokenRow::into_token).transpose()
    }

    async fn save(&self, token: &mut Token) -> Result<(), StoreError> {
        token.updated_at = Utc::now();
        let abilities =
            serde_json::to_value(&token.abilities).map_err(|e| StoreError::Internal(e.into()))?;

        if token.is_persisted() {
            let query = sqlx::query(
                r#"UPDATE tokens
                   SET token_type = $2, subject_type = $3, subject_id = $4, group_id = $5,
                       name = $6, secret_hash = $7, abilities = $8, revoked_at = $9,
                       expires_at = $10, last_used_at = $11, updated_at = $12
                   WHERE id = $1"#,
            )
            .bind(token.id.as_uuid())
            .bind(token.token_type.as_str())
            .bind(&token.subject.kind)
            .bind(&token.subject.id)
            .bind(token.group_id)
            .bind(token.name.as_deref())
            .bind(&token.secret_hash)
            .bind(abilities)
            .bind(token.revoked_at)
            .bind(token.expires_at)
            .bind(token.last_used_at)
            .bind(token.updated_at);
            self.execute(query).await.map_err(map_db_err)?;
            return Ok(());
        }

        let sql = r#"INSERT INTO tokens
                (token_type, subject_type, subject_id, group_id, name, secret_hash,
                 abilities, revoked_at, expires_at, last_used_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING id"#;
        let query = sqlx::query_scalar::<_, Uuid>(sql)
            .bind(token.token_type.as_str())
            .bind(&token.subject.kind)
            .bind(&token.subject.id)
            .bind(token.group_id)
            .bind(token.name.as_deref())
            .bind(&token.secret_hash)
            .bind(abilities)
            .bind(token.revoked_at)
            .bind(token.expires_at)
            .bind(token.last_used_at)
            .bind(token.created_at)
            .bind(token.updated_at);
        let id = match &self.exec {
            PgExec::Pool(pool) => query.fetch_one(pool).await,
            PgExec::Tx(tx) => {
                let mut tx = tx.lock().await;
                query.fetch_one(&mut **tx).await
            }
        }
        .map_err(map_db_err)?;
        token.id = TokenId::from_uuid(id);
        Ok(())
    }

    async fn delete(&self, token: &Token) -> Result<(), StoreError> {
        let query = sqlx::query("DELETE FROM tokens WHERE id = $1").bind(token.id.as_uuid());
        self.execute(query).await?;
        Ok(())
    }

    async fn delete_by_id_or_group(
        &self,
        id: TokenId,
        group_id: Option<i64>,
    ) -> Result<u64, StoreError> {
        let query = sqlx::query(
            "DELETE FROM tokens WHERE id = $1 OR ($2::bigint IS NOT NULL AND group_id = $2)",
        )
        .bind(id.as_uuid())
        .bind(group_id);
        let result = self.execute(query).await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_group(
        &self,
        group_id: i64,
        token_type: Option<TokenType>,
    ) -> Result<u64, StoreError> {
        let query = sqlx::query(
            "DELETE FROM tokens WHERE group_id = $1 AND ($2::text IS NULL OR token_type = $2)",
        )
        .bind(group_id)
        .bind(token_type.map(|t| t.as_str().to_string()));
        let result = self.execute(query).await?;
        Ok(result.rows_affected())
    }

    async fn next_group_id(&self, subject: &SubjectRef) -> Result<i64, StoreError> {
        let sql = "SELECT COALESCE(MAX(group_id), 0) + 1 FROM tokens \
                   WHERE subject_type = $1 AND subject_id = $2";
        let query = sqlx::query_scalar::<_, i64>(sql)
            .bind(&subject.kind)
            .bind(&subject.id);
        let next = match &self.exec {
            PgExec::Pool(pool) => query.fetch_one(pool).await?,
            PgExec::Tx(tx) => {
                let mut tx = tx.lock().await;
                query.fetch_one(&mut **tx).await?
            }
        };
        Ok(next)
    }

    async fn prune_expired(
        &self,
        token_type: Option<TokenType>,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let query = sqlx::query(
            "DELETE FROM tokens \
             WHERE ($1::text IS NULL OR token_type = $1) \
               AND (expires_at <= $2 OR revoked_at <= $2)",
        )
        .bind(token_type.map(|t| t.as_str().to_string()))
        .bind(cutoff);
        let result = self.execute(query).await?;
        Ok(result.rows_affected())
    }

    async fn run_in_transaction(&self, work: TxWork) -> Result<(), StoreError> {
        match &self.exec {
            // already transactional: run inline
            PgExec::Tx(_) => work(self).await,
            PgExec::Pool(pool) => {
                let tx = pool.begin().await?;
                let shared = Arc::new(Mutex::new(tx));
                let scoped = PgTokenStore {
                    exec: PgExec::Tx(Arc::clone(&shared)),
                };
                let outcome = work(&scoped).await;
                drop(scoped);
                let tx = Arc::try_unwrap(shared)
                    .map_err(|_| {
                        StoreError::Internal(anyhow::anyhow!(
                            "transaction handle escaped its scope"
                        ))
                    })?
                    .into_inner();
                match outcome {
                    Ok(()) => {
                        tx.commit().await?;
                        Ok(())
                    }
                    Err(e) => {
                        tx.rollback().await?;
                        Err(e)
                    }
                }
            }
        }
    }
}

fn map_db_err(e: sqlx::Error) -> StoreError {
    if e.as_database_error()
        .map_or(false, |db| db.is_unique_violation())
    {
        StoreError::Conflict
    } else {
        StoreError::Database(e)
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    token_type: String,
    subject_type: String,
    subject_id: String,
    group_id: Option<i64>,
    name: Option<String>,
    secret_hash: String,
    abilities: serde_json::Value,
    revoked_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TokenRow {
    fn into_token(self) -> Result<Token, StoreError> {
        let token_type = TokenType::parse(&self.token_type).map_err(|_| {
            StoreError::Internal(anyhow::anyhow!(
                "unknown token type in store: {:?}",
                self.token_type
            ))
        })?;
        let abilities: AbilitySet =
            serde_json::from_value(self.abilities).map_err(|e| StoreError::Internal(e.into()))?;
        Ok(Token {
            id: TokenId::from_uuid(self.id),
            token_type,
            subject: SubjectRef::new(self.subject_type, self.subject_id),
            group_id: self.group_id,
            name: self.name,
            secret_hash: self.secret_hash,
            abilities,
            revoked_at: self.revoked_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
