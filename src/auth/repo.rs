use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::backend::ProfileSeed;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // absent for OAuth-only accounts
    #[serde(skip_serializing)]
    pub token_version: i32,
    pub created_at: OffsetDateTime,
}

impl User {
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, token_version, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, email, password_hash, token_version, created_at FROM users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    pub async fn token_version(db: &PgPool, id: Uuid) -> anyhow::Result<Option<i32>> {
        let version = sqlx::query_scalar::<_, i32>(
            r#"SELECT token_version FROM users WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(db)
        .await
        .context("read token version")?;
        Ok(version)
    }

    /// Invalidate every token issued so far for this user.
    pub async fn bump_token_version(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        let done = sqlx::query(
            r#"UPDATE users SET token_version = token_version + 1 WHERE id = $1"#,
        )
        .bind(id)
        .execute(db)
        .await
        .context("bump token version")?;
        if done.rows_affected() == 0 {
            anyhow::bail!("user not found");
        }
        Ok(())
    }

    /// Create the account and its profile row in one transaction.
    pub async fn create_with_profile(
        db: &PgPool,
        email: &str,
        password_hash: Option<&str>,
        profile: &ProfileSeed,
    ) -> anyhow::Result<User> {
        let mut tx = db.begin().await.context("begin tx")?;
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash)
            VALUES ($1, $2)
            RETURNING id, email, password_hash, token_version, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .await
        .context("insert user")?;

        sqlx::query(
            r#"
            INSERT INTO profiles (id, full_name, gender, avatar_path, avatar_url)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&profile.full_name)
        .bind(&profile.gender)
        .bind(profile.avatar.as_ref().map(|a| a.path.as_str()))
        .bind(profile.avatar.as_ref().map(|a| a.public_url.as_str()))
        .execute(&mut *tx)
        .await
        .context("insert profile")?;

        tx.commit().await.context("commit tx")?;
        Ok(user)
    }
}
