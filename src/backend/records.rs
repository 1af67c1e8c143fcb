//! Generic row access on top of Postgres' JSON functions.
//!
//! Rows travel as `jsonb`: reads go through `to_jsonb(t)` and writes through
//! `jsonb_populate_record`, so Postgres does the column typing. Table and
//! column identifiers interpolated into SQL always come from `Table`'s
//! whitelists, never from the caller.

use anyhow::Context;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use super::{Fields, OrderBy, Record, Table};

pub(super) async fn list(
    db: &PgPool,
    table: Table,
    owner: Uuid,
    order: OrderBy,
) -> anyhow::Result<Vec<Record>> {
    let sql = format!(
        "SELECT to_jsonb(t) FROM {} t WHERE t.{} = $1 ORDER BY t.{} {}",
        table.name(),
        table.owner_column(),
        order.column,
        if order.ascending { "ASC" } else { "DESC" },
    );
    let rows: Vec<(Record,)> = sqlx::query_as(&sql)
        .bind(owner)
        .fetch_all(db)
        .await
        .with_context(|| format!("list {}", table.name()))?;
    Ok(rows.into_iter().map(|(r,)| r).collect())
}

pub(super) async fn insert(db: &PgPool, table: Table, fields: &Fields) -> anyhow::Result<Record> {
    let cols = column_list(fields);
    let sql = format!(
        "INSERT INTO {t} AS t ({cols}) \
         SELECT {cols} FROM jsonb_populate_record(NULL::{t}, $1) \
         RETURNING to_jsonb(t)",
        t = table.name(),
        cols = cols,
    );
    let (row,): (Record,) = sqlx::query_as(&sql)
        .bind(Json(fields))
        .fetch_one(db)
        .await
        .with_context(|| format!("insert into {}", table.name()))?;
    Ok(row)
}

/// Returns the number of rows touched; zero means no row with that id
/// belongs to `owner`.
pub(super) async fn update(
    db: &PgPool,
    table: Table,
    owner: Uuid,
    id: Uuid,
    fields: &Fields,
) -> anyhow::Result<u64> {
    let cols = column_list(fields);
    let sql = format!(
        "UPDATE {t} AS t SET ({cols}) = \
         (SELECT {cols} FROM jsonb_populate_record(NULL::{t}, $1)) \
         WHERE t.id = $2 AND t.{owner} = $3",
        t = table.name(),
        cols = cols,
        owner = table.owner_column(),
    );
    let res = sqlx::query(&sql)
        .bind(Json(fields))
        .bind(id)
        .bind(owner)
        .execute(db)
        .await
        .with_context(|| format!("update {}", table.name()))?;
    Ok(res.rows_affected())
}

pub(super) async fn delete(db: &PgPool, table: Table, owner: Uuid, id: Uuid) -> anyhow::Result<u64> {
    let sql = format!(
        "DELETE FROM {} WHERE id = $1 AND {} = $2",
        table.name(),
        table.owner_column()
    );
    let res = sqlx::query(&sql)
        .bind(id)
        .bind(owner)
        .execute(db)
        .await
        .with_context(|| format!("delete from {}", table.name()))?;
    Ok(res.rows_affected())
}

fn column_list(fields: &Fields) -> String {
    fields.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}
