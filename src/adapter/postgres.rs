use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

use crate::{
    adapter::IPostRepository,
    config::PostgresConnectionConfig,
    errors::{self, Errors},
    model::Post,
};

pub const OUTPUT_PLUGIN: &str = "test_decoding";

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: sqlx::Pool<sqlx::Postgres>,
}

/// Transport-level failures are connection-class; everything else keeps the
/// caller's error kind.
fn map_sqlx_error(error: sqlx::Error, wrap: fn(String) -> Errors, context: &str) -> Errors {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            Errors::ConnectorConnectionError(format!("{context}: {error}"))
        }
        error => wrap(format!("{context}: {error}")),
    }
}

impl PostgresConnection {
    /// Connections are opened on first use, so an unreachable server shows up
    /// as an error from the first query rather than here.
    pub fn new(config: &PostgresConnectionConfig) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .database(&config.database);

        if !config.password.is_empty() {
            options = options.password(&config.password);
        }

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        log::info!(
            "Created Postgres connection pool for {}:{}",
            config.host,
            config.port
        );

        PostgresConnection { pool }
    }

    pub async fn ping(&self) -> errors::Result<()> {
        let result = sqlx::query("SELECT 1").execute(&self.pool).await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(map_sqlx_error(
                e,
                Errors::DatabasePingError,
                "Failed to ping Postgres database",
            )),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReplicationSlot {
    pub slot_name: String,
    pub plugin: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PeekChangeResult {
    pub lsn: String,
    pub data: String,
}

impl PostgresConnection {
    pub async fn find_replication_slot_by_name(
        &self,
        slot_name: &str,
    ) -> errors::Result<Option<ReplicationSlot>> {
        let rows: Vec<ReplicationSlot> = sqlx::query_as(
            r#"
                SELECT slot_name::text as slot_name, plugin::text as plugin
                FROM pg_replication_slots
                WHERE slot_name = $1
            "#,
        )
        .bind(slot_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            map_sqlx_error(
                e,
                Errors::DatabaseQueryError,
                "Failed to find replication slot",
            )
        })?;

        Ok(rows.into_iter().next())
    }

    pub async fn create_replication_slot(&self, slot_name: &str) -> errors::Result<()> {
        log::debug!("Creating replication slot: {slot_name}");

        sqlx::query("SELECT pg_create_logical_replication_slot($1, $2);")
            .bind(slot_name)
            .bind(OUTPUT_PLUGIN)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_sqlx_error(
                    e,
                    Errors::ReplicationSlotCreateFailed,
                    "Failed to create replication slot",
                )
            })?;

        log::info!("Successfully created replication slot {slot_name}");

        Ok(())
    }

    /// Reads pending changes without consuming them. The same changes are
    /// returned again until the slot is advanced past them.
    pub async fn peek_changes(
        &self,
        replication_slot_name: &str,
        limit: i32,
    ) -> errors::Result<Vec<PeekChangeResult>> {
        log::debug!("Peeking changes for slot: {replication_slot_name}, limit: {limit}");

        let rows: Vec<PeekChangeResult> = sqlx::query_as(
            r#"
                SELECT lsn::text as lsn, data
                FROM pg_logical_slot_peek_changes(
                    $1, NULL, $2, 'include-xids', '0', 'skip-empty-xacts', '1'
                )
            "#,
        )
        .bind(replication_slot_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            map_sqlx_error(e, Errors::PeekChangesFailed, "Failed to peek changes")
        })?;

        Ok(rows)
    }

    pub async fn advance_replication_slot(
        &self,
        replication_slot_name: &str,
        lsn: &str,
    ) -> errors::Result<()> {
        sqlx::query("SELECT pg_replication_slot_advance($1, $2::pg_lsn);")
            .bind(replication_slot_name)
            .bind(lsn)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_sqlx_error(
                    e,
                    Errors::ReplicationSlotAdvanceFailed,
                    "Failed to advance replication slot",
                )
            })?;

        Ok(())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PostRow {
    id: i64,
    title: Option<String>,
    content: Option<String>,
    tags: Option<String>,
    cover_image: Option<String>,
    thumb_num: Option<i32>,
    favour_num: Option<i32>,
    view_num: Option<i32>,
    user_id: Option<i64>,
    priority: Option<i32>,
    is_delete: Option<i32>,
    create_time: Option<chrono::NaiveDateTime>,
    update_time: Option<chrono::NaiveDateTime>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: row.id,
            title: row.title,
            content: row.content,
            tags: row.tags,
            cover_image: row.cover_image,
            thumb_num: row.thumb_num,
            favour_num: row.favour_num,
            view_num: row.view_num,
            user_id: row.user_id,
            priority: row.priority,
            is_delete: row.is_delete,
            create_time: row.create_time,
            update_time: row.update_time,
        }
    }
}

const SELECT_POST: &str = r#"
    SELECT
        id::int8 as id,
        title,
        content,
        tags,
        "coverImage" as cover_image,
        "thumbNum"::int4 as thumb_num,
        "favourNum"::int4 as favour_num,
        "viewNum"::int4 as view_num,
        "userId"::int8 as user_id,
        priority::int4 as priority,
        "isDelete"::int4 as is_delete,
        "createTime"::timestamp as create_time,
        "updateTime"::timestamp as update_time
    FROM post
"#;

#[async_trait::async_trait]
impl IPostRepository for PostgresConnection {
    async fn list_active_posts(&self) -> errors::Result<Vec<Post>> {
        let query = format!("{SELECT_POST} WHERE \"isDelete\" = 0 ORDER BY id");

        let rows: Vec<PostRow> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, Errors::DatabaseQueryError, "Failed to list posts"))?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn find_post_by_id(&self, id: i64) -> errors::Result<Option<Post>> {
        let query = format!("{SELECT_POST} WHERE id = $1");

        let row: Option<PostRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                map_sqlx_error(e, Errors::DatabaseQueryError, "Failed to find post by id")
            })?;

        Ok(row.map(Post::from))
    }
}
