use std::{collections::HashMap, str::FromStr, sync::Arc};

use chrono::{DateTime, Local, NaiveDateTime};

use crate::{
    adapter::{IPostRepository, ISearchIndex},
    errors::{self, Errors},
    model::{Post, PostDocument},
    sync::{
        Column, EventType, RowData,
        handler::{ITableHandler, WriteCounter},
    },
};

pub const POST_TABLE: &str = "post";

pub struct PostTableHandler {
    index: Arc<dyn ISearchIndex>,
    repository: Arc<dyn IPostRepository>,
    index_name: String,
}

impl PostTableHandler {
    pub fn new(
        index: Arc<dyn ISearchIndex>,
        repository: Arc<dyn IPostRepository>,
        index_name: &str,
    ) -> Self {
        PostTableHandler {
            index,
            repository,
            index_name: index_name.to_string(),
        }
    }

    async fn apply_row(&self, event_type: EventType, row: &RowData) -> errors::Result<Applied> {
        match event_type {
            EventType::Insert => {
                let post = parse_post(&row.after_columns)?;
                upsert_post(self.index.as_ref(), &self.index_name, &post).await?;
                log::debug!("Post {} inserted into index", post.id);
                Ok(Applied::Upserted)
            }
            EventType::Update => {
                let post = parse_post(&row.after_columns)?;
                if post.is_deleted() {
                    delete_post(self.index.as_ref(), &self.index_name, post.id).await?;
                    log::debug!("Post {} soft-deleted, removed from index", post.id);
                    Ok(Applied::Deleted)
                } else {
                    upsert_post(self.index.as_ref(), &self.index_name, &post).await?;
                    log::debug!("Post {} updated in index", post.id);
                    Ok(Applied::Upserted)
                }
            }
            EventType::Delete => {
                let post = parse_post(&row.before_columns)?;
                delete_post(self.index.as_ref(), &self.index_name, post.id).await?;
                log::debug!("Post {} deleted, removed from index", post.id);
                Ok(Applied::Deleted)
            }
        }
    }
}

enum Applied {
    Upserted,
    Deleted,
}

#[async_trait::async_trait]
impl ITableHandler for PostTableHandler {
    fn table_name(&self) -> &str {
        POST_TABLE
    }

    async fn check_target_exists(&self, id: i64) -> errors::Result<bool> {
        let post = self.repository.find_post_by_id(id).await?;
        Ok(post.is_some_and(|post| !post.is_deleted()))
    }

    async fn handle_data_change(
        &self,
        schema_name: &str,
        table_name: &str,
        event_type: EventType,
        rows: &[RowData],
    ) -> WriteCounter {
        let mut counter = WriteCounter::default();

        log::debug!(
            "Handling {event_type:?} on {schema_name}.{table_name}, {} row(s)",
            rows.len()
        );

        for row in rows {
            match self.apply_row(event_type, row).await {
                Ok(Applied::Upserted) => counter.upserted += 1,
                Ok(Applied::Deleted) => counter.deleted += 1,
                Err(error @ Errors::RowParseError(_)) => {
                    log::error!(
                        "Discarding {event_type:?} row on {schema_name}.{table_name}: {error}"
                    );
                    counter.skipped += 1;
                }
                Err(error) => {
                    log::error!(
                        "Failed to apply {event_type:?} row on {schema_name}.{table_name}: {error}"
                    );
                    counter.failed += 1;
                }
            }
        }

        counter
    }
}

/// Record to document transform shared by the live stream and resyncs.
pub async fn upsert_post(
    index: &dyn ISearchIndex,
    index_name: &str,
    post: &Post,
) -> errors::Result<()> {
    let document = PostDocument::from(post);
    index
        .upsert(index_name, &document.document_id(), &document.to_json())
        .await
}

pub async fn delete_post(
    index: &dyn ISearchIndex,
    index_name: &str,
    id: i64,
) -> errors::Result<()> {
    index.delete(index_name, &id.to_string()).await
}

/// Only `id` is mandatory. Any other column that is absent or does not
/// parse is left empty.
pub fn parse_post(columns: &[Column]) -> errors::Result<Post> {
    if columns.is_empty() {
        return Err(Errors::RowParseError("row has no column data".to_string()));
    }

    let column_map: HashMap<&str, &str> = columns
        .iter()
        .filter_map(|column| Some((column.name.as_str(), column.value.as_deref()?)))
        .collect();

    let id = column_map
        .get("id")
        .ok_or_else(|| Errors::RowParseError("missing id column".to_string()))?;
    let id = id
        .trim()
        .parse::<i64>()
        .map_err(|e| Errors::RowParseError(format!("invalid id {id:?}: {e}")))?;

    let text = |name: &str| column_map.get(name).map(|value| value.to_string());

    Ok(Post {
        id,
        title: text("title"),
        content: text("content"),
        tags: text("tags"),
        cover_image: text("coverImage"),
        thumb_num: parse_number(&column_map, "thumbNum"),
        favour_num: parse_number(&column_map, "favourNum"),
        view_num: parse_number(&column_map, "viewNum"),
        user_id: parse_number(&column_map, "userId"),
        priority: parse_number(&column_map, "priority"),
        is_delete: parse_flag(&column_map, "isDelete"),
        create_time: parse_timestamp(&column_map, "createTime"),
        update_time: parse_timestamp(&column_map, "updateTime"),
    })
}

fn parse_number<T: FromStr>(column_map: &HashMap<&str, &str>, name: &str) -> Option<T> {
    let value = column_map.get(name)?;
    let parsed = value.trim().parse::<T>().ok();
    if parsed.is_none() {
        log::warn!("Ignoring unparsable {name} value {value:?}");
    }
    parsed
}

/// Accepts numeric and boolean renderings of the soft-delete flag.
fn parse_flag(column_map: &HashMap<&str, &str>, name: &str) -> Option<i32> {
    match column_map.get(name)?.trim() {
        "true" | "t" => Some(1),
        "false" | "f" => Some(0),
        _ => parse_number(column_map, name),
    }
}

fn parse_timestamp(column_map: &HashMap<&str, &str>, name: &str) -> Option<NaiveDateTime> {
    let value = column_map.get(name)?;
    let parsed = parse_datetime(value.trim());
    if parsed.is_none() {
        log::warn!("Ignoring unparsable {name} value {value:?}");
    }
    parsed
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    const LOCAL_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
    const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

    if let Some(time) = LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    {
        return Some(time);
    }

    OFFSET_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(text, format).ok())
        .map(|time| time.with_timezone(&Local).naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryIndex, MemoryRepository, post_columns};

    fn handler(index: &Arc<MemoryIndex>, repository: Arc<MemoryRepository>) -> PostTableHandler {
        PostTableHandler::new(index.clone(), repository, "post")
    }

    fn insert(columns: Vec<Column>) -> RowData {
        RowData {
            before_columns: Vec::new(),
            after_columns: columns,
        }
    }

    #[test]
    fn parse_post_reads_every_field() {
        let post = parse_post(&post_columns(
            5,
            "hello",
            &[
                ("content", Some("body")),
                ("tags", Some(r#"["a"]"#)),
                ("coverImage", Some("c.png")),
                ("thumbNum", Some("3")),
                ("favourNum", Some("4")),
                ("viewNum", Some("10")),
                ("userId", Some("99")),
                ("priority", Some("1")),
                ("isDelete", Some("0")),
                ("createTime", Some("2024-05-01 10:20:30")),
                ("updateTime", Some("2024-05-02 11:00:00.5")),
            ],
        ))
        .unwrap();

        assert_eq!(post.id, 5);
        assert_eq!(post.title.as_deref(), Some("hello"));
        assert_eq!(post.cover_image.as_deref(), Some("c.png"));
        assert_eq!(post.thumb_num, Some(3));
        assert_eq!(post.user_id, Some(99));
        assert_eq!(post.is_delete, Some(0));
        assert_eq!(
            post.create_time,
            NaiveDateTime::parse_from_str("2024-05-01 10:20:30", "%Y-%m-%d %H:%M:%S").ok()
        );
        assert!(post.update_time.is_some());
    }

    #[test]
    fn malformed_fields_are_left_empty() {
        let post = parse_post(&post_columns(
            5,
            "hello",
            &[
                ("thumbNum", Some("many")),
                ("userId", None),
                ("createTime", Some("yesterday")),
                ("isDelete", Some("true")),
            ],
        ))
        .unwrap();

        assert_eq!(post.thumb_num, None);
        assert_eq!(post.user_id, None);
        assert_eq!(post.create_time, None);
        assert!(post.is_deleted());
    }

    #[test]
    fn malformed_or_missing_id_rejects_the_row() {
        assert!(matches!(
            parse_post(&[Column::new("id", Some("abc"))]),
            Err(Errors::RowParseError(_))
        ));
        assert!(matches!(
            parse_post(&[Column::new("title", Some("x"))]),
            Err(Errors::RowParseError(_))
        ));
        assert!(matches!(parse_post(&[]), Err(Errors::RowParseError(_))));
    }

    #[test]
    fn timestamps_with_offset_are_accepted() {
        assert!(parse_datetime("2024-05-01 10:20:30.123+09").is_some());
        assert!(parse_datetime("2024-05-01T10:20:30+00:00").is_some());
        assert!(parse_datetime("05/01/2024").is_none());
    }

    #[tokio::test]
    async fn insert_upserts_document() {
        let index = Arc::new(MemoryIndex::default());
        let handler = handler(&index, Arc::new(MemoryRepository::default()));

        let counter = handler
            .handle_data_change(
                "public",
                "post",
                EventType::Insert,
                &[insert(post_columns(1, "A", &[]))],
            )
            .await;

        assert_eq!(counter.upserted, 1);
        assert_eq!(index.document("post", "1").unwrap()["title"], "A");
    }

    #[tokio::test]
    async fn applying_the_same_event_twice_is_idempotent() {
        let index = Arc::new(MemoryIndex::default());
        let handler = handler(&index, Arc::new(MemoryRepository::default()));
        let rows = [insert(post_columns(1, "A", &[("thumbNum", Some("2"))]))];

        handler
            .handle_data_change("public", "post", EventType::Update, &rows)
            .await;
        let once = index.document("post", "1");
        handler
            .handle_data_change("public", "post", EventType::Update, &rows)
            .await;

        assert_eq!(index.document("post", "1"), once);
        assert_eq!(index.len("post"), 1);
    }

    #[tokio::test]
    async fn soft_delete_update_removes_document() {
        let index = Arc::new(MemoryIndex::default());
        let handler = handler(&index, Arc::new(MemoryRepository::default()));

        handler
            .handle_data_change(
                "public",
                "post",
                EventType::Insert,
                &[insert(post_columns(1, "A", &[]))],
            )
            .await;
        let counter = handler
            .handle_data_change(
                "public",
                "post",
                EventType::Update,
                &[insert(post_columns(1, "A", &[("isDelete", Some("1"))]))],
            )
            .await;

        assert_eq!(counter.deleted, 1);
        assert_eq!(counter.upserted, 0);
        assert!(index.document("post", "1").is_none());
        assert_eq!(index.deletes(), vec!["post/1".to_string()]);
    }

    #[tokio::test]
    async fn delete_uses_before_image_id() {
        let index = Arc::new(MemoryIndex::default());
        let handler = handler(&index, Arc::new(MemoryRepository::default()));

        handler
            .handle_data_change(
                "public",
                "post",
                EventType::Insert,
                &[insert(post_columns(4, "A", &[]))],
            )
            .await;
        let counter = handler
            .handle_data_change(
                "public",
                "post",
                EventType::Delete,
                &[RowData {
                    before_columns: vec![Column::new("id", Some("4"))],
                    after_columns: Vec::new(),
                }],
            )
            .await;

        assert_eq!(counter.deleted, 1);
        assert!(index.document("post", "4").is_none());
    }

    #[tokio::test]
    async fn row_failures_do_not_stop_the_remaining_rows() {
        let index = Arc::new(MemoryIndex::default());
        index.fail_on("2");
        let handler = handler(&index, Arc::new(MemoryRepository::default()));

        let counter = handler
            .handle_data_change(
                "public",
                "post",
                EventType::Insert,
                &[
                    insert(vec![Column::new("id", Some("x"))]),
                    insert(post_columns(2, "B", &[])),
                    insert(post_columns(3, "C", &[])),
                ],
            )
            .await;

        assert_eq!(
            counter,
            WriteCounter {
                upserted: 1,
                deleted: 0,
                skipped: 1,
                failed: 1,
            }
        );
        assert!(index.document("post", "3").is_some());
    }

    #[tokio::test]
    async fn check_target_exists_ignores_soft_deleted_rows() {
        let repository = Arc::new(MemoryRepository::default());
        repository.insert(Post {
            id: 1,
            is_delete: Some(0),
            ..Default::default()
        });
        repository.insert(Post {
            id: 2,
            is_delete: Some(1),
            ..Default::default()
        });
        let index = Arc::new(MemoryIndex::default());
        let handler = handler(&index, repository);

        assert!(handler.check_target_exists(1).await.unwrap());
        assert!(!handler.check_target_exists(2).await.unwrap());
        assert!(!handler.check_target_exists(3).await.unwrap());
    }
}
