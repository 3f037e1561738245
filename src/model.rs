use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

/// Projection of a row of the `post` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    pub id: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    /// JSON array text, e.g. `["rust","cdc"]`.
    pub tags: Option<String>,
    pub cover_image: Option<String>,
    pub thumb_num: Option<i32>,
    pub favour_num: Option<i32>,
    pub view_num: Option<i32>,
    pub user_id: Option<i64>,
    pub priority: Option<i32>,
    pub is_delete: Option<i32>,
    pub create_time: Option<NaiveDateTime>,
    pub update_time: Option<NaiveDateTime>,
}

impl Post {
    pub fn is_deleted(&self) -> bool {
        self.is_delete == Some(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDocument {
    pub id: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Vec<String>,
    pub cover_image: Option<String>,
    pub thumb_num: Option<i32>,
    pub favour_num: Option<i32>,
    pub view_num: Option<i32>,
    pub user_id: Option<i64>,
    pub priority: Option<i32>,
    pub is_delete: Option<i32>,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl From<&Post> for PostDocument {
    fn from(post: &Post) -> Self {
        PostDocument {
            id: post.id,
            title: post.title.clone(),
            content: post.content.clone(),
            tags: parse_tags(post.tags.as_deref()),
            cover_image: post.cover_image.clone(),
            thumb_num: post.thumb_num,
            favour_num: post.favour_num,
            view_num: post.view_num,
            user_id: post.user_id,
            priority: post.priority,
            is_delete: post.is_delete,
            create_time: post.create_time.and_then(to_utc),
            update_time: post.update_time.and_then(to_utc),
        }
    }
}

impl PostDocument {
    pub fn document_id(&self) -> String {
        self.id.to_string()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn parse_tags(tags: Option<&str>) -> Vec<String> {
    let Some(tags) = tags.filter(|tags| !tags.trim().is_empty()) else {
        return Vec::new();
    };

    match serde_json::from_str::<Vec<String>>(tags) {
        Ok(tags) => tags,
        Err(error) => {
            log::warn!("Ignoring unparsable tags {tags:?}: {error}");
            Vec::new()
        }
    }
}

/// Source timestamps carry no zone; they are wall-clock time of this host.
pub fn to_utc(time: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&time)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
