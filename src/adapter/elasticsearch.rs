use reqwest::StatusCode;

use crate::{
    adapter::ISearchIndex,
    config::ElasticsearchConfig,
    errors::{self, Errors},
};

#[derive(Clone)]
pub struct ElasticsearchConnection {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchConnection {
    pub fn new(config: &ElasticsearchConfig) -> errors::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.get_timeout())
            .build()
            .map_err(|e| {
                Errors::IndexConnectionError(format!("Failed to build HTTP client: {e}"))
            })?;

        log::info!("Created Elasticsearch connection to {}", config.url);

        Ok(ElasticsearchConnection {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn document_url(&self, index: &str, id: &str) -> String {
        format!("{}/{index}/_doc/{id}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    pub async fn ping(&self) -> errors::Result<()> {
        let response = self
            .authorize(self.client.get(&self.base_url))
            .send()
            .await
            .map_err(|e| {
                Errors::IndexConnectionError(format!("Failed to ping Elasticsearch: {e}"))
            })?;

        if !response.status().is_success() {
            return Err(Errors::IndexConnectionError(format!(
                "Elasticsearch ping returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl ISearchIndex for ElasticsearchConnection {
    async fn upsert(
        &self,
        index: &str,
        id: &str,
        document: &serde_json::Value,
    ) -> errors::Result<()> {
        let response = self
            .authorize(self.client.put(self.document_url(index, id)))
            .json(document)
            .send()
            .await
            .map_err(|e| Errors::IndexWriteFailed(format!("Failed to index {index}/{id}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Errors::IndexWriteFailed(format!(
                "Indexing {index}/{id} returned {status}: {body}"
            )));
        }

        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> errors::Result<()> {
        let response = self
            .authorize(self.client.delete(self.document_url(index, id)))
            .send()
            .await
            .map_err(|e| Errors::IndexDeleteFailed(format!("Failed to delete {index}/{id}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            log::debug!("Document {index}/{id} was already absent");
            return Ok(());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Errors::IndexDeleteFailed(format!(
                "Deleting {index}/{id} returned {status}: {body}"
            )));
        }

        Ok(())
    }
}
