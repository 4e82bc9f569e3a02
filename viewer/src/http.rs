//! `CellSource` backed by the cell store's HTTP API.

use async_trait::async_trait;
use common::Cell;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use crate::fetcher::{CellSource, SourceError};

#[derive(Clone)]
pub struct HttpCellSource {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CapacityResponse {
    capacity: u64,
}

impl HttpCellSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T>(&self, request: RequestBuilder) -> Result<T, SourceError>
    where
        T: serde::de::DeserializeOwned,
    {
        let res = request.send().await?;

        if res.status().is_success() {
            Ok(res.json::<T>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(SourceError::UnexpectedStatus { status, body })
        }
    }
}

#[async_trait]
impl CellSource for HttpCellSource {
    async fn fetch_cells(&self, min_id: u64, max_id: u64) -> Result<Vec<Cell>, SourceError> {
        let url = format!("{}/api/cells", self.base_url);
        self.get_json(self.http.get(url).query(&[("min", min_id), ("max", max_id)]))
            .await
    }

    async fn fetch_capacity(&self) -> Result<u64, SourceError> {
        let url = format!("{}/api/capacity", self.base_url);
        let body: CapacityResponse = self.get_json(self.http.get(url)).await?;
        Ok(body.capacity)
    }

    async fn fetch_owned(&self, owner: &str) -> Result<Vec<Cell>, SourceError> {
        let url = format!("{}/api/cells", self.base_url);
        self.get_json(self.http.get(url).query(&[("owner", owner)]))
            .await
    }
}
