use crate::error::BrevoError;
use crate::types::{RawAttribute, normalize_name};
use http::StatusCode;
use indexmap::IndexMap;
use std::time::Duration;

/// Page size used by [`AttributeFetcher::fetch_all`] and the upper bound
/// the listing endpoint accepts for `limit`.
pub const PAGE_SIZE: usize = 100;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(serde::Deserialize)]
struct AttributesResponse {
    attributes: Vec<RawAttribute>,
}

/// Fetches contact attribute definitions from the Brevo listing endpoint.
pub struct AttributeFetcher {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AttributeFetcher {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        AttributeFetcher {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Issue one listing call. `limit` is clamped into `[1, PAGE_SIZE]`.
    pub async fn fetch_page(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RawAttribute>, BrevoError> {
        if self.api_key.is_empty() {
            return Err(BrevoError::MissingCredential);
        }

        let limit = limit.clamp(1, PAGE_SIZE);
        let url = format!("{}/v3/contacts/attributes", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit), ("offset", offset)])
            .header("accept", "application/json")
            .header("api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(BrevoError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<AttributesResponse>()
            .await
            .map_err(|_| BrevoError::MalformedResponse)?;

        Ok(body.attributes)
    }

    /// Fetch every attribute, paging until a short page. `max_items`
    /// stops early once that many records were fetched (0 = unbounded).
    ///
    /// The result is keyed by normalized name; a later page wins on a
    /// duplicate name, although the API promises names are unique.
    pub async fn fetch_all(
        &self,
        max_items: usize,
    ) -> Result<IndexMap<String, RawAttribute>, BrevoError> {
        let mut merged = IndexMap::new();
        let mut offset = 0;
        let mut fetched = 0;

        loop {
            let page = self.fetch_page(PAGE_SIZE, offset).await?;
            let batch = page.len();

            for attribute in page {
                merged.insert(normalize_name(&attribute.name), attribute);
            }

            fetched += batch;
            offset += PAGE_SIZE;

            if max_items > 0 && fetched >= max_items {
                break;
            }
            if batch < PAGE_SIZE {
                break;
            }
        }

        tracing::debug!(count = merged.len(), "fetched attribute pages");
        Ok(merged)
    }
}
