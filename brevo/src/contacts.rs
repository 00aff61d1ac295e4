use crate::error::BrevoError;
use crate::fetcher::REQUEST_TIMEOUT;
use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

/// Client for the contact endpoints of the Brevo v3 API.
pub struct ContactsClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

/// Body of `POST /v3/contacts`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContact {
    pub email: String,
    pub attributes: Map<String, Value>,
    pub update_enabled: bool,
    pub list_ids: Vec<i64>,
}

/// Body of `POST /v3/contacts/doubleOptinConfirmation`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoubleOptinContact {
    pub email: String,
    pub attributes: Map<String, Value>,
    pub include_list_ids: Vec<i64>,
    pub template_id: i64,
    pub redirection_url: String,
}

impl ContactsClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        ContactsClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create or update a contact.
    pub async fn upsert(&self, contact: &CreateContact) -> Result<(), BrevoError> {
        if self.api_key.is_empty() {
            return Err(BrevoError::MissingCredential);
        }

        let url = format!("{}/v3/contacts", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("accept", "application/json")
            .header("api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(contact)
            .send()
            .await?;

        Self::check(response).await
    }

    /// Subscribe a contact through the double opt-in confirmation flow.
    pub async fn double_optin(&self, contact: &DoubleOptinContact) -> Result<(), BrevoError> {
        if self.api_key.is_empty() {
            return Err(BrevoError::MissingCredential);
        }

        let url = format!("{}/v3/contacts/doubleOptinConfirmation", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("accept", "application/json")
            .header("api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(contact)
            .send()
            .await?;

        Self::check(response).await
    }

    /// Whether a contact with this email already exists upstream.
    pub async fn exists(&self, email: &str) -> Result<bool, BrevoError> {
        if self.api_key.is_empty() {
            return Err(BrevoError::MissingCredential);
        }

        let url = format!("{}/v3/contacts/{}", self.base_url, urlencoding::encode(email));
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BrevoError::Upstream {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Delete (unsubscribe) a contact.
    pub async fn delete(&self, email: &str) -> Result<(), BrevoError> {
        if self.api_key.is_empty() {
            return Err(BrevoError::MissingCredential);
        }

        let url = format!("{}/v3/contacts/{}", self.base_url, urlencoding::encode(email));
        let response = self
            .client
            .delete(&url)
            .header("accept", "application/json")
            .header("api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::check(response).await
    }

    async fn check(response: reqwest::Response) -> Result<(), BrevoError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(BrevoError::Upstream {
                status: status.as_u16(),
                body,
            })
        }
    }
}
