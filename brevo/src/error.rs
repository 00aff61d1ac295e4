#[derive(thiserror::Error, Debug)]
pub enum BrevoError {
    #[error("API key is required")]
    MissingCredential,

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("API response is missing the expected payload")]
    MalformedResponse,
}
