use crate::models::DocumentStatus;
use crate::traits::DocumentCallbacks;
use crate::IngestError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use url::Url;

/// HTTP client for the document service's internal callback routes.
pub struct DocumentApiClient {
    base_url: Url,
    api_token: Option<String>,
    client: Client,
}

impl DocumentApiClient {
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self, IngestError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            api_token: api_token.filter(|token| !token.trim().is_empty()),
            client: Client::new(),
        })
    }

    fn route(&self, document_id: &str, leaf: &str) -> Result<Url, IngestError> {
        let mut url = self.base_url.join("internal/documents/")?;
        url.path_segments_mut()
            .map_err(|_| {
                IngestError::InvalidArgument(format!("{} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .push(document_id)
            .push(leaf);
        Ok(url)
    }

    async fn patch(&self, url: Url, body: serde_json::Value) -> Result<(), IngestError> {
        let mut request = self.client.patch(url.clone()).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::Callback(format!(
                "PATCH {url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentCallbacks for DocumentApiClient {
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), IngestError> {
        let url = self.route(document_id, "status")?;
        self.patch(url, json!({ "status": status })).await
    }

    async fn update_extracted_text(
        &self,
        document_id: &str,
        extracted_text: &str,
    ) -> Result<(), IngestError> {
        let url = self.route(document_id, "extracted-text")?;
        self.patch(url, json!({ "extracted_text": extracted_text }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_are_built_under_the_base_path() -> Result<(), IngestError> {
        let client = DocumentApiClient::new("http://api.local:3000/v1", None)?;
        assert_eq!(
            client.route("doc-42", "status")?.as_str(),
            "http://api.local:3000/v1/internal/documents/doc-42/status"
        );
        assert_eq!(
            client.route("doc-42", "extracted-text")?.as_str(),
            "http://api.local:3000/v1/internal/documents/doc-42/extracted-text"
        );
        Ok(())
    }

    #[test]
    fn document_ids_are_escaped() -> Result<(), IngestError> {
        let client = DocumentApiClient::new("http://api.local", Some(" ".to_string()))?;
        assert!(client.api_token.is_none());
        assert_eq!(
            client.route("a/b c", "status")?.as_str(),
            "http://api.local/internal/documents/a%2Fb%20c/status"
        );
        Ok(())
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            DocumentApiClient::new("not a url", None),
            Err(IngestError::Url(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_service_surfaces_http_error() -> Result<(), IngestError> {
        let client = DocumentApiClient::new("http://127.0.0.1:9", None)?;
        let result = client.update_status("doc-1", DocumentStatus::Ready).await;
        assert!(matches!(result, Err(IngestError::Http(_))));
        Ok(())
    }
}
