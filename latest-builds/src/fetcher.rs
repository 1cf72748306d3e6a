use bytes::Bytes;
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),
    #[error("empty response body")]
    EmptyBody,
}

/// Downloads the builds spreadsheet export from a fixed URL.
pub struct Fetcher {
    client: reqwest::Client,
    url: Url,
}

impl Fetcher {
    pub fn new(url: Url, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Fetcher {
            client: builder.build()?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the body on `200 OK`. Every other status is an error, and so
    /// is a body holding nothing but whitespace. There are no retries.
    pub async fn fetch(&self) -> Result<Bytes, FetchError> {
        let response = self.client.get(self.url.clone()).send().await?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::UnexpectedStatus(response.status()));
        }

        let body = response.bytes().await?;
        if body.trim_ascii().is_empty() {
            return Err(FetchError::EmptyBody);
        }
        tracing::info!(url = %self.url, bytes = body.len(), "fetched builds csv");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer) -> Fetcher {
        let url = Url::parse(&format!("{}/export.csv", server.uri())).unwrap();
        Fetcher::new(url, Some(Duration::from_secs(5))).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/export.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("SQLServer,Version\n"))
            .mount(&mock_server)
            .await;

        let body = fetcher(&mock_server).fetch().await.unwrap();
        assert_eq!(&body[..], b"SQLServer,Version\n");
    }

    #[tokio::test]
    async fn test_fetch_non_200_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/export.csv"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let err = fetcher(&mock_server).fetch().await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::UnexpectedStatus(StatusCode::NO_CONTENT)
        ));
    }

    #[tokio::test]
    async fn test_fetch_empty_body_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/export.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string(" \r\n"))
            .mount(&mock_server)
            .await;

        let err = fetcher(&mock_server).fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::EmptyBody));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let url = Url::parse("http://127.0.0.1:1/export.csv").unwrap();
        let fetcher = Fetcher::new(url, Some(Duration::from_secs(1))).unwrap();
        assert!(matches!(
            fetcher.fetch().await,
            Err(FetchError::ReqwestError(_))
        ));
    }
}
