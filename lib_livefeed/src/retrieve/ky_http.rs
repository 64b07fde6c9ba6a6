//! # HTTP Retrieval Utilities
//!
//! An asynchronous client around `reqwest` with retry middleware. Responses are
//! returned as text together with status and headers, since the pages the resolver
//! reads are HTML and the interesting data sits in `set-cookie` headers.

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

/// A response body with the metadata of its HTTP transaction.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The body, when the status was a success.
    pub data: Option<T>,
    /// The raw body returned alongside a failure status.
    pub error_body: Option<String>,
    pub status: u16,
    /// Whether the status code was in the 2xx range.
    pub success: bool,
    pub headers: HeaderMap,
}

/// HTTP client bound to a base URL, retrying transient failures up to three times.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    user_agent: HeaderValue,
}

impl ApiClient {
    /// # Errors
    /// Fails when `base_url` is not an absolute URL or `user_agent` is not a valid
    /// header value.
    pub fn new(base_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        let user_agent = HeaderValue::from_str(user_agent)?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let inner = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            base_url,
            user_agent,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request against `path` (joined onto the base URL) and reads the body
    /// as text.
    pub async fn request_text(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
    ) -> anyhow::Result<ApiResponse<String>> {
        let full_url = self.base_url.join(path)?;
        let mut req = self
            .inner
            .request(method, full_url)
            .header(USER_AGENT, self.user_agent.clone());
        if let Some(h) = headers {
            req = req.headers(h);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let success = status.is_success();
        let body = response.text().await?;
        let (data, error_body) = if success {
            (Some(body), None)
        } else {
            (None, Some(body))
        };

        Ok(ApiResponse {
            data,
            error_body,
            status: status.as_u16(),
            success,
            headers: resp_headers,
        })
    }

    pub async fn get_text(
        &self,
        path: &str,
        headers: Option<HeaderMap>,
    ) -> anyhow::Result<ApiResponse<String>> {
        self.request_text(Method::GET, path, headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_base_url() {
        assert!(ApiClient::new("live.douyin.com", "ua").is_err());
    }

    #[test]
    fn rejects_invalid_user_agent() {
        assert!(ApiClient::new("https://live.douyin.com/", "bad\nagent").is_err());
    }

    #[test]
    fn joins_paths_onto_base() {
        let client = ApiClient::new("https://live.douyin.com/", "ua").unwrap();
        assert_eq!(
            client.base_url().join("261378947940").unwrap().as_str(),
            "https://live.douyin.com/261378947940"
        );
    }
}
