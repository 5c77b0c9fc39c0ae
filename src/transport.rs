use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Config;
use crate::error::FetchError;
use crate::retry::RetryPolicy;

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

/// HTTP access to the origin.
///
/// Documents and page images go through separate clients because the origin
/// screens them differently: the image client presents the headers a browser
/// sends for `<img>` loads and keeps a cookie jar across requests. Both share
/// one request limiter, so the number of requests in flight stays bounded no
/// matter how many chapter and page tasks are running.
#[derive(Debug, Clone)]
pub struct Transport {
    documents: reqwest::Client,
    images: reqwest::Client,
    limiter: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut document_headers = browser_headers(config)?;
        document_headers.insert(
            ACCEPT,
            HeaderValue::from_str(&config.accept).context("invalid accept header")?,
        );
        let documents = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(document_headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build document http client")?;

        let mut image_headers = browser_headers(config)?;
        image_headers.insert(ACCEPT, HeaderValue::from_static(IMAGE_ACCEPT));
        image_headers.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("image"),
        );
        image_headers.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("no-cors"),
        );
        image_headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("cross-site"),
        );
        let images = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(image_headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build image http client")?;

        Ok(Self {
            documents,
            images,
            limiter: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            policy: config.unit_retry_policy(),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET through the document client under the default policy.
    pub async fn fetch(&self, url: &str, headers: &HeaderMap) -> Result<Vec<u8>, FetchError> {
        self.fetch_with(&self.policy, url, headers).await
    }

    pub async fn fetch_with(
        &self,
        policy: &RetryPolicy,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<Vec<u8>, FetchError> {
        policy.run(url, |_| self.fetch_once(url, headers)).await
    }

    pub async fn fetch_document(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_document_with(&self.policy, url).await
    }

    pub async fn fetch_document_with(
        &self,
        policy: &RetryPolicy,
        url: &str,
    ) -> Result<String, FetchError> {
        let body = self.fetch_with(policy, url, &HeaderMap::new()).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn fetch_once(&self, url: &str, headers: &HeaderMap) -> Result<Vec<u8>, FetchError> {
        let _permit = self.permit().await;
        let response = self
            .documents
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err))?;
        let response = check_status(url, response)?;
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err))?;
        if body.is_empty() {
            return Err(FetchError::EmptyPayload {
                url: url.to_string(),
            });
        }
        Ok(body.to_vec())
    }

    /// One image request, no retries. The caller owns the retry loop so the
    /// write to disk counts against the same attempt budget as the request.
    pub async fn send_image(&self, url: &str, referer: &str) -> Result<ImageResponse, FetchError> {
        let permit = self.permit().await;
        let mut request = self.images.get(url);
        if !referer.is_empty() {
            request = request.header(REFERER, referer);
        }
        let response = request
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(url, err))?;
        let response = check_status(url, response)?;
        Ok(ImageResponse {
            url: url.to_string(),
            response,
            _permit: permit,
        })
    }

    async fn permit(&self) -> OwnedSemaphorePermit {
        Arc::clone(&self.limiter)
            .acquire_owned()
            .await
            .expect("request limiter semaphore is closed")
    }
}

/// An image response whose body has not been read yet. Holds its request
/// permit until dropped.
pub struct ImageResponse {
    url: String,
    response: reqwest::Response,
    _permit: OwnedSemaphorePermit,
}

impl ImageResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub async fn chunk(&mut self) -> Result<Option<Bytes>, FetchError> {
        self.response
            .chunk()
            .await
            .map_err(|err| FetchError::from_reqwest(&self.url, err))
    }
}

fn browser_headers(config: &Config) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent).context("invalid user agent")?,
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&config.accept_language).context("invalid accept-language")?,
    );
    Ok(headers)
}

fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status,
        });
    }
    Ok(response)
}
