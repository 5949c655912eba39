//! CMS page-publishing client
//!
//! Thin wrapper over the content-management system's REST API (WordPress
//! shape: POST pages, Bearer auth). All retry semantics for generation live
//! upstream; a publish failure fails the task.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct PageRequest<'a> {
    title: &'a str,
    slug: &'a str,
    content: &'a str,
    status: &'a str,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    id: u64,
    link: String,
}

/// A page that exists in the CMS.
#[derive(Debug, Clone)]
pub struct PublishedPage {
    pub id: u64,
    pub url: String,
}

/// Client for the CMS publish endpoint.
#[derive(Clone)]
pub struct CmsClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<Secret<String>>,
}

impl CmsClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<Secret<String>>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token,
        }
    }

    /// Publish a page and return its CMS id and public URL.
    pub async fn publish_page(&self, title: &str, slug: &str, html: &str) -> Result<PublishedPage> {
        let url = format!(
            "{}/wp-json/wp/v2/pages",
            self.base_url.trim_end_matches('/')
        );
        let request = PageRequest {
            title,
            slug,
            content: html,
            status: "publish",
        };

        let mut builder = self.http.post(url).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Publish(format!("CMS returned {status}: {body}")));
        }

        let page: PageResponse = response
            .json()
            .await
            .map_err(|e| Error::Publish(format!("invalid CMS response: {e}")))?;

        info!(page_id = page.id, url = %page.link, "page published");
        Ok(PublishedPage {
            id: page.id,
            url: page.link,
        })
    }
}
