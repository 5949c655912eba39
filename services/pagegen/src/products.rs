//! Related-product fetch client
//!
//! Thin wrapper over the commerce backend's search endpoint. Product data
//! decorates the page but is never load-bearing: callers degrade to an
//! empty product section when this fails.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub price: String,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Client for the commerce backend.
#[derive(Debug, Clone)]
pub struct ProductClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProductClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Fetch up to `limit` products matching the keyword.
    pub async fn fetch_related(&self, keyword: &str, limit: usize) -> Result<Vec<Product>> {
        let url = format!("{}/api/products", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(url)
            .query(&[("search", keyword), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| Error::Products(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Products(format!(
                "product backend returned {status}"
            )));
        }

        let mut products: Vec<Product> = response
            .json()
            .await
            .map_err(|e| Error::Products(format!("invalid product response: {e}")))?;
        products.truncate(limit);
        debug!(keyword, count = products.len(), "fetched related products");
        Ok(products)
    }
}
