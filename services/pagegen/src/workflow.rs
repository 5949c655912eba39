//! Page-generation pipeline
//!
//! One task = one keyword: generate title, article, and FAQ copy through the
//! key-pool orchestrator, fetch related products (best effort), assemble the
//! HTML, publish to the CMS, and append to history. Progress and retry/wait
//! reasons stream into the task store so the frontend can show them; pause
//! gates sit between the provider calls.

use std::sync::Arc;
use std::time::Instant;

use genai_client::GenAiClient;
use genai_pool::{Orchestrator, RunOptions, StatusCallback};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::history::{History, HistoryEntry};
use crate::metrics;
use crate::products::ProductClient;
use crate::publish::{CmsClient, PublishedPage};
use crate::render::{PageCopy, render_page, slugify};
use crate::tasks::TaskStore;

/// Everything a generation task needs, shared behind `Arc`.
pub struct PageGenerator {
    orchestrator: Arc<Orchestrator>,
    client: GenAiClient,
    products: ProductClient,
    cms: CmsClient,
    tasks: Arc<TaskStore>,
    history: Arc<History>,
    product_limit: usize,
}

impl PageGenerator {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        client: GenAiClient,
        products: ProductClient,
        cms: CmsClient,
        tasks: Arc<TaskStore>,
        history: Arc<History>,
        product_limit: usize,
    ) -> Self {
        Self {
            orchestrator,
            client,
            products,
            cms,
            tasks,
            history,
            product_limit,
        }
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    /// Run one task to completion, recording the outcome in the task store
    /// and metrics. Never panics the worker: every failure lands in the
    /// task record.
    pub async fn generate_page(self: Arc<Self>, task_id: Uuid, keyword: String) {
        let started = Instant::now();
        match self.run_pipeline(&task_id, &keyword).await {
            Ok(page) => {
                info!(task_id = %task_id, keyword, url = %page.url, "page generated");
                self.tasks.complete(&task_id, &page.url);
                metrics::record_page("ok", started.elapsed().as_secs_f64());
            }
            Err(e) => {
                warn!(task_id = %task_id, keyword, error = %e, "page generation failed");
                self.tasks.fail(&task_id, &e.to_string());
                metrics::record_page("failed", started.elapsed().as_secs_f64());
            }
        }
    }

    async fn run_pipeline(&self, task_id: &Uuid, keyword: &str) -> Result<PublishedPage> {
        self.tasks.set_running(task_id);
        let on_status = self.status_callback(*task_id);

        self.tasks.set_detail(task_id, "generating title");
        let title = self
            .generate_copy(title_prompt(keyword), &on_status)
            .await?;
        let title = title.trim().trim_matches('"').to_string();
        self.tasks.wait_if_paused(task_id).await;

        self.tasks.set_detail(task_id, "generating article");
        let article = self
            .generate_copy(article_prompt(keyword, &title), &on_status)
            .await?;
        self.tasks.wait_if_paused(task_id).await;

        self.tasks.set_detail(task_id, "generating FAQ");
        let faq = self.generate_copy(faq_prompt(keyword), &on_status).await?;
        self.tasks.wait_if_paused(task_id).await;

        self.tasks.set_detail(task_id, "fetching related products");
        let products = match self
            .products
            .fetch_related(keyword, self.product_limit)
            .await
        {
            Ok(products) => products,
            Err(e) => {
                // Products decorate the page; a backend hiccup must not
                // sink the whole task.
                warn!(task_id = %task_id, error = %e, "product fetch failed, publishing without products");
                Vec::new()
            }
        };
        self.tasks.wait_if_paused(task_id).await;

        let copy = PageCopy {
            title: title.clone(),
            article,
            faq,
        };
        let html = render_page(&copy, &products);

        self.tasks.set_detail(task_id, "publishing to CMS");
        let slug = match slugify(keyword) {
            s if s.is_empty() => "landing-page".to_string(),
            s => s,
        };
        let page = self.cms.publish_page(&title, &slug, &html).await?;

        if let Err(e) = self
            .history
            .append(HistoryEntry {
                keyword: keyword.to_string(),
                title,
                page_url: page.url.clone(),
                completed_at: chrono::Utc::now(),
            })
            .await
        {
            // The page is live; a history write failure is log-only.
            warn!(task_id = %task_id, error = %e, "failed to append history entry");
        }

        Ok(page)
    }

    /// One provider call through the orchestrator.
    async fn generate_copy(&self, prompt: String, on_status: &StatusCallback) -> Result<String> {
        let client = self.client.clone();
        let result = self
            .orchestrator
            .run(
                move |key| {
                    let client = client.clone();
                    let prompt = prompt.clone();
                    async move { client.generate(key.expose(), &prompt).await }
                },
                RunOptions {
                    on_status: Some(on_status.clone()),
                    ..RunOptions::default()
                },
            )
            .await;

        match &result {
            Ok(_) => metrics::record_provider_call("ok"),
            Err(_) => metrics::record_provider_call("failed"),
        }
        result.map_err(Error::Generation)
    }

    /// Callback streaming orchestrator progress lines into the task record.
    fn status_callback(&self, task_id: Uuid) -> StatusCallback {
        let tasks = self.tasks.clone();
        Arc::new(move |message: &str| {
            tasks.set_detail(&task_id, message);
        })
    }
}

fn title_prompt(keyword: &str) -> String {
    format!(
        "Write a compelling landing-page headline for the topic \"{keyword}\". \
         Return only the headline text, no quotes, under 70 characters."
    )
}

fn article_prompt(keyword: &str, title: &str) -> String {
    format!(
        "Write a marketing landing-page article for the topic \"{keyword}\" \
         under the headline \"{title}\". Use HTML paragraphs and h2 \
         subheadings, 400-600 words, no <html> or <body> wrapper."
    )
}

fn faq_prompt(keyword: &str) -> String {
    format!(
        "Write 4 frequently asked questions with answers about \"{keyword}\". \
         Format each as an <h3> question followed by a <p> answer. Return \
         only the HTML fragment."
    )
}
