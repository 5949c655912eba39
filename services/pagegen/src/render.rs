//! Landing-page HTML assembly
//!
//! Builds the published page from generated copy and fetched products. The
//! article and FAQ bodies come from the model as HTML fragments and are
//! embedded as-is; everything sourced from user input or the commerce
//! backend is escaped.

use crate::products::Product;

/// Generated copy for one landing page.
#[derive(Debug, Clone)]
pub struct PageCopy {
    pub title: String,
    /// Article body as an HTML fragment.
    pub article: String,
    /// FAQ section as an HTML fragment.
    pub faq: String,
}

/// Assemble the full page HTML.
pub fn render_page(copy: &PageCopy, products: &[Product]) -> String {
    let mut html = String::with_capacity(copy.article.len() + copy.faq.len() + 1024);

    html.push_str("<article class=\"landing\">\n");
    html.push_str(&format!("<h1>{}</h1>\n", escape(&copy.title)));
    html.push_str("<section class=\"content\">\n");
    html.push_str(&copy.article);
    html.push_str("\n</section>\n");

    if !products.is_empty() {
        html.push_str("<section class=\"products\">\n<h2>Related products</h2>\n<ul>\n");
        for product in products {
            html.push_str("<li>");
            if let Some(image) = &product.image_url {
                html.push_str(&format!(
                    "<img src=\"{}\" alt=\"{}\">",
                    escape(image),
                    escape(&product.name)
                ));
            }
            html.push_str(&format!(
                "<a href=\"{}\">{}</a> <span class=\"price\">{}</span>",
                escape(&product.url),
                escape(&product.name),
                escape(&product.price)
            ));
            html.push_str("</li>\n");
        }
        html.push_str("</ul>\n</section>\n");
    }

    html.push_str("<section class=\"faq\">\n<h2>FAQ</h2>\n");
    html.push_str(&copy.faq);
    html.push_str("\n</section>\n</article>\n");
    html
}

/// URL slug from a keyword: lowercase alphanumeric runs joined by hyphens.
pub fn slugify(keyword: &str) -> String {
    let mut slug = String::with_capacity(keyword.len());
    let mut pending_hyphen = false;
    for c in keyword.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

/// Minimal HTML escaping for text interpolated into the page.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
