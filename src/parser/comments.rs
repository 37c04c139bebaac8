use scraper::{ElementRef, Html};
use tracing::debug;
use url::Url;

use super::dialect::Dialect;
use crate::db::LinkRow;
use crate::settings::item_url;

/// Extract links from top-level comments using the given markup dialect.
pub fn extract_with(dialect: &Dialect, html: &str, base_url: &str) -> Vec<LinkRow> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let mut rows = Vec::new();
    let mut seen_rows = 0usize;
    let mut top_level = 0usize;

    for row in document.select(&dialect.comment_row) {
        seen_rows += 1;
        if !is_top_level(dialect, row) {
            continue;
        }
        top_level += 1;

        let comment_url = row
            .value()
            .id()
            .filter(|id| !id.is_empty())
            .map(|id| item_url(base_url, id))
            .unwrap_or_default();

        let author = row
            .select(&dialect.author)
            .next()
            .map(|a| a.text().collect::<String>())
            .unwrap_or_else(|| dialect.unknown_author.to_string());

        let Some(body) = row.select(&dialect.body).next() else {
            continue;
        };

        for anchor in body.select(&dialect.anchor) {
            let href = anchor.value().attr("href").unwrap_or_default();
            if let Some(link) = normalize_href(dialect, href, base_url, base.as_ref()) {
                rows.push(LinkRow {
                    author: author.clone(),
                    comment_url: comment_url.clone(),
                    extracted_link: link,
                });
            }
        }
    }

    debug!(rows = seen_rows, top_level, links = rows.len(), "Parsed comment page");
    rows
}

/// Depth 0 is the only top-level marker. An absent indicator reads as
/// width 0, so rows without one are kept.
fn is_top_level(dialect: &Dialect, row: ElementRef<'_>) -> bool {
    let width = row
        .select(&dialect.indent)
        .next()
        .and_then(|img| img.value().attr(dialect.indent_attr))
        .unwrap_or("0");
    matches!(width.trim().parse::<i64>(), Ok(0))
}

fn normalize_href(
    dialect: &Dialect,
    href: &str,
    base_url: &str,
    base: Option<&Url>,
) -> Option<String> {
    if dialect.skip_prefixes.iter().any(|p| href.starts_with(p)) {
        return None;
    }
    let href = if href.starts_with('/') {
        match base.and_then(|b| b.join(href).ok()) {
            Some(joined) => joined.to_string(),
            None => format!("{}{}", base_url.trim_end_matches('/'), href),
        }
    } else {
        href.to_string()
    };
    if href.is_empty() || href == "#" {
        return None;
    }
    Some(href)
}
