pub mod comments;
pub mod dialect;

use crate::db::LinkRow;
pub use comments::extract_with;
pub use dialect::Dialect;

/// HTML → links posted in top-level comments, Hacker News markup.
pub fn extract(html: &str, base_url: &str) -> Vec<LinkRow> {
    extract_with(&Dialect::hacker_news(), html, base_url)
}
