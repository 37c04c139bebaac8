use scraper::Selector;

/// Structural markers of one site's comment markup.
///
/// Everything the extractor knows about the page layout lives here, so a
/// markup change on the source site only touches this value.
#[derive(Debug, Clone)]
pub struct Dialect {
    /// One per comment, replies included.
    pub comment_row: Selector,
    /// Spacer image whose `width` encodes nesting depth.
    pub indent: Selector,
    pub indent_attr: &'static str,
    pub author: Selector,
    pub body: Selector,
    pub anchor: Selector,
    /// Site-internal hrefs dropped from the body.
    pub skip_prefixes: &'static [&'static str],
    pub unknown_author: &'static str,
}

impl Dialect {
    pub fn hacker_news() -> Self {
        Self {
            comment_row: selector("tr.athing.comtr"),
            indent: selector("td.ind img"),
            indent_attr: "width",
            author: selector("a.hnuser"),
            body: selector("div.commtext"),
            anchor: selector("a[href]"),
            skip_prefixes: &["reply?", "user?"],
            unknown_author: "unknown",
        }
    }
}

// Selectors are compile-time constants; a parse failure is a programming error.
fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e:?}"))
}
