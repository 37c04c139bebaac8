use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::db::{self, Stats, StoredLink};
use crate::error::{Error, Result};
use crate::export;

pub struct AppState {
    pub db_file: PathBuf,
    pub per_page: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/download.csv", get(download_csv))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve<F>(state: Arc<AppState>, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving links on http://{addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ── Pagination ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl Pager {
    /// `page` is 1-based; anything below 1 is treated as the first page.
    pub fn new(page: usize, per_page: usize, total: usize) -> Self {
        Self {
            page: page.max(1),
            per_page,
            total,
        }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.per_page)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

// ── Handlers ──

#[derive(Debug, Default, Deserialize)]
struct IndexQuery {
    page: Option<String>,
    q: Option<String>,
}

async fn index(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IndexQuery>,
) -> std::result::Result<Html<String>, WebError> {
    // unparsable page numbers fall back to the first page
    let page = params
        .page
        .as_deref()
        .and_then(|p| p.trim().parse::<usize>().ok())
        .unwrap_or(1);
    let search = params.q.unwrap_or_default().trim().to_string();
    let per_page = state.per_page;

    let term = search.clone();
    let (rows, pager, stats) = with_store(state.db_file.clone(), move |conn| {
        let offset = Pager::new(page, per_page, 0).offset();
        let filter = (!term.is_empty()).then_some(term.as_str());
        let (rows, total) = db::list_page(conn, filter, per_page, offset)?;
        Ok((rows, Pager::new(page, per_page, total), db::get_stats(conn)?))
    })
    .await?;

    Ok(Html(render_index(&rows, &pager, &stats, &search)))
}

async fn download_csv(State(state): State<Arc<AppState>>) -> std::result::Result<Response, WebError> {
    let rows = with_store(state.db_file.clone(), db::export_all).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=hn_links.csv"),
        ],
        export::render_csv(&rows),
    )
        .into_response())
}

async fn with_store<T, F>(db_file: PathBuf, f: F) -> std::result::Result<T, WebError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let conn = db::initialize(&db_file)?;
        f(&conn)
    })
    .await;
    match joined {
        Ok(result) => result.map_err(WebError::Store),
        Err(e) => Err(WebError::Task(e)),
    }
}

#[derive(Debug)]
enum WebError {
    Store(Error),
    Task(tokio::task::JoinError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match &self {
            WebError::Store(e) => warn!(error = %e, "Failed to read links"),
            WebError::Task(e) => warn!(error = %e, "Store task failed"),
        }
        (StatusCode::INTERNAL_SERVER_ERROR, "Error loading links").into_response()
    }
}

// ── Rendering ──

fn render_index(rows: &[StoredLink], pager: &Pager, stats: &Stats, search: &str) -> String {
    let mut body = String::new();
    body.push_str("<h1>Links from top-level comments</h1>\n");
    body.push_str(&format!(
        "<form method=\"get\" action=\"/\"><input type=\"text\" name=\"q\" value=\"{}\" placeholder=\"Search author or link\"> \
         <button type=\"submit\">Search</button></form>\n",
        escape_html(search)
    ));
    body.push_str(&format!(
        "<p>{} links &middot; {} stored from {} authors &middot; <a href=\"/download.csv\">Download CSV</a></p>\n",
        pager.total, stats.total, stats.authors
    ));

    if rows.is_empty() {
        body.push_str("<p>No links found.</p>\n");
    } else {
        body.push_str(
            "<table>\n<thead><tr><th>Author</th><th>Link</th><th>Comment</th><th>First seen</th><th>Last seen</th></tr></thead>\n<tbody>\n",
        );
        for r in rows {
            let link = escape_html(&r.extracted_link);
            let comment = if r.comment_url.is_empty() {
                String::from("&ndash;")
            } else {
                format!("<a href=\"{}\">comment</a>", escape_html(&r.comment_url))
            };
            body.push_str(&format!(
                "<tr><td>{}</td><td><a href=\"{link}\" rel=\"nofollow\">{link}</a></td><td>{comment}</td><td>{}</td><td>{}</td></tr>\n",
                escape_html(&r.author),
                r.created_at.format("%Y-%m-%d %H:%M"),
                r.updated_at.format("%Y-%m-%d %H:%M"),
            ));
        }
        body.push_str("</tbody>\n</table>\n");
    }

    if pager.total_pages() > 1 {
        body.push_str("<nav>");
        if pager.has_prev() {
            body.push_str(&format!("<a href=\"{}\">&laquo; Prev</a> ", page_href(pager.page - 1, search)));
        }
        body.push_str(&format!("Page {} of {}", pager.page, pager.total_pages()));
        if pager.has_next() {
            body.push_str(&format!(" <a href=\"{}\">Next &raquo;</a>", page_href(pager.page + 1, search)));
        }
        body.push_str("</nav>\n");
    }

    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"><title>HN links</title></head><body>\n{body}</body></html>"
    )
}

fn page_href(page: usize, search: &str) -> String {
    if search.is_empty() {
        format!("/?page={page}")
    } else {
        let q: String = url::form_urlencoded::byte_serialize(search.as_bytes()).collect();
        format!("/?page={page}&amp;q={q}")
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
