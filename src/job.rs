use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::db;
use crate::error::{Error, Result};
use crate::parser;
use crate::settings::{item_url, Settings};

/// Where the discussion page comes from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain GET with a browser User-Agent. Non-2xx is an error.
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response.text().await?)
    }
}

/// One fetch → extract → upsert cycle against a store file.
pub struct ScrapeJob<S> {
    source: S,
    db_file: PathBuf,
    base_url: String,
}

impl ScrapeJob<HttpSource> {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            HttpSource::new(&settings.user_agent)?,
            settings.db_file.clone(),
            settings.base_url.clone(),
        ))
    }
}

impl<S: PageSource> ScrapeJob<S> {
    pub fn new(source: S, db_file: PathBuf, base_url: String) -> Self {
        Self {
            source,
            db_file,
            base_url,
        }
    }

    /// Returns the number of rows that were new to the store.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self, post_id: &str) -> Result<usize> {
        let url = item_url(&self.base_url, post_id);
        info!(%url, "Fetching discussion page");
        // store is only opened once the whole page is in hand
        let html = self.source.fetch(&url).await?;

        let base_url = self.base_url.clone();
        let db_file = self.db_file.clone();
        let (extracted, new) = tokio::task::spawn_blocking(move || -> Result<(usize, usize)> {
            let links = parser::extract(&html, &base_url);
            let conn = db::initialize(&db_file)?;
            Ok((links.len(), db::upsert_many(&conn, &links)?))
        })
        .await??;
        info!(extracted, new, "Scrape complete");
        Ok(new)
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[cfg(test)]
    pub fn db_file(&self) -> &std::path::Path {
        &self.db_file
    }
}
