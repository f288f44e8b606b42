use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use rusqlite::{Connection, params};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::resource::{GraphRef, resource_graphs};
use crate::runtime::write_text_file;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    pub resourceinstanceid: String,
    pub graph_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub documents: Vec<IndexedDocument>,
}

/// The slice of the search engine API needed to walk a whole index.
pub trait SearchIndexApi {
    fn open_scroll(
        &mut self,
        index: &str,
        page_size: usize,
        keep_alive: &str,
    ) -> Result<ScrollPage>;
    fn next_scroll(&mut self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage>;
    fn clear_scroll(&mut self, scroll_id: &str) -> Result<()>;
}

pub struct ElasticsearchClient {
    client: Client,
    base_url: String,
}

impl ElasticsearchClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn post_json(&self, url: &str, body: serde_json::Value) -> Result<ScrollPage> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .with_context(|| format!("failed to call {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("search request to {url} failed with HTTP {status}");
        }
        let payload: ScrollResponse = response
            .json()
            .context("failed to decode search response")?;
        Ok(payload.into_page())
    }
}

impl SearchIndexApi for ElasticsearchClient {
    fn open_scroll(
        &mut self,
        index: &str,
        page_size: usize,
        keep_alive: &str,
    ) -> Result<ScrollPage> {
        let url = format!("{}/{index}/_search?scroll={keep_alive}", self.base_url);
        self.post_json(
            &url,
            json!({
                "size": page_size,
                "_source": ["resourceinstanceid", "graph_id"],
            }),
        )
    }

    fn next_scroll(&mut self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage> {
        let url = format!("{}/_search/scroll", self.base_url);
        self.post_json(&url, json!({ "scroll": keep_alive, "scroll_id": scroll_id }))
    }

    fn clear_scroll(&mut self, scroll_id: &str) -> Result<()> {
        let url = format!("{}/_search/scroll", self.base_url);
        let response = self
            .client
            .delete(&url)
            .json(&json!({ "scroll_id": [scroll_id] }))
            .send()
            .with_context(|| format!("failed to call {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("clearing scroll failed with HTTP {status}");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    #[serde(default)]
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize, Default)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: Option<String>,
    #[serde(rename = "_source", default)]
    source: HitSource,
}

#[derive(Debug, Deserialize, Default)]
struct HitSource {
    resourceinstanceid: Option<String>,
    graph_id: Option<String>,
}

impl ScrollResponse {
    fn into_page(self) -> ScrollPage {
        let documents = self
            .hits
            .hits
            .into_iter()
            .filter_map(|hit| {
                let resourceinstanceid = hit.source.resourceinstanceid.or(hit.id)?;
                Some(IndexedDocument {
                    resourceinstanceid,
                    graph_id: hit.source.graph_id,
                })
            })
            .collect();
        ScrollPage {
            scroll_id: self.scroll_id,
            documents,
        }
    }
}

/// Resource ids in the index, grouped by graph id.
pub fn collect_indexed_resources<A: SearchIndexApi>(
    api: &mut A,
    index: &str,
    page_size: usize,
    keep_alive: &str,
) -> Result<BTreeMap<String, BTreeSet<String>>> {
    let mut summary: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut page = api.open_scroll(index, page_size, keep_alive)?;
    let mut last_scroll_id = None;
    let mut pages = 0usize;

    loop {
        if page.scroll_id.is_some() {
            last_scroll_id = page.scroll_id.clone();
        }
        if page.documents.is_empty() {
            break;
        }
        pages += 1;
        for document in page.documents {
            match document.graph_id {
                Some(graph_id) if graph_id != "None" && !graph_id.is_empty() => {
                    summary
                        .entry(graph_id)
                        .or_default()
                        .insert(document.resourceinstanceid);
                }
                _ => {}
            }
        }
        let Some(scroll_id) = last_scroll_id.as_deref() else {
            break;
        };
        page = api.next_scroll(scroll_id, keep_alive)?;
    }

    if let Some(scroll_id) = last_scroll_id
        && let Err(err) = api.clear_scroll(&scroll_id)
    {
        warn!("failed to clear search scroll: {err:#}");
    }
    debug!(index, pages, graphs = summary.len(), "collected indexed resources");
    Ok(summary)
}

#[derive(Debug, Clone)]
pub struct IndexCheckOptions {
    pub index: String,
    pub page_size: usize,
    pub keep_alive: String,
    /// Directory for `missing_from_index__<graph>.txt`; nothing is written when `None`.
    pub missing_log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct GraphIndexStatus {
    pub graph: GraphRef,
    pub in_db: usize,
    pub in_index: usize,
    pub indexed_not_in_db: Vec<String>,
    pub db_not_in_index: Vec<String>,
    pub missing_log: Option<PathBuf>,
}

impl GraphIndexStatus {
    pub fn is_consistent(&self) -> bool {
        self.indexed_not_in_db.is_empty() && self.db_not_in_index.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexCheckReport {
    pub graphs: Vec<GraphIndexStatus>,
}

/// Compare resource ids in the database with those in the search index, per resource graph.
pub fn check_index<A: SearchIndexApi>(
    connection: &Connection,
    api: &mut A,
    options: &IndexCheckOptions,
) -> Result<IndexCheckReport> {
    let indexed = collect_indexed_resources(
        api,
        &options.index,
        options.page_size.max(1),
        &options.keep_alive,
    )?;

    let mut statement = connection
        .prepare("SELECT resourceinstanceid FROM resource_instances WHERE graphid = ?1")
        .context("failed to prepare resource id query")?;
    let mut report = IndexCheckReport::default();
    for graph in resource_graphs(connection)? {
        let db_ids: BTreeSet<String> = statement
            .query_map(params![graph.graphid], |row| row.get(0))
            .with_context(|| format!("failed to list resources of {}", graph.name))?
            .collect::<rusqlite::Result<_>>()
            .context("failed to read resource ids")?;
        let empty = BTreeSet::new();
        let index_ids = indexed.get(&graph.graphid).unwrap_or(&empty);

        let indexed_not_in_db: Vec<String> = index_ids.difference(&db_ids).cloned().collect();
        let db_not_in_index: Vec<String> = db_ids.difference(index_ids).cloned().collect();

        let missing_log = match &options.missing_log_dir {
            Some(dir) if !db_not_in_index.is_empty() => {
                let path = dir.join(format!("missing_from_index__{}.txt", graph.name));
                let mut content = db_not_in_index.join("\n");
                content.push('\n');
                write_text_file(&path, &content, true)?;
                Some(path)
            }
            _ => None,
        };

        report.graphs.push(GraphIndexStatus {
            in_db: db_ids.len(),
            in_index: index_ids.len(),
            graph,
            indexed_not_in_db,
            db_not_in_index,
            missing_log,
        });
    }
    Ok(report)
}
