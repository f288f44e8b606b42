//! File references held in tile data.
//!
//! `file-list` node values are arrays of `{"file_id": .., "name": ..}`
//! objects. These helpers cross-check them against the `files` table and the
//! media directory, and export what they find as CSV or a zip archive.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

use crate::resource::{GraphRef, resource_graphs};

pub const FILE_LIST_DATATYPE: &str = "file-list";
const UNKNOWN: &str = "<unknown>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileScope {
    Resource(String),
    Graph(GraphRef),
}

impl FileScope {
    pub fn label(&self) -> &str {
        match self {
            Self::Resource(id) => id,
            Self::Graph(graph) => &graph.name,
        }
    }

    /// One scope per resource graph when neither a resource nor a graph is given.
    pub fn select(
        connection: &Connection,
        resource: Option<&str>,
        graph: Option<GraphRef>,
    ) -> Result<Vec<Self>> {
        if let Some(resource) = resource {
            return Ok(vec![Self::Resource(resource.to_string())]);
        }
        if let Some(graph) = graph {
            return Ok(vec![Self::Graph(graph)]);
        }
        Ok(resource_graphs(connection)?
            .into_iter()
            .map(Self::Graph)
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub resource_id: String,
    pub resource_name: String,
    pub node_name: String,
    pub file_id: String,
    pub original_name: String,
    pub actual_name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct FileInfoReport {
    pub file_count: usize,
    pub missing: Vec<PathBuf>,
    pub tiles_with_files: usize,
    pub files_without_id: usize,
    pub matched: usize,
    pub orphans: usize,
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    fileid: String,
    tileid: String,
    path: PathBuf,
}

#[derive(Debug, Clone)]
struct NodeInfo {
    name: String,
    datatype: String,
}

pub fn collect_file_info(
    connection: &Connection,
    media_root: &Path,
    scope: &FileScope,
    include_orphans: bool,
) -> Result<FileInfoReport> {
    let stored = scoped_files(connection, scope)?;
    let mut report = FileInfoReport {
        file_count: stored.len(),
        ..FileInfoReport::default()
    };

    let mut present: HashMap<String, StoredFile> = HashMap::new();
    let mut tiles: BTreeSet<String> = BTreeSet::new();
    for file in stored {
        let absolute = media_root.join(&file.path);
        if !absolute.is_file() {
            debug!(path = %absolute.display(), "file missing");
            report.missing.push(absolute);
            continue;
        }
        tiles.insert(file.tileid.clone());
        present.insert(
            file.fileid.clone(),
            StoredFile {
                path: absolute,
                ..file
            },
        );
    }
    report.tiles_with_files = tiles.len();

    let mut nodes: HashMap<String, Option<NodeInfo>> = HashMap::new();
    let mut resource_names: HashMap<String, String> = HashMap::new();
    for tileid in &tiles {
        let Some((resource_id, data)) = load_tile(connection, tileid)? else {
            continue;
        };
        let resource_name = match resource_names.get(&resource_id) {
            Some(name) => name.clone(),
            None => {
                let name = resource_display_name(connection, &resource_id)?;
                resource_names.insert(resource_id.clone(), name.clone());
                name
            }
        };

        let mut found_ids = BTreeSet::new();
        for (nodeid, value) in &data {
            if !nodes.contains_key(nodeid) {
                nodes.insert(nodeid.clone(), load_node(connection, nodeid)?);
            }
            let Some(Some(node)) = nodes.get(nodeid) else {
                continue;
            };
            if node.datatype != FILE_LIST_DATATYPE {
                continue;
            }
            for item in value.as_array().into_iter().flatten() {
                let Some(file_id) = file_id_of(item) else {
                    report.files_without_id += 1;
                    continue;
                };
                found_ids.insert(file_id.clone());
                report.matched += 1;
                let Some(file) = present.get(&file_id) else {
                    warn!(%file_id, %tileid, "tile references a file that is not available");
                    continue;
                };
                report.entries.push(FileEntry {
                    resource_id: resource_id.clone(),
                    resource_name: resource_name.clone(),
                    node_name: node.name.clone(),
                    file_id,
                    original_name: item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(UNKNOWN)
                        .to_string(),
                    actual_name: actual_name(&file.path),
                    path: file.path.clone(),
                });
            }
        }

        let orphans = tile_file_ids(connection, tileid)?
            .into_iter()
            .filter(|fileid| !found_ids.contains(fileid))
            .collect::<Vec<_>>();
        report.orphans += orphans.len();
        if include_orphans {
            for fileid in orphans {
                let Some(file) = present.get(&fileid) else {
                    continue;
                };
                report.entries.push(FileEntry {
                    resource_id: resource_id.clone(),
                    resource_name: resource_name.clone(),
                    node_name: UNKNOWN.to_string(),
                    file_id: fileid,
                    original_name: UNKNOWN.to_string(),
                    actual_name: actual_name(&file.path),
                    path: file.path.clone(),
                });
            }
        }
    }

    report
        .entries
        .sort_by(|left, right| left.resource_name.cmp(&right.resource_name));
    Ok(report)
}

pub fn file_csv_name(scope: &FileScope, include_orphans: bool) -> String {
    let suffix = if include_orphans { "__withorphans" } else { "" };
    format!("{}__filelist{suffix}.csv", scope.label())
}

pub fn file_archive_name(scope: &FileScope, include_orphans: bool) -> String {
    let suffix = if include_orphans { "__withorphans" } else { "" };
    format!("{}__files{suffix}.zip", scope.label())
}

/// CSV of the entries without the absolute path column.
pub fn write_file_csv(entries: &[FileEntry], destination: &Path) -> Result<()> {
    let mut out = String::new();
    push_csv_row(
        &mut out,
        [
            "resource id",
            "resource name",
            "node name",
            "file id",
            "file name (original)",
            "file name (actual)",
        ],
    );
    for entry in entries {
        push_csv_row(
            &mut out,
            [
                entry.resource_id.as_str(),
                entry.resource_name.as_str(),
                entry.node_name.as_str(),
                entry.file_id.as_str(),
                entry.original_name.as_str(),
                entry.actual_name.as_str(),
            ],
        );
    }
    write_output(destination, &out)
}

/// Zip every distinct referenced file under its stored base name.
pub fn write_file_archive(entries: &[FileEntry], destination: &Path) -> Result<usize> {
    ensure_parent(destination)?;
    let file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut seen = BTreeSet::new();
    for entry in entries {
        if !seen.insert(entry.file_id.as_str()) {
            continue;
        }
        let mut source = File::open(&entry.path)
            .with_context(|| format!("failed to open {}", entry.path.display()))?;
        zip.start_file(entry.actual_name.clone(), options)
            .with_context(|| format!("failed to add {} to archive", entry.actual_name))?;
        io::copy(&mut source, &mut zip)
            .with_context(|| format!("failed to archive {}", entry.path.display()))?;
    }
    zip.finish()
        .with_context(|| format!("failed to finish {}", destination.display()))?;
    Ok(seen.len())
}

/// Per-resource original file names, `|`-joined per file-list node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileNameTable {
    pub node_columns: Vec<String>,
    pub rows: Vec<FileNameRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameRow {
    pub resource_id: String,
    pub name: String,
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub enum ResourceSelection {
    Resource(String),
    Graph(GraphRef),
}

impl ResourceSelection {
    pub fn label(&self) -> &str {
        match self {
            Self::Resource(id) => id,
            Self::Graph(graph) => &graph.name,
        }
    }
}

pub fn build_file_name_table(
    connection: &Connection,
    selection: &ResourceSelection,
) -> Result<FileNameTable> {
    let resources: Vec<(String, String, String)> = match selection {
        ResourceSelection::Resource(id) => {
            let row = connection
                .query_row(
                    "SELECT resourceinstanceid, COALESCE(displayname, ''), graphid
                     FROM resource_instances WHERE resourceinstanceid = ?1",
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .with_context(|| format!("failed to look up resource {id}"))?;
            match row {
                Some(row) => vec![row],
                None => anyhow::bail!("resource {id} does not exist"),
            }
        }
        ResourceSelection::Graph(graph) => {
            let mut statement = connection
                .prepare(
                    "SELECT resourceinstanceid, COALESCE(displayname, ''), graphid
                     FROM resource_instances WHERE graphid = ?1
                     ORDER BY resourceinstanceid",
                )
                .context("failed to prepare resource listing")?;
            statement
                .query_map(params![graph.graphid], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .context("failed to list resources")?
                .collect::<rusqlite::Result<_>>()
                .context("failed to read resource rows")?
        }
    };

    let mut columns = BTreeSet::new();
    let mut rows = Vec::with_capacity(resources.len());
    let mut graph_nodes: HashMap<String, Vec<(String, String, Option<String>)>> = HashMap::new();
    for (resource_id, name, graphid) in resources {
        if !graph_nodes.contains_key(&graphid) {
            graph_nodes.insert(graphid.clone(), file_list_nodes(connection, &graphid)?);
        }
        let nodes = graph_nodes.get(&graphid).map(Vec::as_slice).unwrap_or_default();

        let mut staged: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for tile in resource_tiles(connection, &resource_id)? {
            for (nodeid, node_name, nodegroupid) in nodes {
                if nodegroupid.is_some() && nodegroupid.as_deref() != tile.0.as_deref() {
                    continue;
                }
                let Some(values) = tile.1.get(nodeid).and_then(Value::as_array) else {
                    continue;
                };
                staged.entry(node_name.as_str()).or_default().extend(
                    values
                        .iter()
                        .filter_map(|item| item.get("name").and_then(Value::as_str))
                        .map(str::to_string),
                );
            }
        }

        let mut files = BTreeMap::new();
        for (node_name, names) in staged {
            if names.is_empty() {
                continue;
            }
            columns.insert(node_name.to_string());
            files.insert(node_name.to_string(), names.join("|"));
        }
        rows.push(FileNameRow {
            resource_id,
            name,
            files,
        });
    }

    Ok(FileNameTable {
        node_columns: columns.into_iter().collect(),
        rows,
    })
}

pub fn file_name_csv_name(selection: &ResourceSelection) -> String {
    format!("file_data__{}.csv", selection.label())
}

pub fn write_file_name_csv(table: &FileNameTable, destination: &Path) -> Result<()> {
    let mut out = String::new();
    let header: Vec<&str> = ["resourceid", "name"]
        .into_iter()
        .chain(table.node_columns.iter().map(String::as_str))
        .collect();
    push_csv_row(&mut out, header);
    for row in &table.rows {
        let cells: Vec<&str> = [row.resource_id.as_str(), row.name.as_str()]
            .into_iter()
            .chain(
                table
                    .node_columns
                    .iter()
                    .map(|column| row.files.get(column).map(String::as_str).unwrap_or("")),
            )
            .collect();
        push_csv_row(&mut out, cells);
    }
    write_output(destination, &out)
}

fn scoped_files(connection: &Connection, scope: &FileScope) -> Result<Vec<StoredFile>> {
    let (filter, value) = match scope {
        FileScope::Resource(id) => ("r.resourceinstanceid = ?1", id.as_str()),
        FileScope::Graph(graph) => ("r.graphid = ?1", graph.graphid.as_str()),
    };
    let sql = format!(
        "SELECT f.fileid, f.tileid, f.path
         FROM files f
         JOIN tiles t ON t.tileid = f.tileid
         JOIN resource_instances r ON r.resourceinstanceid = t.resourceinstanceid
         WHERE {filter}
         ORDER BY f.fileid"
    );
    let mut statement = connection
        .prepare(&sql)
        .context("failed to prepare file query")?;
    statement
        .query_map(params![value], |row| {
            Ok(StoredFile {
                fileid: row.get(0)?,
                tileid: row.get(1)?,
                path: PathBuf::from(row.get::<_, String>(2)?),
            })
        })
        .context("failed to query files")?
        .collect::<rusqlite::Result<_>>()
        .context("failed to read file rows")
}

fn load_tile(connection: &Connection, tileid: &str) -> Result<Option<(String, Map<String, Value>)>> {
    let row: Option<(String, String)> = connection
        .query_row(
            "SELECT resourceinstanceid, data FROM tiles WHERE tileid = ?1",
            params![tileid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .with_context(|| format!("failed to load tile {tileid}"))?;
    row.map(|(resource_id, data)| Ok((resource_id, parse_tile_data(tileid, &data)?)))
        .transpose()
}

fn resource_tiles(
    connection: &Connection,
    resource_id: &str,
) -> Result<Vec<(Option<String>, Map<String, Value>)>> {
    let mut statement = connection
        .prepare("SELECT tileid, nodegroupid, data FROM tiles WHERE resourceinstanceid = ?1")
        .context("failed to prepare tile query")?;
    let rows: Vec<(String, Option<String>, String)> = statement
        .query_map(params![resource_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .context("failed to query tiles")?
        .collect::<rusqlite::Result<_>>()
        .context("failed to read tile rows")?;
    rows.into_iter()
        .map(|(tileid, nodegroupid, data)| Ok((nodegroupid, parse_tile_data(&tileid, &data)?)))
        .collect()
}

fn parse_tile_data(tileid: &str, data: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(data)
        .with_context(|| format!("tile {tileid} holds invalid JSON data"))?
    {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn load_node(connection: &Connection, nodeid: &str) -> Result<Option<NodeInfo>> {
    connection
        .query_row(
            "SELECT name, datatype FROM nodes WHERE nodeid = ?1",
            params![nodeid],
            |row| {
                Ok(NodeInfo {
                    name: row.get(0)?,
                    datatype: row.get(1)?,
                })
            },
        )
        .optional()
        .with_context(|| format!("failed to load node {nodeid}"))
}

fn file_list_nodes(
    connection: &Connection,
    graphid: &str,
) -> Result<Vec<(String, String, Option<String>)>> {
    let mut statement = connection
        .prepare(
            "SELECT nodeid, name, nodegroupid FROM nodes
             WHERE graphid = ?1 AND datatype = ?2",
        )
        .context("failed to prepare node query")?;
    statement
        .query_map(params![graphid, FILE_LIST_DATATYPE], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .context("failed to query file-list nodes")?
        .collect::<rusqlite::Result<_>>()
        .context("failed to read node rows")
}

fn tile_file_ids(connection: &Connection, tileid: &str) -> Result<Vec<String>> {
    let mut statement = connection
        .prepare("SELECT fileid FROM files WHERE tileid = ?1 ORDER BY fileid")
        .context("failed to prepare tile file query")?;
    statement
        .query_map(params![tileid], |row| row.get(0))
        .context("failed to query tile files")?
        .collect::<rusqlite::Result<_>>()
        .context("failed to read tile file rows")
}

fn resource_display_name(connection: &Connection, resource_id: &str) -> Result<String> {
    let name: Option<Option<String>> = connection
        .query_row(
            "SELECT displayname FROM resource_instances WHERE resourceinstanceid = ?1",
            params![resource_id],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to look up resource {resource_id}"))?;
    Ok(name.flatten().unwrap_or_default())
}

fn file_id_of(item: &Value) -> Option<String> {
    match item.get("file_id")? {
        Value::String(id) if !id.is_empty() && id != "None" => Some(id.clone()),
        _ => None,
    }
}

fn actual_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn push_csv_row<'a>(out: &mut String, cells: impl IntoIterator<Item = &'a str>) {
    let line: Vec<String> = cells.into_iter().map(csv_cell).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn ensure_parent(destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn write_output(destination: &Path, content: &str) -> Result<()> {
    ensure_parent(destination)?;
    let mut file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", destination.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use tempfile::tempdir;

    use super::*;
    use crate::migrate::apply_migrations;
    use crate::resource::fixtures::{HERITAGE, insert_resource, seed_graphs};

    const PHOTOS_NODE: &str = "aa000000-0000-4000-8000-000000000001";
    const TITLE_NODE: &str = "aa000000-0000-4000-8000-000000000002";
    const PHOTOS_GROUP: &str = "bb000000-0000-4000-8000-000000000001";

    fn heritage_graph() -> GraphRef {
        GraphRef {
            graphid: HERITAGE.to_string(),
            name: "Heritage Asset".to_string(),
        }
    }

    fn seeded(media_root: &Path) -> Connection {
        let connection = Connection::open_in_memory().expect("open");
        apply_migrations(&connection).expect("migrate");
        seed_graphs(&connection);
        insert_resource(&connection, "r-castle", HERITAGE, "Castle");
        insert_resource(&connection, "r-abbey", HERITAGE, "Abbey");
        connection
            .execute_batch(&format!(
                "INSERT INTO nodes (nodeid, graphid, nodegroupid, name, datatype) VALUES
                   ('{PHOTOS_NODE}', '{HERITAGE}', '{PHOTOS_GROUP}', 'Photos', 'file-list'),
                   ('{TITLE_NODE}', '{HERITAGE}', '{PHOTOS_GROUP}', 'Title', 'string');"
            ))
            .expect("insert nodes");

        let castle_data = format!(
            r#"{{"{PHOTOS_NODE}": [{{"file_id": "f-1", "name": "front.jpg"}}, {{"file_id": null, "name": "lost.jpg"}}], "{TITLE_NODE}": "Castle photos"}}"#
        );
        let abbey_data =
            format!(r#"{{"{PHOTOS_NODE}": [{{"file_id": "f-3", "name": "nave.jpg"}}]}}"#);
        for (tileid, resource, data) in [
            ("t-castle", "r-castle", castle_data),
            ("t-abbey", "r-abbey", abbey_data),
        ] {
            connection
                .execute(
                    "INSERT INTO tiles (tileid, resourceinstanceid, nodegroupid, data)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![tileid, resource, PHOTOS_GROUP, data],
                )
                .expect("insert tile");
        }

        fs::create_dir_all(media_root.join("uploadedfiles")).expect("media dir");
        for (fileid, tileid, name, exists) in [
            ("f-1", "t-castle", "IMG_0001.jpg", true),
            ("f-2", "t-castle", "IMG_0002.jpg", true),
            ("f-3", "t-abbey", "IMG_0003.jpg", true),
            ("f-4", "t-abbey", "IMG_0004.jpg", false),
        ] {
            let relative = format!("uploadedfiles/{name}");
            if exists {
                fs::write(media_root.join(&relative), name).expect("write media");
            }
            connection
                .execute(
                    "INSERT INTO files (fileid, tileid, path) VALUES (?1, ?2, ?3)",
                    params![fileid, tileid, relative],
                )
                .expect("insert file");
        }
        connection
    }

    #[test]
    fn collect_matches_tile_references_and_counts_orphans() {
        let temp = tempdir().expect("tempdir");
        let connection = seeded(temp.path());
        let scope = FileScope::Graph(heritage_graph());

        let report = collect_file_info(&connection, temp.path(), &scope, false).expect("collect");
        assert_eq!(report.file_count, 4);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.tiles_with_files, 2);
        assert_eq!(report.files_without_id, 1);
        assert_eq!(report.matched, 2);
        assert_eq!(report.orphans, 2);

        let summary: Vec<(&str, &str, &str)> = report
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.resource_name.as_str(),
                    entry.original_name.as_str(),
                    entry.actual_name.as_str(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Abbey", "nave.jpg", "IMG_0003.jpg"),
                ("Castle", "front.jpg", "IMG_0001.jpg"),
            ]
        );
    }

    #[test]
    fn orphans_are_included_on_request() {
        let temp = tempdir().expect("tempdir");
        let connection = seeded(temp.path());
        let scope = FileScope::Resource("r-castle".to_string());

        let report = collect_file_info(&connection, temp.path(), &scope, true).expect("collect");
        let orphan = report
            .entries
            .iter()
            .find(|entry| entry.file_id == "f-2")
            .expect("orphan entry");
        assert_eq!(orphan.node_name, UNKNOWN);
        assert_eq!(orphan.original_name, UNKNOWN);
        assert_eq!(report.entries.len(), 2);
    }

    #[test]
    fn csv_and_archive_outputs() {
        let temp = tempdir().expect("tempdir");
        let connection = seeded(temp.path());
        let scope = FileScope::Graph(heritage_graph());
        let report = collect_file_info(&connection, temp.path(), &scope, false).expect("collect");
        let out_dir = temp.path().join("out");

        let csv_path = out_dir.join(file_csv_name(&scope, false));
        write_file_csv(&report.entries, &csv_path).expect("csv");
        let csv = fs::read_to_string(&csv_path).expect("read csv");
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("resource id,resource name,node name,file id,file name (original),file name (actual)")
        );
        assert_eq!(
            lines.next(),
            Some("r-abbey,Abbey,Photos,f-3,nave.jpg,IMG_0003.jpg")
        );
        assert!(!csv.contains("uploadedfiles"));

        let zip_path = out_dir.join(file_archive_name(&scope, true));
        assert!(zip_path.ends_with("Heritage Asset__files__withorphans.zip"));
        let written = write_file_archive(&report.entries, &zip_path).expect("zip");
        assert_eq!(written, 2);

        let mut archive =
            zip::ZipArchive::new(File::open(&zip_path).expect("open zip")).expect("read zip");
        let mut content = String::new();
        archive
            .by_name("IMG_0001.jpg")
            .expect("archived file")
            .read_to_string(&mut content)
            .expect("read entry");
        assert_eq!(content, "IMG_0001.jpg");
    }

    #[test]
    fn file_name_table_joins_names_per_node() {
        let temp = tempdir().expect("tempdir");
        let connection = seeded(temp.path());
        let selection = ResourceSelection::Graph(heritage_graph());

        let table = build_file_name_table(&connection, &selection).expect("table");
        assert_eq!(table.node_columns, vec!["Photos"]);
        let castle = table
            .rows
            .iter()
            .find(|row| row.resource_id == "r-castle")
            .expect("castle row");
        assert_eq!(castle.files["Photos"], "front.jpg|lost.jpg");

        let path = temp.path().join(file_name_csv_name(&selection));
        write_file_name_csv(&table, &path).expect("write");
        let csv = fs::read_to_string(&path).expect("read");
        assert!(csv.starts_with("resourceid,name,Photos\r\n"));
        assert!(csv.contains("r-castle,Castle,front.jpg|lost.jpg\r\n"));
    }

    #[test]
    fn unknown_resource_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let connection = seeded(temp.path());
        let err = build_file_name_table(
            &connection,
            &ResourceSelection::Resource("missing".to_string()),
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn csv_cells_are_quoted_when_needed() {
        assert_eq!(csv_cell("plain"), "plain");
        assert_eq!(csv_cell("a,b"), "\"a,b\"");
        assert_eq!(csv_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
