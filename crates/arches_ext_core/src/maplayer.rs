use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_LAYER_ICON: &str = "fa fa-globe";

#[derive(Debug, Clone)]
pub struct AddMapLayerOptions {
    pub name: String,
    pub style_path: PathBuf,
    pub icon: String,
    pub is_basemap: bool,
}

#[derive(Debug, Clone)]
pub struct MapLayerReport {
    pub name: String,
    pub maplayerid: String,
    pub sources: Vec<String>,
    pub created_sources: usize,
    pub layer_count: usize,
}

#[derive(Debug, Clone)]
pub struct MapLayerRemoval {
    pub name: String,
    pub removed_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLayerSummary {
    pub name: String,
    pub sources: Vec<String>,
}

/// Register a Mapbox style document as one map layer plus its sources.
///
/// Source names and every layer's `source` reference get a `-<name>` suffix so
/// that two layers built from the same style don't share sources.
pub fn add_map_layer(
    connection: &mut Connection,
    options: &AddMapLayerOptions,
) -> Result<MapLayerReport> {
    let name = options.name.trim();
    if name.is_empty() {
        bail!("map layer name must not be empty");
    }
    let style = read_style(&options.style_path)?;
    let Some(Value::Array(mut layers)) = style.get("layers").cloned() else {
        bail!(
            "{} has no `layers` array",
            options.style_path.display()
        );
    };
    let Some(Value::Object(sources)) = style.get("sources").cloned() else {
        bail!(
            "{} has no `sources` mapping",
            options.style_path.display()
        );
    };

    for layer in &mut layers {
        if let Some(Value::String(source)) = layer.get_mut("source") {
            *source = format!("{source}-{name}");
        }
    }

    let transaction = connection
        .transaction()
        .context("failed to start map layer transaction")?;
    if layer_definitions(&transaction, name)?.is_some() {
        bail!("cannot save layer: {name} already exists");
    }

    let mut source_names = Vec::with_capacity(sources.len());
    let mut created_sources = 0;
    for (source_name, definition) in &sources {
        let scoped = format!("{source_name}-{name}");
        let serialized = definition.to_string();
        let stored: Option<String> = transaction
            .query_row(
                "SELECT source FROM map_sources WHERE name = ?1",
                params![scoped],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to look up map source {scoped}"))?;
        match stored {
            Some(existing) => {
                let existing: Value = serde_json::from_str(&existing)
                    .with_context(|| format!("stored map source {scoped} is not valid JSON"))?;
                if &existing != definition {
                    bail!("map source {scoped} already exists with a different definition");
                }
            }
            None => {
                transaction
                    .execute(
                        "INSERT INTO map_sources (name, source) VALUES (?1, ?2)",
                        params![scoped, serialized],
                    )
                    .with_context(|| format!("failed to insert map source {scoped}"))?;
                created_sources += 1;
            }
        }
        source_names.push(scoped);
    }

    let maplayerid = Uuid::new_v4().to_string();
    transaction
        .execute(
            "INSERT INTO map_layers (maplayerid, name, layerdefinitions, isoverlay, icon)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                maplayerid,
                name,
                Value::Array(layers.clone()).to_string(),
                !options.is_basemap,
                options.icon,
            ],
        )
        .with_context(|| format!("failed to insert map layer {name}"))?;
    transaction
        .commit()
        .context("failed to commit map layer transaction")?;

    info!(name, sources = source_names.len(), "added map layer");
    Ok(MapLayerReport {
        name: name.to_string(),
        maplayerid,
        sources: source_names,
        created_sources,
        layer_count: layers.len(),
    })
}

/// Delete a map layer and the sources its definitions reference.
pub fn remove_map_layer(connection: &mut Connection, name: &str) -> Result<MapLayerRemoval> {
    let transaction = connection
        .transaction()
        .context("failed to start map layer transaction")?;
    let Some(definitions) = layer_definitions(&transaction, name)? else {
        bail!("map layer \"{name}\" does not exist");
    };

    let mut removed_sources = Vec::new();
    for source in referenced_sources(&definitions) {
        let deleted = transaction
            .execute("DELETE FROM map_sources WHERE name = ?1", params![source])
            .with_context(|| format!("failed to delete map source {source}"))?;
        if deleted > 0 {
            removed_sources.push(source);
        }
    }
    transaction
        .execute("DELETE FROM map_layers WHERE name = ?1", params![name])
        .with_context(|| format!("failed to delete map layer {name}"))?;
    transaction
        .commit()
        .context("failed to commit map layer removal")?;

    info!(name, sources = removed_sources.len(), "removed map layer");
    Ok(MapLayerRemoval {
        name: name.to_string(),
        removed_sources,
    })
}

pub fn list_map_layers(connection: &Connection) -> Result<Vec<MapLayerSummary>> {
    let mut statement = connection
        .prepare("SELECT name, layerdefinitions FROM map_layers ORDER BY name")
        .context("failed to prepare map layer listing")?;
    let rows = statement
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .context("failed to list map layers")?;

    let mut layers = Vec::new();
    for row in rows {
        let (name, definitions) = row.context("failed to read map layer row")?;
        let definitions: Value = serde_json::from_str(&definitions)
            .with_context(|| format!("layer definitions of {name} are not valid JSON"))?;
        layers.push(MapLayerSummary {
            name,
            sources: referenced_sources(&definitions),
        });
    }
    Ok(layers)
}

fn read_style(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn layer_definitions(connection: &Connection, name: &str) -> Result<Option<Value>> {
    let stored: Option<String> = connection
        .query_row(
            "SELECT layerdefinitions FROM map_layers WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to look up map layer {name}"))?;
    stored
        .map(|text| {
            serde_json::from_str(&text)
                .with_context(|| format!("layer definitions of {name} are not valid JSON"))
        })
        .transpose()
}

fn referenced_sources(definitions: &Value) -> Vec<String> {
    let sources: BTreeSet<String> = definitions
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|layer| layer.get("source").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    sources.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::migrate::apply_migrations;

    const STYLE: &str = r#"{
        "version": 8,
        "sources": {
            "hillshade": {"type": "raster-dem", "url": "mapbox://mapbox.terrain-rgb"}
        },
        "layers": [
            {"id": "hillshade-layer", "type": "hillshade", "source": "hillshade"},
            {"id": "background", "type": "background"}
        ]
    }"#;

    fn store() -> Connection {
        let connection = Connection::open_in_memory().expect("open");
        apply_migrations(&connection).expect("migrate");
        connection
    }

    fn options(dir: &Path, name: &str) -> AddMapLayerOptions {
        let style_path = dir.join("style.json");
        fs::write(&style_path, STYLE).expect("write style");
        AddMapLayerOptions {
            name: name.to_string(),
            style_path,
            icon: DEFAULT_LAYER_ICON.to_string(),
            is_basemap: false,
        }
    }

    #[test]
    fn add_suffixes_sources_and_lists_layer() {
        let temp = tempdir().expect("tempdir");
        let mut connection = store();

        let report = add_map_layer(&mut connection, &options(temp.path(), "Terrain")).expect("add");
        assert_eq!(report.sources, vec!["hillshade-Terrain"]);
        assert_eq!(report.created_sources, 1);
        assert_eq!(report.layer_count, 2);

        let layers = list_map_layers(&connection).expect("list");
        assert_eq!(
            layers,
            vec![MapLayerSummary {
                name: "Terrain".to_string(),
                sources: vec!["hillshade-Terrain".to_string()],
            }]
        );
        let isoverlay: bool = connection
            .query_row(
                "SELECT isoverlay FROM map_layers WHERE name = 'Terrain'",
                [],
                |row| row.get(0),
            )
            .expect("isoverlay");
        assert!(isoverlay);
    }

    #[test]
    fn adding_existing_layer_fails_and_keeps_state() {
        let temp = tempdir().expect("tempdir");
        let mut connection = store();
        add_map_layer(&mut connection, &options(temp.path(), "Terrain")).expect("add");

        let err = add_map_layer(&mut connection, &options(temp.path(), "Terrain"))
            .expect_err("duplicate");
        assert!(err.to_string().contains("already exists"));
        assert_eq!(list_map_layers(&connection).expect("list").len(), 1);
    }

    #[test]
    fn remove_deletes_layer_and_its_sources() {
        let temp = tempdir().expect("tempdir");
        let mut connection = store();
        add_map_layer(&mut connection, &options(temp.path(), "Terrain")).expect("add");

        let removal = remove_map_layer(&mut connection, "Terrain").expect("remove");
        assert_eq!(removal.removed_sources, vec!["hillshade-Terrain"]);
        assert!(list_map_layers(&connection).expect("list").is_empty());
        let sources: i64 = connection
            .query_row("SELECT COUNT(*) FROM map_sources", [], |row| row.get(0))
            .expect("count");
        assert_eq!(sources, 0);

        let err = remove_map_layer(&mut connection, "Terrain").expect_err("missing");
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn style_without_layers_is_rejected() {
        let temp = tempdir().expect("tempdir");
        let style_path = temp.path().join("bad.json");
        fs::write(&style_path, r#"{"sources": {}}"#).expect("write");
        let mut connection = store();

        let err = add_map_layer(
            &mut connection,
            &AddMapLayerOptions {
                name: "Bad".to_string(),
                style_path,
                icon: DEFAULT_LAYER_ICON.to_string(),
                is_basemap: true,
            },
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("no `layers` array"));
    }
}
