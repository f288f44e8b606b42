use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

/// Graph never offered in an all-graphs scope.
pub const SYSTEM_SETTINGS_GRAPH: &str = "Arches System Settings";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRef {
    pub graphid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphLookup {
    Missing,
    Found(GraphRef),
    /// Several resource graphs share the name; the caller must pick one.
    Ambiguous(Vec<GraphRef>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphInspection {
    pub graph: GraphRef,
    pub resource_count: u64,
}

/// Resolve a graph by id, or by case-insensitive name among resource graphs.
pub fn resolve_graph(connection: &Connection, name_or_uuid: &str) -> Result<GraphLookup> {
    let needle = name_or_uuid.trim();
    if let Ok(uuid) = Uuid::parse_str(needle) {
        let found = connection
            .query_row(
                "SELECT graphid, name FROM graphs WHERE lower(graphid) = ?1",
                params![uuid.hyphenated().to_string()],
                |row| {
                    Ok(GraphRef {
                        graphid: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to look up graph {needle}"))?;
        return Ok(found.map_or(GraphLookup::Missing, GraphLookup::Found));
    }

    let mut statement = connection
        .prepare(
            "SELECT graphid, name FROM graphs
             WHERE lower(name) = lower(?1) AND isresource = 1
             ORDER BY graphid",
        )
        .context("failed to prepare graph lookup")?;
    let mut matches: Vec<GraphRef> = statement
        .query_map(params![needle], |row| {
            Ok(GraphRef {
                graphid: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .context("failed to look up graph by name")?
        .collect::<rusqlite::Result<_>>()
        .context("failed to read graph rows")?;

    Ok(match matches.len() {
        0 => GraphLookup::Missing,
        1 => GraphLookup::Found(matches.remove(0)),
        _ => GraphLookup::Ambiguous(matches),
    })
}

/// Every resource graph except the system settings graph.
pub fn resource_graphs(connection: &Connection) -> Result<Vec<GraphRef>> {
    let mut statement = connection
        .prepare(
            "SELECT graphid, name FROM graphs
             WHERE isresource = 1 AND name <> ?1
             ORDER BY name",
        )
        .context("failed to prepare resource graph listing")?;
    statement
        .query_map(params![SYSTEM_SETTINGS_GRAPH], |row| {
            Ok(GraphRef {
                graphid: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .context("failed to list resource graphs")?
        .collect::<rusqlite::Result<_>>()
        .context("failed to read graph rows")
}

pub fn inspect_graphs(connection: &Connection, graphs: &[GraphRef]) -> Result<Vec<GraphInspection>> {
    let mut statement = connection
        .prepare("SELECT COUNT(*) FROM resource_instances WHERE graphid = ?1")
        .context("failed to prepare resource count")?;
    graphs
        .iter()
        .map(|graph| {
            let count: i64 = statement
                .query_row(params![graph.graphid], |row| row.get(0))
                .with_context(|| format!("failed to count resources of {}", graph.name))?;
            Ok(GraphInspection {
                graph: graph.clone(),
                resource_count: u64::try_from(count).unwrap_or(0),
            })
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::migrate::apply_migrations;

    fn store() -> Connection {
        let connection = Connection::open_in_memory().expect("open");
        apply_migrations(&connection).expect("migrate");
        seed_graphs(&connection);
        connection
    }

    #[test]
    fn resolve_by_name_ignores_case() {
        let connection = store();
        match resolve_graph(&connection, "heritage asset").expect("lookup") {
            GraphLookup::Found(graph) => assert_eq!(graph.graphid, HERITAGE),
            other => panic!("unexpected lookup: {other:?}"),
        }
        assert_eq!(
            resolve_graph(&connection, "Nope").expect("lookup"),
            GraphLookup::Missing
        );
    }

    #[test]
    fn resolve_by_uuid_uses_graph_id() {
        let connection = store();
        let lookup = resolve_graph(&connection, &ACTOR.to_uppercase()).expect("lookup");
        assert_eq!(
            lookup,
            GraphLookup::Found(GraphRef {
                graphid: ACTOR.to_string(),
                name: "Actor".to_string(),
            })
        );
    }

    #[test]
    fn duplicate_names_are_ambiguous() {
        let connection = store();
        insert_graph(
            &connection,
            "6b1d1ae4-2f47-4f8e-9a25-8ab8a5c7c003",
            "actor",
            true,
        );
        match resolve_graph(&connection, "Actor").expect("lookup") {
            GraphLookup::Ambiguous(graphs) => assert_eq!(graphs.len(), 2),
            other => panic!("unexpected lookup: {other:?}"),
        }
    }

    #[test]
    fn inspection_counts_resources_and_skips_system_graph() {
        let connection = store();
        insert_resource(&connection, "r1", HERITAGE, "Castle");
        insert_resource(&connection, "r2", HERITAGE, "Abbey");
        insert_resource(&connection, "r3", ACTOR, "Jane");

        let graphs = resource_graphs(&connection).expect("graphs");
        let names: Vec<&str> = graphs.iter().map(|graph| graph.name.as_str()).collect();
        assert_eq!(names, vec!["Actor", "Heritage Asset"]);

        let inspected = inspect_graphs(&connection, &graphs).expect("inspect");
        let counts: Vec<u64> = inspected.iter().map(|item| item.resource_count).collect();
        assert_eq!(counts, vec![1, 2]);
    }
}
