//! Saving and loading the workflow topology.
//!
//! The persisted form is a nested key/value settings tree: the id
//! counters at the root, one entry per node under `nodes`, one entry per
//! connection under `connections`. Nodes are written topology-free (only
//! their own payload settings and id); connections reference nodes by id.
//! On load, all nodes are reconstructed before any connection is
//! re-inserted, because connection insertion requires both endpoints to
//! exist in the node table.
//!
//! Loading is resilient: a node with an unknown payload kind or malformed
//! settings is logged and skipped, as is a connection referencing a
//! missing node or port. One corrupt element does not abort the load.

use std::path::Path;

use lattice_core::{ConnectionId, NodeId};
use serde_json::{Map, Value, json};

use crate::error::WorkflowError;
use crate::extra::ExtraInfo;
use crate::graph::Workflow;
use crate::registry::PayloadRegistry;

const KEY_RUNNING_NODE_ID: &str = "runningNodeID";
const KEY_RUNNING_CONN_ID: &str = "runningConnectionID";
const KEY_NODES: &str = "nodes";
const KEY_CONNECTIONS: &str = "connections";
const KEY_FACTORY: &str = "factory";
const KEY_ID: &str = "id";
const KEY_CUSTOM_NAME: &str = "customName";
const KEY_SETTINGS: &str = "settings";
const KEY_EXTRA_CLASS: &str = "extraInfoClassName";
const KEY_EXTRA_CONTENT: &str = "extraInfo";
const KEY_CONN_ID: &str = "ID";
const KEY_SOURCE_ID: &str = "sourceID";
const KEY_SOURCE_PORT: &str = "sourcePort";
const KEY_TARGET_ID: &str = "targetID";
const KEY_TARGET_PORT: &str = "targetPort";

impl Workflow {
    /// Serialize the graph topology into a settings tree.
    ///
    /// Refused while execution is in progress.
    pub fn save(&self) -> Result<Value, WorkflowError> {
        let tables = self.tables.lock();
        if tables.any_in_flight() {
            return Err(WorkflowError::ExecutionInProgress);
        }

        let mut nodes = Map::new();
        for (id, node) in &tables.nodes {
            let mut entry = Map::new();
            entry.insert(KEY_FACTORY.into(), json!(node.payload().kind()));
            entry.insert(KEY_ID.into(), json!(id.as_u64()));
            entry.insert(KEY_CUSTOM_NAME.into(), json!(node.name()));
            entry.insert(KEY_SETTINGS.into(), node.payload().save_settings());
            if let Some(extra) = node.extra() {
                entry.insert(KEY_EXTRA_CLASS.into(), json!(extra.class_name));
                entry.insert(KEY_EXTRA_CONTENT.into(), extra.content.clone());
            }
            nodes.insert(format!("node_{}", id.as_u64()), Value::Object(entry));
        }

        let mut connections = Map::new();
        for (id, conn) in &tables.connections {
            let mut entry = Map::new();
            entry.insert(KEY_CONN_ID.into(), json!(id.as_u64()));
            entry.insert(KEY_SOURCE_ID.into(), json!(conn.source().as_u64()));
            entry.insert(KEY_SOURCE_PORT.into(), json!(conn.source_port()));
            entry.insert(KEY_TARGET_ID.into(), json!(conn.target().as_u64()));
            entry.insert(KEY_TARGET_PORT.into(), json!(conn.target_port()));
            if let Some(extra) = conn.extra() {
                entry.insert(KEY_EXTRA_CLASS.into(), json!(extra.class_name));
                entry.insert(KEY_EXTRA_CONTENT.into(), extra.content.clone());
            }
            connections.insert(format!("connection_{}", id.as_u64()), Value::Object(entry));
        }

        Ok(json!({
            KEY_RUNNING_NODE_ID: tables.next_node_id,
            KEY_RUNNING_CONN_ID: tables.next_connection_id,
            KEY_NODES: Value::Object(nodes),
            KEY_CONNECTIONS: Value::Object(connections),
        }))
    }

    /// Write the settings tree to a file as pretty-printed JSON.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), WorkflowError> {
        let settings = self.save()?;
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, &settings)?;
        Ok(())
    }

    /// Reconstruct a workflow from a settings tree.
    ///
    /// Payload kinds are resolved through the registry. The id counters
    /// are restored verbatim, so nodes added after a load get fresh,
    /// non-colliding ids.
    pub fn load(settings: &Value, registry: &PayloadRegistry) -> Result<Self, WorkflowError> {
        let workflow = Self::new();

        {
            let mut tables = workflow.tables.lock();
            tables.next_node_id = read_u64(settings, KEY_RUNNING_NODE_ID)?;
            tables.next_connection_id = read_u64(settings, KEY_RUNNING_CONN_ID)?;
        }

        // All nodes first: connections reference them by id.
        let nodes = read_object(settings, KEY_NODES)?;
        for (key, entry) in nodes {
            if let Err(err) = load_node(&workflow, registry, entry) {
                tracing::error!(node = %key, %err, "could not restore node, skipping it");
            }
        }

        let connections = read_object(settings, KEY_CONNECTIONS)?;
        for (key, entry) in connections {
            if let Err(err) = load_connection(&workflow, entry) {
                tracing::error!(connection = %key, %err, "could not restore connection, skipping it");
            }
        }

        if workflow.has_cycle() {
            tracing::error!("restored workflow contains a cycle; the file was not written by this core");
        }

        Ok(workflow)
    }

    /// Read a settings tree from a JSON file and reconstruct the workflow.
    pub fn load_from(
        path: impl AsRef<Path>,
        registry: &PayloadRegistry,
    ) -> Result<Self, WorkflowError> {
        let file = std::fs::File::open(path)?;
        let settings: Value = serde_json::from_reader(file)?;
        Self::load(&settings, registry)
    }
}

fn load_node(
    workflow: &Workflow,
    registry: &PayloadRegistry,
    entry: &Value,
) -> Result<(), WorkflowError> {
    let kind = read_str(entry, KEY_FACTORY)?;
    let id = NodeId::new(read_u64(entry, KEY_ID)?);
    let payload_settings = entry.get(KEY_SETTINGS).cloned().unwrap_or(Value::Null);

    let payload = registry.create(kind, &payload_settings)?;
    workflow.add_node_with_id(id, payload)?;

    if let Ok(name) = read_str(entry, KEY_CUSTOM_NAME) {
        workflow.set_node_name(id, name)?;
    }
    if let Some(extra) = read_extra(entry) {
        workflow.set_node_extra(id, Some(extra))?;
    }
    Ok(())
}

fn load_connection(workflow: &Workflow, entry: &Value) -> Result<(), WorkflowError> {
    let id = ConnectionId::new(read_u64(entry, KEY_CONN_ID)?);
    let source = NodeId::new(read_u64(entry, KEY_SOURCE_ID)?);
    let source_port = read_u64(entry, KEY_SOURCE_PORT)? as usize;
    let target = NodeId::new(read_u64(entry, KEY_TARGET_ID)?);
    let target_port = read_u64(entry, KEY_TARGET_PORT)? as usize;

    workflow.add_connection_with_id(id, source, source_port, target, target_port)?;

    if let Some(extra) = read_extra(entry) {
        workflow.set_connection_extra(id, Some(extra))?;
    }
    Ok(())
}

fn read_extra(entry: &Value) -> Option<ExtraInfo> {
    let class_name = entry.get(KEY_EXTRA_CLASS)?.as_str()?;
    let content = entry.get(KEY_EXTRA_CONTENT).cloned().unwrap_or(Value::Null);
    Some(ExtraInfo::new(class_name, content))
}

fn read_u64(value: &Value, key: &str) -> Result<u64, WorkflowError> {
    value
        .get(key)
        .ok_or_else(|| WorkflowError::MissingKey(key.to_owned()))?
        .as_u64()
        .ok_or_else(|| WorkflowError::MalformedValue(key.to_owned()))
}

fn read_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, WorkflowError> {
    value
        .get(key)
        .ok_or_else(|| WorkflowError::MissingKey(key.to_owned()))?
        .as_str()
        .ok_or_else(|| WorkflowError::MalformedValue(key.to_owned()))
}

fn read_object<'a>(
    value: &'a Value,
    key: &str,
) -> Result<&'a Map<String, Value>, WorkflowError> {
    value
        .get(key)
        .ok_or_else(|| WorkflowError::MissingKey(key.to_owned()))?
        .as_object()
        .ok_or_else(|| WorkflowError::MalformedValue(key.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::payload::testkit::StubPayload;

    fn stub_registry() -> PayloadRegistry {
        let mut registry = PayloadRegistry::new();
        registry
            .register("stub", |_settings| Ok(Arc::new(StubPayload::new()) as _))
            .unwrap();
        registry
    }

    /// Three nodes, two connections: a -> b -> c.
    fn sample_workflow() -> (Workflow, NodeId, NodeId, NodeId) {
        let wf = Workflow::new();
        let a = wf.add_node(Arc::new(StubPayload::new())).unwrap();
        let b = wf.add_node(Arc::new(StubPayload::new())).unwrap();
        let c = wf.add_node(Arc::new(StubPayload::new())).unwrap();
        wf.add_connection(a, 0, b, 0).unwrap();
        wf.add_connection(b, 0, c, 0).unwrap();
        (wf, a, b, c)
    }

    #[test]
    fn save_shape_matches_settings_layout() {
        let (wf, a, ..) = sample_workflow();
        let settings = wf.save().unwrap();

        assert_eq!(settings[KEY_RUNNING_NODE_ID], 4);
        assert_eq!(settings[KEY_RUNNING_CONN_ID], 2);

        let node_entry = &settings[KEY_NODES][format!("node_{}", a.as_u64())];
        assert_eq!(node_entry[KEY_FACTORY], "stub");
        assert_eq!(node_entry[KEY_ID], a.as_u64());
        assert_eq!(node_entry[KEY_CUSTOM_NAME], "Node 1");

        let conn_entry = &settings[KEY_CONNECTIONS]["connection_0"];
        assert_eq!(conn_entry[KEY_CONN_ID], 0);
        assert_eq!(conn_entry[KEY_SOURCE_ID], 1);
        assert_eq!(conn_entry[KEY_SOURCE_PORT], 0);
        assert_eq!(conn_entry[KEY_TARGET_ID], 2);
        assert_eq!(conn_entry[KEY_TARGET_PORT], 0);
    }

    #[test]
    fn save_load_round_trip_preserves_topology_and_counters() {
        let (wf, a, b, c) = sample_workflow();
        wf.set_node_name(b, "Middle").unwrap();
        wf.set_node_extra(a, Some(ExtraInfo::new("pos", serde_json::json!({"x": 3}))))
            .unwrap();

        let settings = wf.save().unwrap();
        let registry = stub_registry();
        let restored = Workflow::load(&settings, &registry).unwrap();

        assert_eq!(restored.node_ids(), vec![a, b, c]);
        assert_eq!(restored.connection_ids(), wf.connection_ids());
        assert_eq!(restored.node_name(b).unwrap(), "Middle");
        assert_eq!(restored.node_extra(a).unwrap().unwrap().class_name, "pos");

        let conn = restored.incoming_connection_at(b, 0).unwrap().unwrap();
        assert_eq!(conn.source(), a);
        assert_eq!(conn.source_port(), 0);
        assert_eq!(conn.target_port(), 0);

        // Counters restored verbatim: the next ids continue where the
        // original would have.
        assert_eq!(restored.save().unwrap()[KEY_RUNNING_NODE_ID], 4);
        assert_eq!(restored.save().unwrap()[KEY_RUNNING_CONN_ID], 2);
        let next = restored.add_node(Arc::new(StubPayload::new())).unwrap();
        assert_eq!(next, NodeId::new(4));
    }

    #[test]
    fn load_skips_nodes_with_unknown_kind() {
        let (wf, a, b, _c) = sample_workflow();
        let mut settings = wf.save().unwrap();
        // Corrupt one node's factory kind.
        settings[KEY_NODES][format!("node_{}", a.as_u64())][KEY_FACTORY] =
            serde_json::json!("vanished");

        let restored = Workflow::load(&settings, &stub_registry()).unwrap();

        // The corrupt node is gone, the rest of the graph survives. Its
        // connection dangles and is skipped as well.
        assert_eq!(restored.node_count(), 2);
        assert_eq!(restored.connection_count(), 1);
        assert!(restored.incoming_connection_at(b, 0).unwrap().is_none());
    }

    #[test]
    fn load_skips_connections_with_bad_endpoints() {
        let (wf, ..) = sample_workflow();
        let mut settings = wf.save().unwrap();
        settings[KEY_CONNECTIONS]["connection_0"][KEY_TARGET_ID] = serde_json::json!(999);
        settings[KEY_CONNECTIONS]["connection_1"][KEY_TARGET_PORT] = serde_json::json!(17);

        let restored = Workflow::load(&settings, &stub_registry()).unwrap();
        assert_eq!(restored.node_count(), 3);
        assert_eq!(restored.connection_count(), 0);
    }

    #[test]
    fn load_rejects_malformed_root() {
        let settings = serde_json::json!({ "nodes": {} });
        let err = Workflow::load(&settings, &stub_registry()).unwrap_err();
        assert!(matches!(err, WorkflowError::MissingKey(_)));
    }

    #[test]
    fn file_round_trip() {
        let (wf, a, _b, c) = sample_workflow();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");

        wf.save_to(&path).unwrap();
        let restored = Workflow::load_from(&path, &stub_registry()).unwrap();

        assert_eq!(restored.node_ids(), vec![a, NodeId::new(2), c]);
        assert_eq!(restored.connection_count(), 2);
    }

    #[test]
    fn duplicate_node_entries_keep_first() {
        let (wf, a, ..) = sample_workflow();
        let mut settings = wf.save().unwrap();
        // A second entry claiming an existing id.
        let dup = settings[KEY_NODES][format!("node_{}", a.as_u64())].clone();
        settings[KEY_NODES]["node_duplicate"] = dup;

        let restored = Workflow::load(&settings, &stub_registry()).unwrap();
        assert_eq!(restored.node_count(), 3);
    }
}
