//! Table set init node: seeds the environment at stream start
//!
//! Declarative replacement for running setup code: the config maps table
//! names to JSON values (typically `{rows, columns, total}` seeds or empty
//! accumulators) that are written into the [`TableEnv`] once, before any
//! source subscribes. Outside streaming mode there is no environment and
//! the node is a no-op.

use serde_json::{json, Value};

use crate::env::{TableEnv, TableValue};
use crate::node::{Node, NodeCategory, NodeFactory, NodeMeta, NodeOutput, Port};
use crate::nodes::cfg;

pub const TABLE_SET_TYPE: &str = "table_set";

pub struct TableSetFactory {
    meta: NodeMeta,
}

impl TableSetFactory {
    pub fn new() -> Self {
        Self {
            meta: NodeMeta {
                id: TABLE_SET_TYPE.to_string(),
                label: "Set Tables".to_string(),
                category: NodeCategory::Init,
                description: "Seed named tables in the pipeline environment at start".to_string(),
                inputs: vec![Port::new("in", "Input from other init nodes")],
                outputs: vec![Port::new("out", "Init output")],
                config_schema: json!({
                    "type": "object",
                    "properties": {
                        "tables": {
                            "type": "object",
                            "title": "Tables",
                            "description": "Table name -> initial JSON value",
                        },
                    },
                    "required": ["tables"],
                }),
            },
        }
    }
}

impl Default for TableSetFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for TableSetFactory {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn create(&self) -> Box<dyn Node> {
        Box::new(TableSetNode)
    }
}

struct TableSetNode;

impl Node for TableSetNode {
    fn execute(
        &self,
        _inputs: &NodeOutput,
        config: &Value,
        env: Option<&TableEnv>,
    ) -> anyhow::Result<NodeOutput> {
        let tables = cfg(config, "tables")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();

        if let Some(env) = env {
            for (name, value) in tables {
                env.set(name, TableValue::Json(value));
            }
        }

        Ok(NodeOutput::new()
            .with_scalar("initialized", json!(true))
            .with_scalar("tables", json!(names)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeds_env() {
        let env = TableEnv::new();
        let output = TableSetFactory::new()
            .create()
            .execute(
                &NodeOutput::new(),
                &json!({"tables": {"ticks": [], "greeting": "hello"}}),
                Some(&env),
            )
            .unwrap();
        assert_eq!(output.scalar("initialized"), Some(&json!(true)));
        assert_eq!(env.get("greeting").unwrap().as_json(), Some(&json!("hello")));
        assert_eq!(env.get("ticks").unwrap().as_json(), Some(&json!([])));
    }

    #[test]
    fn test_no_env_is_noop() {
        let output = TableSetFactory::new()
            .create()
            .execute(&NodeOutput::new(), &json!({"tables": {"a": 1}}), None)
            .unwrap();
        assert_eq!(output.scalar("tables"), Some(&json!(["a"])));
    }
}
