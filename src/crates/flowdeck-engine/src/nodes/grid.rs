//! Data grid output node
//!
//! Flattens the first page of its input into `{rows, columns, total}` for
//! display. Accepts either an upstream table handle or pre-flattened rows
//! (the shape streaming sources often emit).

use serde_json::{json, Value};

use crate::env::TableEnv;
use crate::node::{Node, NodeCategory, NodeFactory, NodeMeta, NodeOutput, Port};
use crate::nodes::cfg_u64;
use crate::table::page_rows;

pub const GRID_TYPE: &str = "grid";

pub struct GridFactory {
    meta: NodeMeta,
}

impl GridFactory {
    pub fn new() -> Self {
        Self {
            meta: NodeMeta {
                id: GRID_TYPE.to_string(),
                label: "Data Grid".to_string(),
                category: NodeCategory::Output,
                description: "Display data as an interactive table".to_string(),
                inputs: vec![Port::new("in", "Dataframe to display")],
                outputs: vec![],
                config_schema: json!({
                    "type": "object",
                    "properties": {
                        "page_size": {"type": "integer", "title": "Page Size", "default": 100},
                    },
                }),
            },
        }
    }
}

impl Default for GridFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for GridFactory {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn create(&self) -> Box<dyn Node> {
        Box::new(GridNode)
    }
}

struct GridNode;

impl Node for GridNode {
    fn execute(
        &self,
        inputs: &NodeOutput,
        config: &Value,
        _env: Option<&TableEnv>,
    ) -> anyhow::Result<NodeOutput> {
        let page_size = cfg_u64(config, "page_size", 100) as usize;

        // Pre-flattened rows take precedence over a table handle.
        if let (Some(Value::Array(rows)), Some(columns)) =
            (inputs.scalar("rows"), inputs.scalar("columns"))
        {
            let total = inputs
                .scalar("total")
                .and_then(Value::as_u64)
                .unwrap_or(rows.len() as u64);
            let page: Vec<Value> = rows.iter().take(page_size).cloned().collect();
            return Ok(NodeOutput::new()
                .with_scalar("rows", Value::Array(page))
                .with_scalar("columns", columns.clone())
                .with_scalar("total", json!(total)));
        }

        let Some(table) = &inputs.df else {
            return Ok(NodeOutput::new()
                .with_scalar("rows", json!([]))
                .with_scalar("columns", json!([]))
                .with_scalar("total", json!(0)));
        };

        let total = table.len();
        let (rows, columns) = page_rows(table.as_ref(), 0, total.min(page_size));
        Ok(NodeOutput::new()
            .with_scalar("rows", Value::Array(rows))
            .with_scalar("columns", json!(columns))
            .with_scalar("total", json!(total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MemTable;
    use std::sync::Arc;

    #[test]
    fn test_grid_pages_table_input() {
        let table = MemTable::from_columns(vec![(
            "x".to_string(),
            (0..10).map(|i| json!(i)).collect(),
        )])
        .unwrap();
        let inputs = NodeOutput::new().with_table(Arc::new(table));
        let output = GridFactory::new()
            .create()
            .execute(&inputs, &json!({"page_size": 3}), None)
            .unwrap();
        assert_eq!(output.scalar("total"), Some(&json!(10)));
        assert_eq!(output.scalar("rows").unwrap().as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_grid_passes_through_flattened_rows() {
        let inputs = NodeOutput::new()
            .with_scalar("rows", json!([{"x": 1}, {"x": 2}]))
            .with_scalar("columns", json!(["x"]))
            .with_scalar("total", json!(2));
        let output = GridFactory::new()
            .create()
            .execute(&inputs, &json!({}), None)
            .unwrap();
        assert_eq!(output.scalar("rows"), Some(&json!([{"x": 1}, {"x": 2}])));
        assert_eq!(output.scalar("total"), Some(&json!(2)));
    }

    #[test]
    fn test_grid_empty_input() {
        let output = GridFactory::new()
            .create()
            .execute(&NodeOutput::new(), &json!({}), None)
            .unwrap();
        assert_eq!(output.scalar("total"), Some(&json!(0)));
    }
}
