//! Schedule trigger node: fires a pipeline on a cron schedule
//!
//! The node itself only emits trigger metadata; the scheduler service scans
//! saved pipelines for this type and owns the actual cron jobs. Presets in
//! the editor are client-side sugar; the config carries a fully expanded
//! 5-field expression.

use chrono::Utc;
use serde_json::{json, Value};

use crate::env::TableEnv;
use crate::node::{Node, NodeCategory, NodeFactory, NodeMeta, NodeOutput, Port};
use crate::nodes::cfg_str;

pub const SCHEDULE_TRIGGER_TYPE: &str = "schedule_trigger";

pub struct ScheduleTriggerFactory {
    meta: NodeMeta,
}

impl ScheduleTriggerFactory {
    pub fn new() -> Self {
        Self {
            meta: NodeMeta {
                id: SCHEDULE_TRIGGER_TYPE.to_string(),
                label: "Schedule".to_string(),
                category: NodeCategory::Trigger,
                description: "Run this pipeline on a cron schedule".to_string(),
                inputs: vec![],
                outputs: vec![Port::new("out", "Trigger metadata")],
                config_schema: json!({
                    "type": "object",
                    "properties": {
                        "cron_expression": {
                            "type": "string",
                            "title": "Cron Expression",
                            "description": "Standard cron (min hour dom mon dow)",
                        },
                        "timezone": {
                            "type": "string",
                            "title": "Timezone",
                            "default": "UTC",
                        },
                        "enabled": {
                            "type": "boolean",
                            "title": "Enabled",
                            "default": true,
                        },
                    },
                    "required": ["cron_expression"],
                }),
            },
        }
    }
}

impl Default for ScheduleTriggerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for ScheduleTriggerFactory {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn create(&self) -> Box<dyn Node> {
        Box::new(ScheduleTriggerNode)
    }
}

struct ScheduleTriggerNode;

impl Node for ScheduleTriggerNode {
    fn execute(
        &self,
        _inputs: &NodeOutput,
        config: &Value,
        _env: Option<&TableEnv>,
    ) -> anyhow::Result<NodeOutput> {
        Ok(NodeOutput::new()
            .with_scalar("triggered_at", json!(Utc::now().to_rfc3339()))
            .with_scalar("cron", json!(cfg_str(config, "cron_expression").unwrap_or_default()))
            .with_scalar("timezone", json!(cfg_str(config, "timezone").unwrap_or("UTC")))
            .with_scalar("scheduled", json!(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta() {
        let factory = ScheduleTriggerFactory::new();
        assert_eq!(factory.meta().id, "schedule_trigger");
        assert_eq!(factory.meta().category, NodeCategory::Trigger);
    }

    #[test]
    fn test_execute_reports_trigger_metadata() {
        let node = ScheduleTriggerFactory::new().create();
        let output = node
            .execute(
                &NodeOutput::new(),
                &json!({"cron_expression": "*/5 * * * *"}),
                None,
            )
            .unwrap();
        assert_eq!(output.scalar("cron"), Some(&json!("*/5 * * * *")));
        assert_eq!(output.scalar("timezone"), Some(&json!("UTC")));
        assert_eq!(output.scalar("scheduled"), Some(&json!(true)));
    }
}
