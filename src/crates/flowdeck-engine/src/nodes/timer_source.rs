//! Timer stream source: emits incrementing ticks on an interval
//!
//! Messages are `{tick: n}` for n = 0, 1, 2, … delivered from a dedicated
//! thread. With a `count` configured the source stops by itself after that
//! many messages; otherwise it runs until unsubscribed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{json, Value};

use crate::env::TableEnv;
use crate::node::{
    MessageCallback, Node, NodeCategory, NodeFactory, NodeMeta, NodeOutput, Port, StreamSource,
};
use crate::nodes::{cfg, cfg_u64};

pub const TIMER_SOURCE_TYPE: &str = "timer_source";

pub struct TimerSourceFactory {
    meta: NodeMeta,
}

impl TimerSourceFactory {
    pub fn new() -> Self {
        Self {
            meta: NodeMeta {
                id: TIMER_SOURCE_TYPE.to_string(),
                label: "Timer".to_string(),
                category: NodeCategory::StreamSource,
                description: "Emit an incrementing counter on a fixed interval".to_string(),
                inputs: vec![],
                outputs: vec![Port::new("out", "Tick counter")],
                config_schema: json!({
                    "type": "object",
                    "properties": {
                        "interval_ms": {"type": "integer", "title": "Interval (ms)", "default": 1000},
                        "count": {"type": "integer", "title": "Message Count", "description": "Stop after this many ticks; omit for unbounded"},
                    },
                }),
            },
        }
    }
}

impl Default for TimerSourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for TimerSourceFactory {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn create(&self) -> Box<dyn Node> {
        Box::new(TimerNode)
    }

    fn create_source(&self) -> Option<Box<dyn StreamSource>> {
        Some(Box::new(TimerSource::default()))
    }
}

/// Placeholder processing surface; the streaming executor drives the
/// [`StreamSource`] lifecycle instead.
struct TimerNode;

impl Node for TimerNode {
    fn execute(
        &self,
        _inputs: &NodeOutput,
        _config: &Value,
        _env: Option<&TableEnv>,
    ) -> anyhow::Result<NodeOutput> {
        Ok(NodeOutput::new())
    }
}

#[derive(Default)]
pub struct TimerSource {
    interval: Duration,
    count: Option<u64>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamSource for TimerSource {
    fn setup(&mut self, config: &Value) -> anyhow::Result<()> {
        self.interval = Duration::from_millis(cfg_u64(config, "interval_ms", 1000));
        self.count = cfg(config, "count").and_then(Value::as_u64);
        Ok(())
    }

    fn subscribe(&mut self, callback: MessageCallback) -> anyhow::Result<()> {
        if self.handle.is_some() {
            anyhow::bail!("timer source is already subscribed");
        }
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let count = self.count;
        self.handle = Some(std::thread::spawn(move || {
            let mut tick: u64 = 0;
            while running.load(Ordering::SeqCst) {
                if count.is_some_and(|c| tick >= c) {
                    break;
                }
                callback(NodeOutput::new().with_scalar("tick", json!(tick)));
                tick += 1;
                std::thread::sleep(interval);
            }
        }));
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("timer source delivery thread panicked");
            }
        }
    }
}
