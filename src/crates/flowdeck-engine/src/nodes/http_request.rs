//! HTTP request node: fetch data from or send data to a URL
//!
//! Fetch mode pulls JSON, optionally extracts a dot-notation path, and
//! normalizes record lists into a table. Send mode posts the upstream
//! table (or the scalar inputs) as a JSON payload.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Map, Value};

use crate::env::TableEnv;
use crate::node::{Node, NodeCategory, NodeFactory, NodeMeta, NodeOutput, Port};
use crate::nodes::{cfg, cfg_f64, cfg_str};
use crate::table::Table;
use crate::table::MemTable;

pub const HTTP_REQUEST_TYPE: &str = "http_request";

const MAX_ECHOED_BODY: usize = 10_000;

pub struct HttpRequestFactory {
    meta: NodeMeta,
}

impl HttpRequestFactory {
    pub fn new() -> Self {
        Self {
            meta: NodeMeta {
                id: HTTP_REQUEST_TYPE.to_string(),
                label: "HTTP Request".to_string(),
                category: NodeCategory::Generic,
                description: "Fetch data from or send data to a URL".to_string(),
                inputs: vec![Port::new("in", "Input data (used in send mode)")],
                outputs: vec![Port::new("out", "Response data")],
                config_schema: json!({
                    "type": "object",
                    "properties": {
                        "mode": {"type": "string", "title": "Mode", "enum": ["fetch", "send"], "default": "fetch"},
                        "url": {"type": "string", "title": "URL"},
                        "method": {"type": "string", "title": "Method", "enum": ["GET", "POST", "PUT", "DELETE"], "default": "GET"},
                        "headers": {
                            "type": "array",
                            "title": "Headers",
                            "items": {"type": "object", "properties": {"key": {"type": "string"}, "value": {"type": "string"}}},
                        },
                        "body": {"type": "string", "title": "Body", "description": "Request body (POST/PUT in fetch mode)"},
                        "json_path": {"type": "string", "title": "JSON Path", "description": "Dot-notation path to extract (e.g. data.results)"},
                        "timeout": {"type": "number", "title": "Timeout (seconds)", "default": 30},
                    },
                    "required": ["url"],
                }),
            },
        }
    }
}

impl Default for HttpRequestFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for HttpRequestFactory {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn create(&self) -> Box<dyn Node> {
        Box::new(HttpRequestNode)
    }
}

struct HttpRequestNode;

impl Node for HttpRequestNode {
    fn execute(
        &self,
        inputs: &NodeOutput,
        config: &Value,
        _env: Option<&TableEnv>,
    ) -> anyhow::Result<NodeOutput> {
        let url = cfg_str(config, "url").context("http_request requires a 'url' config value")?;
        let mode = cfg_str(config, "mode").unwrap_or("fetch");
        let method = cfg_str(config, "method").unwrap_or("GET").to_uppercase();
        let timeout = Duration::from_secs_f64(cfg_f64(config, "timeout", 30.0));

        let mut headers: Vec<(String, String)> = Vec::new();
        if let Some(entries) = cfg(config, "headers").and_then(Value::as_array) {
            for entry in entries {
                if let Some(key) = entry.get("key").and_then(Value::as_str) {
                    if key.is_empty() {
                        continue;
                    }
                    let value = entry.get("value").and_then(Value::as_str).unwrap_or("");
                    headers.push((key.to_string(), value.to_string()));
                }
            }
        }

        match mode {
            "send" => send(inputs, url, &method, &headers, timeout),
            _ => fetch(
                url,
                &method,
                &headers,
                cfg_str(config, "body"),
                cfg_str(config, "json_path"),
                timeout,
            ),
        }
    }
}

fn client(timeout: Duration) -> anyhow::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

fn apply_headers(
    mut request: reqwest::blocking::RequestBuilder,
    headers: &[(String, String)],
) -> reqwest::blocking::RequestBuilder {
    for (key, value) in headers {
        request = request.header(key, value);
    }
    request
}

fn fetch(
    url: &str,
    method: &str,
    headers: &[(String, String)],
    body: Option<&str>,
    json_path: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<NodeOutput> {
    let client = client(timeout)?;
    let method: reqwest::Method = method.parse().context("invalid HTTP method")?;
    let mut request = apply_headers(client.request(method.clone(), url), headers);

    if let Some(body) = body {
        if method == reqwest::Method::POST || method == reqwest::Method::PUT {
            // JSON bodies go out as JSON; anything else is sent verbatim.
            match serde_json::from_str::<Value>(body) {
                Ok(parsed) => request = request.json(&parsed),
                Err(_) => request = request.body(body.to_string()),
            }
        }
    }

    let response = request
        .send()
        .with_context(|| format!("request to {url} failed"))?
        .error_for_status()?;
    let mut data: Value = response.json().context("response was not valid JSON")?;

    if let Some(path) = json_path {
        data = navigate_json_path(data, path)?;
    }

    // Normalize to a record list for table conversion.
    let records: Vec<Map<String, Value>> = match data {
        Value::Object(map) => vec![map],
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(map) => records.push(map),
                    other => {
                        return Ok(NodeOutput::new()
                            .with_scalar("raw", Value::Array(vec![other]))
                            .with_scalar("rows", json!(0))
                            .with_scalar("columns", json!([])))
                    }
                }
            }
            records
        }
        other => {
            return Ok(NodeOutput::new()
                .with_scalar("raw", other)
                .with_scalar("rows", json!(0))
                .with_scalar("columns", json!([])))
        }
    };

    let table = MemTable::from_records(&records)?;
    let columns = table.columns();
    let rows = table.len();
    Ok(NodeOutput::new()
        .with_table(Arc::new(table))
        .with_scalar("rows", json!(rows))
        .with_scalar("columns", json!(columns)))
}

fn send(
    inputs: &NodeOutput,
    url: &str,
    method: &str,
    headers: &[(String, String)],
    timeout: Duration,
) -> anyhow::Result<NodeOutput> {
    let payload: Value = match &inputs.df {
        Some(table) => json!(table.to_dict()),
        None => Value::Object(inputs.scalars.clone()),
    };

    // GET makes no sense for an outbound payload; default to POST.
    let method = if method == "GET" { "POST" } else { method };
    let method: reqwest::Method = method.parse().context("invalid HTTP method")?;

    let client = client(timeout)?;
    let response = apply_headers(client.request(method, url), headers)
        .json(&payload)
        .send()
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    let mut body = response.text().unwrap_or_default();
    body.truncate(MAX_ECHOED_BODY);

    let mut output = NodeOutput::from_scalars(inputs.scalars.clone());
    output
        .scalars
        .insert("status_code".to_string(), json!(status.as_u16()));
    output
        .scalars
        .insert("success".to_string(), json!(status.is_success()));
    output
        .scalars
        .insert("response_body".to_string(), json!(body));
    Ok(output)
}

/// Navigate a dot-separated path into a nested JSON structure. Numeric
/// segments index into arrays.
fn navigate_json_path(mut data: Value, path: &str) -> anyhow::Result<Value> {
    for key in path.split('.') {
        data = match data {
            Value::Object(mut map) => map
                .remove(key)
                .with_context(|| format!("key '{key}' not found in response object"))?,
            Value::Array(mut items) => {
                let index: usize = key
                    .parse()
                    .with_context(|| format!("cannot navigate '{key}' in an array"))?;
                if index >= items.len() {
                    anyhow::bail!("index {index} out of range in response array");
                }
                items.swap_remove(index)
            }
            other => anyhow::bail!(
                "cannot navigate '{key}' in {}",
                match other {
                    Value::Null => "null",
                    Value::Bool(_) => "a boolean",
                    Value::Number(_) => "a number",
                    Value::String(_) => "a string",
                    _ => "a value",
                }
            ),
        };
    }
    Ok(data)
}
