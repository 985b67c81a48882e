//! HTML for the question form and the ask page.

use serde_json::{Map, Value};

use crate::models::ask::form_pairs;
use crate::models::job::JobRecord;
use crate::services::status::POLL_INTERVAL;

const INDEX_HTML: &str = include_str!("../../static/index.html");
const ASK_HTML: &str = include_str!("../../static/ask.html");

pub fn index_page(base_path: &str) -> String {
    render(INDEX_HTML, &[("base_path", html_escape(base_path))])
}

/// Page showing a job record, polling until the job finishes.
pub fn ask_page(base_path: &str, id: &str, record: &JobRecord) -> String {
    let fields = display_fields(base_path, record);

    let record_html: String = fields
        .iter()
        .map(|(key, value)| {
            format!(
                "<div id=\"{}\">{}</div>",
                html_escape(key),
                format_field(key, value)
            )
        })
        .collect();

    render(
        ASK_HTML,
        &[
            ("record_html", record_html),
            ("base_path_json", script_json(&Value::from(base_path))),
            ("question_id_json", script_json(&Value::from(id))),
            ("poll_ms", POLL_INTERVAL.as_millis().to_string()),
            ("record_json", script_json(&Value::Object(fields))),
        ],
    )
}

/// Record fields as shown to the browser, with file names made into links
/// under the base path.
fn display_fields(base_path: &str, record: &JobRecord) -> Map<String, Value> {
    let mut fields = match serde_json::to_value(record) {
        Ok(Value::Object(fields)) => fields,
        _ => Map::new(),
    };
    for (key, value) in fields.iter_mut() {
        if !key.ends_with("_file_name") {
            continue;
        }
        if let Some(path) = value.as_str() {
            let linked = build_path(base_path, path);
            *value = Value::from(linked);
        }
    }
    fields
}

fn format_field(key: &str, value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    if key == "input" {
        let pairs = form_pairs(&text);
        let shown = if pairs.is_empty() {
            html_escape(&text)
        } else {
            pairs
                .iter()
                .map(|(k, v)| format!("{}: {}", html_escape(k), html_escape(v)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        return format!("input: {shown}");
    }

    if key == "overpass_query" {
        return format!("{key}:<br/><code>{}</code>", html_escape(&text));
    }

    if key.ends_with("_file_name") {
        let label = text.rsplit('/').next().unwrap_or(text.as_str());
        return format!(
            "{}: <a target=\"_blank\" href=\"{}\">{}</a>",
            html_escape(key),
            html_escape(&text),
            html_escape(label)
        );
    }

    format!("{}: {}", html_escape(key), html_escape(&text))
}

/// Prefix `path` with the base path, making it absolute.
pub fn build_path(base_path: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{base_path}{path}")
    } else {
        format!("{base_path}/{path}")
    }
}

/// Fill `{{name}}` placeholders in one pass; substituted text is never
/// scanned again. Unknown placeholders are left as they are.
fn render(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = &after[..end];
                match values.iter().find(|(key, _)| *key == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// JSON safe to embed in a `<script>` block.
fn script_json(value: &Value) -> String {
    value.to_string().replace('<', "\\u003c")
}
