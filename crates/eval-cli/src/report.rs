//! HTML report
//!
//! Renders a list of run artifacts into one self-contained page. Templates
//! are Tera with autoescaping; only the Markdown-rendered assistant text is
//! emitted unescaped.

use anyhow::Context as _;
use eval_core::{ContentBlock, Message, Role, RunArtifact};
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};
use serde::Serialize;
use serde_json::Value;
use tera::{Context, Tera};

const TEMPLATE_NAME: &str = "report.html";

const TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>mcp-eval Report</title>
  <style>
  * { font-family: sans-serif; }
  body { display: flex; justify-content: center; }
  .container { max-width: 1024px; }
  .outline { border: black solid 1px; margin: 4px; padding: 8px 12px; }
  .error { border-color: #b00020; }
  code { background-color: #f5f5f5; padding: 2px 4px; border-radius: 4px; }
  pre { background-color: #f5f5f5; padding: 10px; border-radius: 5px; white-space: pre-wrap; overflow-x: auto; }
  </style>
</head>
<body>
<div class="container">
<h1>mcp-eval Report</h1>

<div class="outline">
{% if header %}
  <p>Run at: <code>{{ header.run_at }}</code></p>
  <p>Model: <code>{{ header.model }}</code></p>
  <p>Server version: <code>{{ header.server_version }}</code></p>
{% else %}
  <p>No results.</p>
{% endif %}
</div>

<div>
  <p>jump to prompt:</p>
  <ul>
  {% for prompt in prompts %}
    <li><a href="#{{ prompt.slug }}">{{ prompt.slug }}</a></li>
  {% endfor %}
  </ul>
</div>

{% for prompt in prompts %}
<div>
<h1 id="{{ prompt.slug }}">{{ prompt.slug }}</h1>
<p><a href="{{ prompt.slug }}.json">raw json record</a></p>
{% for entry in prompt.entries %}
<div class="outline{% if entry.is_error %} error{% endif %}">
{% if entry.kind == "user_text" %}
  <div class="userText">
    <p><strong>&lt;user&gt;</strong> {{ entry.text }}</p>
  </div>
{% elif entry.kind == "tool_result" %}
  <div class="userToolResult">
    <strong>&lt;tool result{% if entry.is_error %} (error){% endif %}&gt;</strong>
    <details>
      <summary>show</summary>
      <pre>{{ entry.text }}</pre>
    </details>
  </div>
{% elif entry.kind == "assistant_text" %}
  <div class="assistantText">
    <p><strong>&lt;llm&gt;</strong></p>
    {{ entry.html | safe }}
  </div>
{% elif entry.kind == "tool_call" %}
  <div class="assistantToolUse">
    <p><strong>&lt;tool call&gt;</strong> <code>{{ entry.name }}</code> with</p>
    <pre>{{ entry.text }}</pre>
  </div>
{% else %}
  <div class="unexpected">
    <p>Unexpected {{ entry.role }} content:</p>
    <pre>{{ entry.text }}</pre>
  </div>
{% endif %}
</div>
{% endfor %}
</div>
{% endfor %}
</div>
</body>
</html>
"##;

#[derive(Debug, Serialize)]
struct Header {
    run_at: String,
    model: String,
    server_version: String,
}

/// One rendered block of a transcript
#[derive(Debug, Default, Serialize)]
struct Entry {
    kind: &'static str,
    role: &'static str,
    /// Escaped by the template
    text: String,
    /// Trusted HTML, assistant text only
    html: String,
    name: String,
    is_error: bool,
}

#[derive(Debug, Serialize)]
struct PromptView {
    slug: String,
    entries: Vec<Entry>,
}

#[derive(Debug, Serialize)]
struct ReportView {
    header: Option<Header>,
    prompts: Vec<PromptView>,
}

/// Render artifacts, in the given order, to an HTML page
pub fn render(artifacts: &[RunArtifact]) -> anyhow::Result<String> {
    let view = ReportView {
        header: artifacts.first().map(|first| Header {
            run_at: first.run_at.to_rfc3339(),
            model: first.model_config.model.clone(),
            server_version: first.server_version.clone(),
        }),
        prompts: artifacts
            .iter()
            .map(|artifact| PromptView {
                slug: artifact.prompt.slug.clone(),
                entries: artifact.raw_messages.messages().iter().flat_map(render_message).collect(),
            })
            .collect(),
    };

    let mut tera = Tera::default();
    tera.add_raw_template(TEMPLATE_NAME, TEMPLATE)
        .context("Invalid report template")?;
    let context = Context::from_serialize(&view).context("Failed to build report context")?;
    tera.render(TEMPLATE_NAME, &context).context("Failed to render report")
}

fn render_message(message: &Message) -> Vec<Entry> {
    message
        .blocks()
        .iter()
        .map(|block| match (message.role, block) {
            (Role::User, ContentBlock::Text { text }) => Entry {
                kind: "user_text",
                text: text.clone(),
                ..Entry::default()
            },
            (Role::User, ContentBlock::ToolResult { content, is_error, .. }) => Entry {
                kind: "tool_result",
                text: tool_result_body(content),
                is_error: *is_error,
                ..Entry::default()
            },
            (Role::Assistant, ContentBlock::Text { text }) => Entry {
                kind: "assistant_text",
                html: markdown_to_html(text),
                ..Entry::default()
            },
            (Role::Assistant, ContentBlock::ToolUse { name, input, .. }) => Entry {
                kind: "tool_call",
                name: name.clone(),
                text: pretty(input),
                ..Entry::default()
            },
            (role, other) => Entry {
                kind: "unexpected",
                role: match role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                text: pretty(&serde_json::to_value(other).unwrap_or(Value::Null)),
                ..Entry::default()
            },
        })
        .collect()
}

/// First text block, pretty-printed if it holds JSON; the raw blocks otherwise
fn tool_result_body(content: &[ContentBlock]) -> String {
    match content.first() {
        Some(ContentBlock::Text { text }) => serde_json::from_str::<Value>(text).map_or_else(|_| text.clone(), |v| pretty(&v)),
        Some(_) => pretty(&serde_json::to_value(content).unwrap_or(Value::Null)),
        None => "(empty)".into(),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Markdown to HTML; raw HTML in the source is shown as text and link or
/// image targets with a scheme other than http(s)/mailto are dropped
fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_url(dest_url),
            title,
            id,
        }),
        other => other,
    });
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Keep relative targets and http, https or mailto URLs; anything else becomes `#`
fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    let trimmed = url.trim_start();
    let scheme = trimmed
        .find(|c: char| matches!(c, ':' | '/' | '?' | '#'))
        .filter(|&i| trimmed[i..].starts_with(':'))
        .map(|i| trimmed[..i].to_ascii_lowercase());
    match scheme.as_deref() {
        None | Some("http" | "https" | "mailto") => url,
        Some(_) => CowStr::Borrowed("#"),
    }
}
