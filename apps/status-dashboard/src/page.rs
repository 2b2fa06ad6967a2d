use super::*;

use axum::extract::State;
use axum::response::Html;

use crate::document::{StatusDocument, load_document};

const PAGE_HEADER: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>RFMailNet Status Dashboard</title>
<style>
body { font-family: Arial, sans-serif; background:#111; color:#eee; text-align:center; }
table { margin:20px auto; border-collapse:collapse; width:80%; }
th, td { border:1px solid #444; padding:10px; }
th { background:#222; }
td { background:#1a1a1a; }
h1 { color:#00bcd4; }
.error { color: #ff6666; }
</style>
</head>
<body>
<h1>RFMailNet Status Dashboard</h1>
"#;

const PAGE_FOOTER: &str = "</body>\n</html>\n";

pub(crate) async fn status_page(State(state): State<DashboardState>) -> Html<String> {
    let hub = load_document(&state.config.hub_path).await;
    let node = load_document(&state.config.node_path).await;
    Html(render_page(&hub, &node))
}

pub(crate) fn render_page(hub: &StatusDocument, node: &StatusDocument) -> String {
    let mut page = String::from(PAGE_HEADER);
    push_section(&mut page, "Hub Status", hub);
    push_section(&mut page, "Node Status", node);
    page.push_str(PAGE_FOOTER);
    page
}

fn push_section(page: &mut String, heading: &str, doc: &StatusDocument) {
    page.push_str(&format!("\n<h2>{heading}</h2>\n<table>\n"));
    match doc {
        StatusDocument::Error(message) => {
            page.push_str(&format!(
                "<tr><td class=\"error\">{}</td></tr>\n",
                escape_html(message)
            ));
        }
        StatusDocument::Data(pairs) => {
            for (key, value) in pairs {
                page.push_str(&format!(
                    "<tr><th>{}</th><td>{}</td></tr>\n",
                    escape_html(key),
                    escape_html(value)
                ));
            }
        }
    }
    page.push_str("</table>\n");
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
