//! Markdown rendering of tool results
//!
//! Every tool answers with markdown text; the same rendering serves MCP
//! content blocks and CLI stdout.

use autoreply_repo::Repo;
use autoreply_repo::records::{PostRecord, Record, RecordValue, collections};
use serde_json::Value;

/// Render an account profile from its decoded repository
pub fn profile(repo: &Repo) -> String {
    let mut out = String::new();
    let profile = repo
        .records_of(collections::PROFILE)
        .find_map(|record| match &record.value {
            RecordValue::Profile(profile) => Some(profile),
            _ => None,
        });

    let display_name = profile
        .and_then(|p| p.display_name.as_deref())
        .unwrap_or("(no display name)");
    out.push_str(&format!("# {display_name}\n\n"));
    out.push_str(&format!("- **did**: `{}`\n", repo.did()));
    out.push_str(&format!(
        "- **posts**: {}\n- **likes**: {}\n- **reposts**: {}\n",
        repo.records_of(collections::POST).count(),
        repo.records_of(collections::LIKE).count(),
        repo.records_of(collections::REPOST).count(),
    ));
    if let Some(created_at) = profile.and_then(|p| p.created_at.as_deref()) {
        out.push_str(&format!("- **created**: {created_at}\n"));
    }
    if let Some(description) = profile.and_then(|p| p.description.as_deref()) {
        out.push_str(&format!("\n{description}\n"));
    }
    if repo.skipped_records() > 0 {
        out.push_str(&format!(
            "\n_{} records skipped during decoding_\n",
            repo.skipped_records()
        ));
    }
    out
}

/// Render scored search hits
pub fn search_results(
    did: &str,
    query: &str,
    hits: &[(usize, &Record, &PostRecord)],
) -> String {
    if hits.is_empty() {
        return format!("No posts matching `{query}`.\n");
    }
    let mut out = format!("# Search: `{query}`\n\n");
    for (score, record, post) in hits {
        let when = post.created_at.as_deref().unwrap_or("unknown time");
        out.push_str(&format!(
            "- ({score}) {when}: {}\n  `{}`\n",
            summarize(&post.text),
            record.at_uri(did),
        ));
    }
    out
}

/// Render an appview feed response (`getFeed`/`getTimeline`)
pub fn feed(value: &Value) -> String {
    let mut out = String::from("# Feed\n\n");
    for item in value["feed"].as_array().into_iter().flatten() {
        let post = &item["post"];
        let author = post["author"]["handle"].as_str().unwrap_or("unknown");
        let text = post["record"]["text"].as_str().unwrap_or("");
        let when = post["record"]["createdAt"].as_str().unwrap_or("");
        out.push_str(&format!("- **@{author}** {when}\n  {}\n", summarize(text)));
        if let Some(uri) = post["uri"].as_str() {
            out.push_str(&format!("  `{uri}`\n"));
        }
    }
    if let Some(cursor) = value["cursor"].as_str() {
        out.push_str(&format!("\ncursor: `{cursor}`\n"));
    }
    out
}

/// Render an appview thread response (`getPostThread`)
pub fn thread(value: &Value) -> String {
    let mut out = String::from("# Thread\n\n");
    render_thread_node(&value["thread"], 0, &mut out);
    out
}

fn render_thread_node(node: &Value, depth: usize, out: &mut String) {
    if node["notFound"].as_bool() == Some(true) {
        out.push_str(&format!("{}- _post not found_\n", "  ".repeat(depth)));
        return;
    }
    if node["blocked"].as_bool() == Some(true) {
        out.push_str(&format!("{}- _post blocked_\n", "  ".repeat(depth)));
        return;
    }
    let post = &node["post"];
    if post.is_object() {
        let author = post["author"]["handle"].as_str().unwrap_or("unknown");
        let text = post["record"]["text"].as_str().unwrap_or("");
        out.push_str(&format!(
            "{}- **@{author}**: {}\n",
            "  ".repeat(depth),
            summarize(text)
        ));
    }
    for reply in node["replies"].as_array().into_iter().flatten() {
        render_thread_node(reply, depth + 1, out);
    }
}

fn summarize(text: &str) -> String {
    let flattened = text.replace('\n', " ");
    let mut chars = flattened.chars();
    let short: String = chars.by_ref().take(200).collect();
    if chars.next().is_some() {
        format!("{short}…")
    } else {
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feed_renders_items_and_cursor() {
        let value = json!({
            "feed": [
                {"post": {
                    "uri": "at://did:plc:a/app.bsky.feed.post/1",
                    "author": {"handle": "alice.bsky.social"},
                    "record": {"text": "hello", "createdAt": "2024-01-01T00:00:00Z"},
                }},
            ],
            "cursor": "abc",
        });
        let rendered = feed(&value);
        assert!(rendered.contains("@alice.bsky.social"));
        assert!(rendered.contains("hello"));
        assert!(rendered.contains("cursor: `abc`"));
    }

    #[test]
    fn thread_renders_nested_replies() {
        let value = json!({
            "thread": {
                "post": {"author": {"handle": "a.test"}, "record": {"text": "root"}},
                "replies": [
                    {
                        "post": {"author": {"handle": "b.test"}, "record": {"text": "child"}},
                        "replies": [],
                    },
                    {"notFound": true},
                ],
            },
        });
        let rendered = thread(&value);
        let root_pos = rendered.find("@a.test").unwrap();
        let child_pos = rendered.find("@b.test").unwrap();
        assert!(root_pos < child_pos);
        assert!(rendered.contains("_post not found_"));
    }

    #[test]
    fn summarize_truncates_long_text() {
        let long = "x".repeat(400);
        let short = summarize(&long);
        assert!(short.chars().count() <= 201);
        assert!(short.ends_with('…'));
    }
}
