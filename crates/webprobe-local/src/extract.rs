use std::io::Cursor;

/// Line width used for markdown rendering.
pub const MARKDOWN_WIDTH: usize = 78;

/// Convert HTML to markdown-like text: headings become `#`, links and emphasis keep their
/// markdown syntax.
///
/// Notes:
/// - This is "good enough" and deterministic, not a full readability engine.
/// - Input that html2text cannot render comes back unchanged.
pub fn html_to_markdown(html: &str, width: usize) -> String {
    // html2text expects bytes; Cursor avoids allocating a second large buffer.
    html2text::from_read(Cursor::new(html.as_bytes()), width).unwrap_or_else(|_| html.to_string())
}

/// Visible text of an HTML document.
///
/// `script` and `style` subtrees are dropped; every remaining text node is trimmed, empty ones
/// are skipped, and the rest are joined with `\n`.
pub fn html_visible_text(html: &str) -> String {
    let doc = html_scraper::Html::parse_document(html);
    let mut lines: Vec<&str> = Vec::new();
    for node in doc.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let t = text.trim();
        if t.is_empty() {
            continue;
        }
        let dropped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|el| matches!(el.name(), "script" | "style"))
                .unwrap_or(false)
        });
        if dropped {
            continue;
        }
        lines.push(t);
    }
    lines.join("\n")
}
