//! HTML to plain text.

use scraper::{Html, Node};

/// Elements whose text never counts as content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// In-page extraction: prefer a main-content container, drop chrome and ads.
pub const BROWSER_EXTRACT_SCRIPT: &str = r#"
(() => {
    try {
        if (!document || !document.body) return "";
        const clone = document.body.cloneNode(true);
        clone.querySelectorAll('script, style, noscript, iframe, nav, footer, header, aside, .nav, .menu, .sidebar, .advertisement, .ad, .banner, .cookie, .popup, .modal')
            .forEach(el => { try { el.remove(); } catch (e) {} });
        const main = clone.querySelector('main, article, .content, #content, .main-content, .post-content, .entry-content, .article-content, [role="main"]');
        if (main && main.innerText && main.innerText.trim()) return main.innerText.trim();
        return clone.innerText ? clone.innerText.trim() : "";
    } catch (e) {
        try { return document.body ? document.body.innerText.trim() : ""; } catch (_) { return ""; }
    }
})()
"#;

/// Strip tags from an HTML document, skipping script and style bodies.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !skipped {
            parts.push(text);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
