//! HTML to readable text, plus the page's outgoing links.

use std::sync::LazyLock;

use radar_storage::{BlockingError, BlockingPool};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid title selector"));
static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid anchor selector"));
static BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("valid body selector"));

const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "nav", "footer", "header", "svg", "template", "iframe",
];

const BLOCK: &[&str] = &[
    "p", "div", "section", "article", "main", "aside", "li", "ul", "ol", "tr", "table", "h1",
    "h2", "h3", "h4", "h5", "h6", "br", "hr", "blockquote", "pre", "dd", "dt", "form",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageText {
    pub url: String,
    pub title: String,
    pub text: String,
    /// Absolute link targets in document order, duplicates included.
    pub links: Vec<String>,
}

pub fn extract_page(html: &str, page_url: &str) -> PageText {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default();

    let links = document
        .select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_href(base.as_ref(), href))
        .collect();

    let mut raw = String::new();
    match document.select(&BODY).next() {
        Some(body) => collect_text(body, &mut raw),
        None => collect_text(document.root_element(), &mut raw),
    }

    PageText {
        url: page_url.to_string(),
        title,
        text: tidy_lines(&raw),
        links,
    }
}

/// Parses on the blocking pool; `Html` is not `Send` and parsing is CPU-bound.
pub async fn extract_page_in(
    pool: &BlockingPool,
    html: String,
    page_url: String,
) -> Result<PageText, BlockingError> {
    pool.run(move || extract_page(&html, &page_url)).await
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED.contains(&name) {
        return;
    }
    let block = BLOCK.contains(&name);
    if block {
        out.push('\n');
    }
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            collect_text(child_element, out);
        } else if let Node::Text(text) = child.value() {
            let collapsed = collapse_whitespace(text);
            if !collapsed.is_empty() {
                out.push_str(&collapsed);
                out.push(' ');
            }
        }
    }
    if block {
        out.push('\n');
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tidy_lines(raw: &str) -> String {
    raw.lines()
        .map(collapse_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn resolve_href(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") || lower.starts_with("tel:") {
        return None;
    }
    let resolved = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
        <html><head><title> Open Calls | Studio </title><style>.x{}</style></head>
        <body>
          <header>Site menu</header>
          <nav><a href="/about">About</a></nav>
          <main>
            <h1>Residencies</h1>
            <p>Three month   residency with
               stipend.</p>
            <ul><li><a href="/calls/42?ref=nav">Call 42</a></li>
                <li><a href="https://other.org/x">Elsewhere</a></li>
                <li><a href="#top">Top</a></li>
                <li><a href="mailto:hi@studio.org">Mail</a></li></ul>
            <script>var cf = 1;</script>
          </main>
          <footer>Copyright</footer>
        </body></html>"##;

    #[test]
    fn strips_chrome_and_keeps_block_structure() {
        let page = extract_page(PAGE, "https://studio.org/open/");
        assert_eq!(page.title, "Open Calls | Studio");
        assert_eq!(
            page.text,
            "Residencies\nThree month residency with stipend.\nCall 42\nElsewhere\nTop\nMail"
        );
        assert!(!page.text.contains("Site menu"));
        assert!(!page.text.contains("var cf"));
    }

    #[test]
    fn links_are_absolute_and_filtered() {
        let page = extract_page(PAGE, "https://studio.org/open/");
        assert_eq!(
            page.links,
            vec![
                "https://studio.org/about".to_string(),
                "https://studio.org/calls/42?ref=nav".to_string(),
                "https://other.org/x".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn parsing_runs_on_the_blocking_pool() {
        let pool = BlockingPool::new(1);
        let page = extract_page_in(&pool, PAGE.to_string(), "https://studio.org/".to_string())
            .await
            .expect("parse");
        assert_eq!(page.url, "https://studio.org/");
        assert!(page.text.starts_with("Residencies"));
    }
}
