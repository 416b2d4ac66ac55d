//! Page text extraction.
//!
//! Turns a fetched payload into an [`ExtractedPage`]: a title, readable
//! plain text, and the same-host links worth following.
//!
//! HTML is parsed with `scraper` and walked element by element:
//!
//! - content comes from `<main>`, else `<article>`, else `<body>`;
//! - `script`, `style`, `nav`, `header`, `footer`, `aside`, `noscript`
//!   (and a few other non-content tags) are dropped with their subtree;
//! - block elements become paragraph breaks, headings are rendered as
//!   markdown `#` lines, `<pre>` text is kept verbatim;
//! - the title is `<title>`, else the first `<h1>`, else the URL.
//!
//! Anything else (markdown, plain text) is used verbatim, titled by its
//! first `# ` heading.

use scraper::node::Node;
use scraper::{ElementRef, Html};
use std::collections::HashSet;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub title: String,
    pub content: String,
    /// Absolute, fragment-free, same-host http(s) links in document order.
    pub links: Vec<String>,
}

const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "template", "svg",
    "iframe", "form", "button",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "ul", "ol", "li", "table", "tr", "blockquote",
    "dl", "dt", "dd", "figure", "figcaption", "hr", "details", "summary",
];

/// Extract from a payload given the response `Content-Type` (may be empty).
pub fn extract(body: &str, content_type: &str, page_url: &Url) -> ExtractedPage {
    if is_html(body, content_type) {
        extract_html(body, page_url)
    } else {
        extract_text(body, page_url)
    }
}

fn is_html(body: &str, content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("html") {
        return true;
    }
    if ct.starts_with("text/markdown") || ct.starts_with("text/plain") {
        return false;
    }
    let head = body.trim_start();
    let prefix: String = head.chars().take(15).collect::<String>().to_ascii_lowercase();
    prefix.starts_with("<!doctype html") || prefix.starts_with("<html")
}

fn extract_text(body: &str, page_url: &Url) -> ExtractedPage {
    let title = body
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title_from_url(page_url));

    ExtractedPage {
        title,
        content: body.trim().to_string(),
        links: Vec::new(),
    }
}

fn extract_html(body: &str, page_url: &Url) -> ExtractedPage {
    let doc = Html::parse_document(body);
    let root = doc.root_element();

    let elements: Vec<ElementRef> = root.descendants().filter_map(ElementRef::wrap).collect();
    let first = |name: &str| elements.iter().find(|e| e.value().name() == name).copied();

    let title = first("title")
        .map(element_text)
        .filter(|t| !t.is_empty())
        .or_else(|| first("h1").map(element_text).filter(|t| !t.is_empty()))
        .unwrap_or_else(|| title_from_url(page_url));

    let content_root = first("main")
        .or_else(|| first("article"))
        .or_else(|| first("body"))
        .unwrap_or(root);

    let mut out = TextBuilder::default();
    render(content_root, &mut out);

    ExtractedPage {
        title,
        content: out.finish(),
        links: collect_links(&elements, page_url),
    }
}

fn element_text(el: ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn render(el: ElementRef, out: &mut TextBuilder) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_inline(text),
            Node::Element(_) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = child_el.value().name();
                if SKIP_TAGS.contains(&name) {
                    continue;
                }
                match name {
                    "br" => out.push_newline(),
                    "pre" => {
                        out.push_break();
                        out.push_raw(&child_el.text().collect::<String>());
                        out.push_break();
                    }
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        let level = name[1..].parse::<usize>().unwrap_or(1);
                        let text = element_text(child_el);
                        if !text.is_empty() {
                            out.push_break();
                            out.push_raw(&format!("{} {}", "#".repeat(level), text));
                            out.push_break();
                        }
                    }
                    _ if BLOCK_TAGS.contains(&name) => {
                        out.push_break();
                        render(child_el, out);
                        out.push_break();
                    }
                    _ => render(child_el, out),
                }
            }
            _ => {}
        }
    }
}

#[derive(Default)]
struct TextBuilder {
    buf: String,
    pending_space: bool,
}

impl TextBuilder {
    fn push_inline(&mut self, text: &str) {
        let starts_ws = text.starts_with(char::is_whitespace);
        let mut words = text.split_whitespace().peekable();
        if words.peek().is_none() {
            if !text.is_empty() {
                self.pending_space = true;
            }
            return;
        }
        if (starts_ws || self.pending_space) && !self.at_line_start() {
            self.buf.push(' ');
        }
        let mut first = true;
        for word in words {
            if !first {
                self.buf.push(' ');
            }
            self.buf.push_str(word);
            first = false;
        }
        self.pending_space = text.ends_with(char::is_whitespace);
    }

    fn push_raw(&mut self, text: &str) {
        self.buf.push_str(text.trim_matches('\n'));
        self.pending_space = false;
    }

    fn push_newline(&mut self) {
        self.trim_trailing_spaces();
        if !self.buf.is_empty() && !self.buf.ends_with('\n') {
            self.buf.push('\n');
        }
        self.pending_space = false;
    }

    fn push_break(&mut self) {
        self.trim_trailing_spaces();
        if !self.buf.is_empty() {
            while !self.buf.ends_with("\n\n") {
                self.buf.push('\n');
            }
        }
        self.pending_space = false;
    }

    fn at_line_start(&self) -> bool {
        self.buf.is_empty() || self.buf.ends_with('\n')
    }

    fn trim_trailing_spaces(&mut self) {
        let trimmed = self.buf.trim_end_matches([' ', '\t']).len();
        self.buf.truncate(trimmed);
    }

    fn finish(self) -> String {
        self.buf.trim().to_string()
    }
}

fn collect_links(elements: &[ElementRef], page_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let page_key = normalize_link(page_url.clone());

    for el in elements.iter().filter(|e| e.value().name() == "a") {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = page_url.join(href.trim()) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        if resolved.host_str() != page_url.host_str() {
            continue;
        }
        let link = normalize_link(resolved);
        if link == page_key {
            continue;
        }
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }
    links
}

fn normalize_link(mut url: Url) -> String {
    url.set_fragment(None);
    url.to_string()
}

/// Readable fallback title: host plus path.
fn title_from_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    let path = url.path().trim_end_matches('/');
    format!("{}{}", host, path)
}
