//! Cascading content extraction.
//!
//! Stages run in order until one reaches [`MIN_QUALITY`]:
//! 1. readability-style main-content detection
//! 2. structural DOM text with boilerplate stripped
//! 3. external reader service
//! 4. external managed-crawl service
//!
//! If no stage reaches the threshold the best non-empty attempt is kept.
//! HTML parsing happens in synchronous helpers so `scraper::Html` (which is
//! not `Send`) never lives across an await.

use super::external::{ExternalDocument, ExternalExtractor};
use crate::error::SearchError;
use crate::text::{self, compact_ws};
use crate::types::{ExtractedContent, ExtractionMethod};
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Quality at which the cascade stops.
pub const MIN_QUALITY: f64 = 0.3;

const MAX_LINKS: usize = 200;
const MAX_IMAGES: usize = 100;
const MAX_HEADINGS: usize = 50;

const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe", "svg",
    "button", "select", "template", "head",
];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "br", "tr", "td", "th", "pre", "blockquote", "dd", "dt", "figcaption", "table",
];
const POSITIVE_HINTS: &[&str] = &[
    "article", "body", "content", "entry", "main", "page", "post", "text", "blog", "story",
];
const NEGATIVE_HINTS: &[&str] = &[
    "comment", "meta", "footer", "footnote", "sidebar", "nav", "menu", "advert", "ads", "banner",
    "share", "social", "related", "promo", "cookie", "popup", "breadcrumb",
];

/// Page-level metadata read from `<head>` and friends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published: Option<String>,
    pub language: Option<String>,
    pub canonical: Option<String>,
}

impl PageMetadata {
    /// Count of title, description and author present (0..=3).
    fn completeness_fields(&self) -> usize {
        [&self.title, &self.description, &self.author]
            .iter()
            .filter(|f| f.as_ref().is_some_and(|v| !v.is_empty()))
            .count()
    }
}

/// One stage's output before it becomes `ExtractedContent`.
#[derive(Debug, Clone)]
struct Attempt {
    method: ExtractionMethod,
    text: String,
    metadata: PageMetadata,
    headings: Vec<String>,
    links: Vec<String>,
    images: Vec<String>,
    quality: f64,
}

/// Quality = 0.4·length + 0.3·structure + 0.3·metadata completeness.
///
/// `text` is expected to separate paragraphs with blank lines.
pub fn quality_score(text: &str, metadata_fields: usize) -> f64 {
    let words = text.split_whitespace().count();
    let length = (words as f64 / 500.0).min(1.0);

    let paragraphs = text
        .split("\n\n")
        .filter(|p| p.split_whitespace().count() >= 8)
        .count();
    let sentences = text::split_sentences(text).len();
    let structure =
        0.5 * (paragraphs as f64 / 5.0).min(1.0) + 0.5 * (sentences as f64 / 10.0).min(1.0);

    let metadata = (metadata_fields.min(3)) as f64 / 3.0;
    (0.4 * length + 0.3 * structure + 0.3 * metadata).clamp(0.0, 1.0)
}

fn text_content(elem: ElementRef<'_>) -> String {
    compact_ws(&elem.text().collect::<Vec<_>>().join(" "))
}

fn hint_weight(elem: ElementRef<'_>) -> f64 {
    let value = elem.value();
    let hints = format!(
        "{} {}",
        value.attr("class").unwrap_or_default(),
        value.id().unwrap_or_default()
    )
    .to_lowercase();
    if hints.trim().is_empty() {
        return 0.0;
    }
    let mut weight = 0.0;
    if POSITIVE_HINTS.iter().any(|h| hints.contains(h)) {
        weight += 25.0;
    }
    if NEGATIVE_HINTS.iter().any(|h| hints.contains(h)) {
        weight -= 25.0;
    }
    weight
}

fn link_density(elem: ElementRef<'_>, link_sel: &Selector) -> f64 {
    let total = text_content(elem).chars().count();
    if total == 0 {
        return 1.0;
    }
    let linked: usize = elem
        .select(link_sel)
        .map(|a| text_content(a).chars().count())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| {
        let mut url = url;
        url.set_fragment(None);
        url.to_string()
    })
}

fn read_metadata(doc: &Html) -> PageMetadata {
    let mut meta = PageMetadata::default();

    if let Ok(sel) = Selector::parse("meta") {
        for m in doc.select(&sel) {
            let v = m.value();
            let key = v
                .attr("property")
                .or_else(|| v.attr("name"))
                .or_else(|| v.attr("itemprop"))
                .unwrap_or_default()
                .to_lowercase();
            let Some(content) = v.attr("content").map(compact_ws).filter(|c| !c.is_empty())
            else {
                continue;
            };
            let slot = match key.as_str() {
                "og:title" | "twitter:title" => &mut meta.title,
                "description" | "og:description" | "twitter:description" => &mut meta.description,
                "author" | "article:author" | "byl" => &mut meta.author,
                "article:published_time" | "date" | "pubdate" | "datepublished" => {
                    &mut meta.published
                }
                _ => continue,
            };
            slot.get_or_insert(content);
        }
    }

    if meta.title.is_none() {
        meta.title = Selector::parse("title")
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .map(text_content)
            .filter(|t| !t.is_empty());
    }
    if meta.title.is_none() {
        meta.title = Selector::parse("h1")
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .map(text_content)
            .filter(|t| !t.is_empty());
    }
    if meta.author.is_none() {
        meta.author = Selector::parse("[rel=author], .author, .byline")
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .map(text_content)
            .filter(|t| !t.is_empty() && t.split_whitespace().count() <= 6);
    }
    if meta.published.is_none() {
        meta.published = Selector::parse("time[datetime]")
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .and_then(|t| t.value().attr("datetime").map(str::to_string));
    }
    meta.language = Selector::parse("html")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .and_then(|h| h.value().attr("lang"))
        .and_then(|l| l.split(['-', '_']).next())
        .map(|l| l.to_lowercase())
        .filter(|l| l.len() == 2);
    meta.canonical = Selector::parse("link[rel=canonical]")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .and_then(|l| l.value().attr("href").map(str::to_string));

    meta
}

fn collect_links(doc: &Html, base: Option<&Url>) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut links = Vec::new();
    let mut seen = HashSet::new();
    if let Ok(sel) = Selector::parse("a[href]") {
        for a in doc.select(&sel) {
            if links.len() >= MAX_LINKS {
                break;
            }
            if let Some(url) = a.value().attr("href").and_then(|h| resolve(base, h)) {
                if seen.insert(url.clone()) {
                    links.push(url);
                }
            }
        }
    }

    let mut images = Vec::new();
    if let Ok(sel) = Selector::parse("img[src]") {
        for img in doc.select(&sel) {
            if images.len() >= MAX_IMAGES {
                break;
            }
            if let Some(url) = img.value().attr("src").and_then(|s| resolve(base, s)) {
                if !images.contains(&url) {
                    images.push(url);
                }
            }
        }
    }

    let mut headings = Vec::new();
    if let Ok(sel) = Selector::parse("h1, h2, h3") {
        for h in doc.select(&sel) {
            if headings.len() >= MAX_HEADINGS {
                break;
            }
            let t = text_content(h);
            if !t.is_empty() {
                headings.push(t);
            }
        }
    }

    (links, images, headings)
}

/// Main-content detection: score paragraph containers, penalize link-heavy
/// and boilerplate-named ones, and return the best container's blocks.
fn readability_text(doc: &Html) -> Option<String> {
    let (Ok(para_sel), Ok(link_sel), Ok(block_sel)) = (
        Selector::parse("p"),
        Selector::parse("a"),
        Selector::parse("h2, h3, h4, p, li, pre, blockquote"),
    ) else {
        return None;
    };

    let mut candidates: HashMap<_, (ElementRef<'_>, f64)> = HashMap::new();
    for p in doc.select(&para_sel) {
        let t = text_content(p);
        let len = t.chars().count();
        if len < 25 {
            continue;
        }
        let commas = t.matches(',').count().min(3) as f64;
        let score = 1.0 + commas + (len as f64 / 100.0).min(3.0);

        let parent = p.parent().and_then(ElementRef::wrap);
        let grandparent = parent.and_then(|e| e.parent()).and_then(ElementRef::wrap);
        for (elem, share) in [(parent, 1.0), (grandparent, 0.5)] {
            let Some(elem) = elem else { continue };
            let entry = candidates.entry(elem.id()).or_insert_with(|| {
                let tag_bonus = match elem.value().name() {
                    "article" => 10.0,
                    "main" | "section" => 5.0,
                    "div" => 2.0,
                    "body" | "html" => -5.0,
                    _ => 0.0,
                };
                (elem, tag_bonus + hint_weight(elem))
            });
            entry.1 += score * share;
        }
    }

    let (best, _) = candidates
        .into_values()
        .map(|(elem, score)| (elem, score * (1.0 - link_density(elem, &link_sel))))
        .filter(|(_, score)| *score > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let mut seen = HashSet::new();
    let blocks: Vec<String> = best
        .select(&block_sel)
        .map(text_content)
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect();
    let text = blocks.join("\n\n");
    (!text.trim().is_empty()).then_some(text)
}

fn is_skipped(elem: ElementRef<'_>) -> bool {
    let name = elem.value().name();
    SKIP_TAGS.contains(&name) || hint_weight(elem) < 0.0
}

fn walk(elem: ElementRef<'_>, out: &mut String) {
    for child in elem.children() {
        if let Some(child_elem) = ElementRef::wrap(child) {
            if is_skipped(child_elem) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&child_elem.value().name());
            if block {
                out.push('\n');
            }
            walk(child_elem, out);
            if block {
                out.push('\n');
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

/// Generic DOM text with boilerplate elements removed.
fn structural_text(doc: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .unwrap_or_else(|| doc.root_element());

    let mut raw = String::new();
    walk(root, &mut raw);

    raw.lines()
        .map(compact_ws)
        .filter(|line| {
            !line.is_empty()
                && (line.split_whitespace().count() >= 4
                    || line.ends_with(['.', '!', '?', ':']))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse once and run both local stages. Returns the raw page text and the
/// attempts in cascade order.
fn local_attempts(base: Option<&Url>, html: &str) -> (String, Vec<Attempt>) {
    let doc = Html::parse_document(html);
    let metadata = read_metadata(&doc);
    let (links, images, headings) = collect_links(&doc, base);
    let raw_text = Selector::parse("body")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .map(text_content)
        .unwrap_or_default();
    let fields = metadata.completeness_fields();

    let mut attempts = Vec::with_capacity(2);
    if let Some(text) = readability_text(&doc) {
        attempts.push(Attempt {
            method: ExtractionMethod::Readability,
            quality: quality_score(&text, fields),
            text,
            metadata: metadata.clone(),
            headings: headings.clone(),
            links: links.clone(),
            images: images.clone(),
        });
    }
    let text = structural_text(&doc);
    attempts.push(Attempt {
        method: ExtractionMethod::Structural,
        quality: quality_score(&text, fields),
        text,
        metadata,
        headings,
        links,
        images,
    });
    (raw_text, attempts)
}

fn external_attempt(
    method: ExtractionMethod,
    doc: ExternalDocument,
    fallback: &PageMetadata,
) -> Attempt {
    let pick = |key: &str, local: &Option<String>| {
        doc.metadata
            .get(key)
            .cloned()
            .filter(|v| !v.is_empty())
            .or_else(|| local.clone())
    };
    let metadata = PageMetadata {
        title: doc
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| fallback.title.clone()),
        description: pick("description", &fallback.description),
        author: pick("author", &fallback.author),
        published: pick("published", &fallback.published),
        language: pick("language", &fallback.language),
        canonical: fallback.canonical.clone(),
    };
    let headings = doc
        .text
        .lines()
        .filter_map(|l| l.trim().strip_prefix('#'))
        .map(|h| h.trim_start_matches('#').trim().to_string())
        .filter(|h| !h.is_empty())
        .take(MAX_HEADINGS)
        .collect();
    Attempt {
        method,
        quality: quality_score(&doc.text, metadata.completeness_fields()),
        text: doc.text,
        metadata,
        headings,
        links: doc.links,
        images: doc.images,
    }
}

/// Runs the extraction cascade.
#[derive(Clone)]
pub struct ContentExtractor {
    external: Vec<Arc<dyn ExternalExtractor>>,
    min_quality: f64,
}

impl std::fmt::Debug for ContentExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentExtractor")
            .field(
                "external",
                &self.external.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field("min_quality", &self.min_quality)
            .finish()
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor {
    pub fn new() -> Self {
        Self {
            external: Vec::new(),
            min_quality: MIN_QUALITY,
        }
    }

    /// Add an external stage. Reader services run before managed crawls.
    pub fn with_external(mut self, extractor: Arc<dyn ExternalExtractor>) -> Self {
        self.external.push(extractor);
        self.external.sort_by_key(|e| match e.method() {
            ExtractionMethod::ReaderService => 0,
            ExtractionMethod::ManagedCrawl => 1,
            _ => 2,
        });
        self
    }

    pub fn external_stages(&self) -> usize {
        self.external.len()
    }

    /// Extract content from an HTML (or plain text) body fetched from `url`.
    pub async fn extract(&self, url: &str, html: &str) -> Result<ExtractedContent, SearchError> {
        let base = Url::parse(url).ok();
        let (raw_text, local) = local_attempts(base.as_ref(), html);
        let page_meta = local
            .first()
            .map(|a| a.metadata.clone())
            .unwrap_or_default();

        let mut best: Option<Attempt> = None;
        for attempt in local {
            debug!(url, method = %attempt.method, quality = attempt.quality, "Extraction stage");
            if attempt.quality >= self.min_quality {
                return Ok(finish(url, raw_text, attempt));
            }
            keep_best(&mut best, attempt);
        }

        for extractor in &self.external {
            match extractor.extract(url).await {
                Ok(doc) => {
                    let attempt = external_attempt(extractor.method(), doc, &page_meta);
                    debug!(
                        url,
                        method = %attempt.method,
                        quality = attempt.quality,
                        "Extraction stage"
                    );
                    if attempt.quality >= self.min_quality {
                        return Ok(finish(url, raw_text, attempt));
                    }
                    keep_best(&mut best, attempt);
                }
                Err(e) => {
                    debug!(url, extractor = extractor.name(), error = %e, "External extractor failed");
                }
            }
        }

        match best {
            Some(attempt) => Ok(finish(url, raw_text, attempt)),
            None => Err(SearchError::Parse {
                source_name: url.to_string(),
                message: "no extraction stage produced any content".to_string(),
            }),
        }
    }
}

fn keep_best(best: &mut Option<Attempt>, attempt: Attempt) {
    if attempt.text.trim().is_empty() {
        return;
    }
    if best.as_ref().is_none_or(|b| attempt.quality > b.quality) {
        *best = Some(attempt);
    }
}

fn finish(url: &str, raw_text: String, attempt: Attempt) -> ExtractedContent {
    let Attempt {
        method,
        text,
        metadata,
        headings,
        links,
        images,
        quality,
    } = attempt;

    let language = metadata
        .language
        .clone()
        .unwrap_or_else(|| text::detect_language(&text));
    let mut meta = BTreeMap::new();
    for (key, value) in [
        ("description", &metadata.description),
        ("author", &metadata.author),
        ("published", &metadata.published),
        ("canonical", &metadata.canonical),
    ] {
        if let Some(v) = value {
            meta.insert(key.to_string(), v.clone());
        }
    }

    ExtractedContent {
        url: url.to_string(),
        title: metadata.title.unwrap_or_else(|| url.to_string()),
        raw_text: if raw_text.is_empty() { text.clone() } else { raw_text },
        summary: text::summarize(&text),
        word_count: text.split_whitespace().count(),
        language,
        text,
        headings,
        links,
        images,
        metadata: meta,
        method,
        quality_score: quality,
        extracted_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn article_html() -> String {
        let para = "Mallard ducks migrate south each autumn, following ancient flyways that \
                    span entire continents. Researchers track them with light satellite tags. \
                    The data shows remarkable consistency across decades of observation.";
        let paragraphs: String = (0..6).map(|_| format!("<p>{para}</p>")).collect();
        format!(
            r#"<html lang="en-US"><head>
                <title>Duck Migration Explained</title>
                <meta name="description" content="How and why ducks migrate.">
                <meta name="author" content="Jane Birder">
                <meta property="article:published_time" content="2024-03-01T00:00:00Z">
            </head><body>
                <nav><a href="/">Home</a> <a href="/about">About</a></nav>
                <div class="post-content"><h2>Flyways</h2>{paragraphs}
                  <img src="/img/duck.jpg"></div>
                <div class="sidebar"><p>Subscribe to our newsletter for more updates, offers and news.</p></div>
                <footer>Copyright notice and legal text for the whole site.</footer>
            </body></html>"#
        )
    }

    #[test]
    fn test_quality_score_components() {
        assert_eq!(quality_score("", 0), 0.0);
        assert!((quality_score("", 3) - 0.3).abs() < 1e-9);
        let long = (0..10)
            .map(|_| "This sentence has exactly eight words in it. ".repeat(7))
            .collect::<Vec<_>>()
            .join("\n\n");
        assert!((quality_score(&long, 3) - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_readability_picks_main_content() {
        let extractor = ContentExtractor::new();
        let content = extractor
            .extract("https://birds.example.com/ducks", &article_html())
            .await
            .unwrap();
        assert_eq!(content.method, ExtractionMethod::Readability);
        assert_eq!(content.title, "Duck Migration Explained");
        assert!(content.text.contains("Mallard ducks migrate"));
        assert!(!content.text.contains("newsletter"));
        assert!(!content.text.contains("Copyright"));
        assert_eq!(content.language, "en");
        assert_eq!(
            content.metadata.get("author").map(String::as_str),
            Some("Jane Birder")
        );
        assert!(content.quality_score >= MIN_QUALITY);
        assert!(content.links.contains(&"https://birds.example.com/about".to_string()));
        assert_eq!(content.images, vec!["https://birds.example.com/img/duck.jpg"]);
        assert_eq!(content.headings, vec!["Flyways"]);
        assert!(!content.summary.is_empty());
    }

    #[tokio::test]
    async fn test_structural_fallback_without_paragraphs() {
        let html = r#"<html><head><title>Notes</title>
            <meta name="description" content="Field notes">
            <meta name="author" content="A. Observer"></head>
            <body><nav>Home | Blog | Contact us today</nav>
            <div>Teal ducks were seen at the northern lake this morning.</div>
            <div>Counts were higher than in any previous week of the season.</div>
            <footer>All rights reserved by the field notes society.</footer>
            </body></html>"#;
        let content = ContentExtractor::new()
            .extract("https://notes.example.org/", html)
            .await
            .unwrap();
        assert_eq!(content.method, ExtractionMethod::Structural);
        assert!(content.text.contains("Teal ducks"));
        assert!(!content.text.contains("Contact us"));
        assert!(!content.text.contains("rights reserved"));
    }

    struct StubReader {
        text: String,
    }

    #[async_trait]
    impl ExternalExtractor for StubReader {
        fn name(&self) -> &str {
            "stub-reader"
        }
        fn method(&self) -> ExtractionMethod {
            ExtractionMethod::ReaderService
        }
        async fn extract(&self, _url: &str) -> Result<ExternalDocument, SearchError> {
            let mut metadata = BTreeMap::new();
            metadata.insert("description".to_string(), "Rendered page".to_string());
            metadata.insert("author".to_string(), "Reader".to_string());
            Ok(ExternalDocument {
                title: Some("Rendered".into()),
                text: self.text.clone(),
                metadata,
                ..Default::default()
            })
        }
    }

    struct FailingCrawl;

    #[async_trait]
    impl ExternalExtractor for FailingCrawl {
        fn name(&self) -> &str {
            "failing-crawl"
        }
        fn method(&self) -> ExtractionMethod {
            ExtractionMethod::ManagedCrawl
        }
        async fn extract(&self, url: &str) -> Result<ExternalDocument, SearchError> {
            Err(SearchError::Network {
                provider: url.into(),
                message: "unreachable".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_external_stage_rescues_thin_page() {
        let text = (0..6)
            .map(|_| "The rendered page explains duck migration in detail, with maps and data.")
            .collect::<Vec<_>>()
            .join("\n\n");
        let extractor = ContentExtractor::new()
            .with_external(Arc::new(FailingCrawl))
            .with_external(Arc::new(StubReader { text }));
        let content = extractor
            .extract("https://spa.example.com/", "<html><body><div id=app></div></body></html>")
            .await
            .unwrap();
        assert_eq!(content.method, ExtractionMethod::ReaderService);
        assert_eq!(content.title, "Rendered");
    }

    #[tokio::test]
    async fn test_best_attempt_below_threshold() {
        let content = ContentExtractor::new()
            .extract("https://tiny.example.com/", "<html><body>Just a few words here.</body></html>")
            .await
            .unwrap();
        assert_eq!(content.method, ExtractionMethod::Structural);
        assert!(content.quality_score < MIN_QUALITY);
    }

    #[tokio::test]
    async fn test_all_stages_empty_is_parse_error() {
        let err = ContentExtractor::new()
            .with_external(Arc::new(FailingCrawl))
            .extract("https://empty.example.com/", "<html><body></body></html>")
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Parse { .. }));
    }
}
