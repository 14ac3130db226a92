//! Streaming extraction of listing and detail pages.
//!
//! Both parsers run a single `lol_html` pass and collect only the elements
//! the site contract names; anything else in the document is ignored.

use std::cell::RefCell;
use std::sync::LazyLock;

use lol_html::errors::RewritingError;
use lol_html::{HtmlRewriter, Settings, element, text};
use regex::Regex;
use thiserror::Error;
use url::Url;

const DETAIL_LINK: &str = "a.videoName[href]";
const ANCHOR: &str = "a[href]";
const LAST_PAGE_TEXT: &str = "尾页";

const FIELD_PARAGRAPH: &str = "div.people div.right p";
const COVER_IMAGE: &str = "div.people img";
const SYNOPSIS: &str = "div.vod_content";
const EPISODE_INPUT: &str = r#"div.playlist.wbox.bfzym3u8 input[name="copy_bfzym3u8[]"]"#;

static PAGE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/page/(\d+)\.html").expect("page number pattern is valid"));

#[derive(Debug, Error)]
#[error("failed to parse HTML: {0}")]
pub struct ParseError(#[from] RewritingError);

/// Accumulates the text of an element, stripping each text node and joining
/// the pieces without separators.
#[derive(Debug, Default)]
struct TextCollector {
    text: String,
    pending: String,
}

impl TextCollector {
    fn push_chunk(&mut self, chunk: &str, last_in_node: bool) {
        self.pending.push_str(chunk);
        if last_in_node {
            let decoded = html_escape::decode_html_entities(self.pending.trim());
            self.text.push_str(decoded.trim());
            self.pending.clear();
        }
    }

    fn finish(mut self) -> String {
        self.push_chunk("", true);
        self.text
    }
}

/// Resolves `href` against `base`, keeping only http(s) targets.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let joined = base.join(href.trim()).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

fn decode_attribute(value: String) -> String {
    html_escape::decode_html_entities(&value).into_owned()
}

/// Links found on one listing page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingPage {
    /// Absolute detail-page URLs, in document order.
    pub detail_links: Vec<String>,
    /// Page number carried by the "last page" navigation link, if any.
    pub last_page: Option<u32>,
}

struct Anchor {
    href: String,
    text: TextCollector,
}

pub fn parse_listing(html: &str, base_url: &Url) -> Result<ListingPage, ParseError> {
    let mut detail_links = Vec::new();
    let anchors: RefCell<Vec<Anchor>> = RefCell::new(Vec::new());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!(DETAIL_LINK, |el| {
                    if let Some(href) = el.get_attribute("href")
                        && let Some(link) = resolve_link(base_url, &decode_attribute(href))
                    {
                        detail_links.push(link);
                    }
                    Ok(())
                }),
                element!(ANCHOR, |el| {
                    if let Some(href) = el.get_attribute("href") {
                        anchors.borrow_mut().push(Anchor {
                            href: decode_attribute(href),
                            text: TextCollector::default(),
                        });
                    }
                    Ok(())
                }),
                // Anchors cannot nest, so text belongs to the last one opened.
                text!(ANCHOR, |t| {
                    if let Some(anchor) = anchors.borrow_mut().last_mut() {
                        anchor.text.push_chunk(t.as_str(), t.last_in_text_node());
                    }
                    Ok(())
                }),
            ],
            ..Settings::new()
        },
        |_: &[u8]| {},
    );

    rewriter.write(html.as_bytes())?;
    rewriter.end()?;

    let last_page = anchors
        .into_inner()
        .into_iter()
        .find_map(|anchor| (anchor.text.finish() == LAST_PAGE_TEXT).then_some(anchor.href))
        .and_then(|href| page_number(&href));

    Ok(ListingPage {
        detail_links,
        last_page,
    })
}

/// Extracts `N` from an address like `/index.php/vod/type/id/41/page/N.html`.
pub fn page_number(href: &str) -> Option<u32> {
    PAGE_NUMBER
        .captures(href)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Read access to the parts of a detail page the extractor needs.
///
/// Implemented by [`DetailDocument`] for real pages and by fakes in tests.
pub trait DetailPage {
    /// Text following `label` in the first metadata line starting with it.
    fn field(&self, label: &str) -> Option<&str>;
    /// `src` of the first cover image, as written in the page.
    fn cover_src(&self) -> Option<&str>;
    fn synopsis(&self) -> Option<&str>;
    /// Raw `value` attributes of the episode inputs, in document order.
    fn episode_values(&self) -> &[String];
}

/// The extracted shape of a detail page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetailDocument {
    paragraphs: Vec<String>,
    cover_src: Option<String>,
    synopsis: Option<String>,
    episode_values: Vec<String>,
}

impl DetailDocument {
    pub fn parse(html: &str) -> Result<Self, ParseError> {
        let paragraphs: RefCell<Vec<TextCollector>> = RefCell::new(Vec::new());
        let synopses: RefCell<Vec<TextCollector>> = RefCell::new(Vec::new());
        let mut cover_src = None;
        let mut episode_values = Vec::new();

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    element!(FIELD_PARAGRAPH, |_el| {
                        paragraphs.borrow_mut().push(TextCollector::default());
                        Ok(())
                    }),
                    text!(FIELD_PARAGRAPH, |t| {
                        if let Some(p) = paragraphs.borrow_mut().last_mut() {
                            p.push_chunk(t.as_str(), t.last_in_text_node());
                        }
                        Ok(())
                    }),
                    element!(COVER_IMAGE, |el| {
                        if cover_src.is_none() {
                            let src = el.get_attribute("src").map(decode_attribute);
                            cover_src = Some(src.unwrap_or_default());
                        }
                        Ok(())
                    }),
                    element!(SYNOPSIS, |_el| {
                        synopses.borrow_mut().push(TextCollector::default());
                        Ok(())
                    }),
                    text!(SYNOPSIS, |t| {
                        if let Some(s) = synopses.borrow_mut().last_mut() {
                            s.push_chunk(t.as_str(), t.last_in_text_node());
                        }
                        Ok(())
                    }),
                    element!(EPISODE_INPUT, |el| {
                        if let Some(value) = el.get_attribute("value") {
                            episode_values.push(decode_attribute(value));
                        }
                        Ok(())
                    }),
                ],
                ..Settings::new()
            },
            |_: &[u8]| {},
        );

        rewriter.write(html.as_bytes())?;
        rewriter.end()?;

        Ok(Self {
            paragraphs: paragraphs
                .into_inner()
                .into_iter()
                .map(TextCollector::finish)
                .collect(),
            cover_src,
            synopsis: synopses.into_inner().into_iter().next().map(TextCollector::finish),
            episode_values,
        })
    }
}

impl DetailPage for DetailDocument {
    fn field(&self, label: &str) -> Option<&str> {
        self.paragraphs
            .iter()
            .find_map(|p| p.strip_prefix(label))
            .map(str::trim)
    }

    fn cover_src(&self) -> Option<&str> {
        self.cover_src.as_deref()
    }

    fn synopsis(&self) -> Option<&str> {
        self.synopsis.as_deref()
    }

    fn episode_values(&self) -> &[String] {
        &self.episode_values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://vod.example.com").unwrap()
    }

    #[test]
    fn test_listing_links_and_last_page() {
        let html = r#"
            <ul>
              <li><a class="videoName" href="/index.php/vod/detail/id/1.html">One</a></li>
              <li><a class="thumb videoName" href="https://vod.example.com/index.php/vod/detail/id/2.html">Two</a></li>
              <li><a class="other" href="/index.php/vod/detail/id/3.html">Not a detail link</a></li>
              <li><a class="videoName">No href</a></li>
            </ul>
            <div class="pages">
              <a href="/index.php/vod/type/id/41/page/2.html">下一页</a>
              <a href="/index.php/vod/type/id/41/page/109.html"> 尾页 </a>
            </div>
        "#;

        let page = parse_listing(html, &base()).unwrap();
        assert_eq!(
            page.detail_links,
            vec![
                "https://vod.example.com/index.php/vod/detail/id/1.html",
                "https://vod.example.com/index.php/vod/detail/id/2.html",
            ]
        );
        assert_eq!(page.last_page, Some(109));
    }

    #[test]
    fn test_listing_without_last_page_link() {
        let html = r#"<a class="videoName" href="/d/1.html">x</a><a href="/page/3.html">3</a>"#;
        let page = parse_listing(html, &base()).unwrap();
        assert_eq!(page.last_page, None);
        assert_eq!(page.detail_links.len(), 1);
    }

    #[test]
    fn test_last_page_link_with_unexpected_href() {
        let html = r#"<a href="/index.php?page=last">尾页</a>"#;
        assert_eq!(parse_listing(html, &base()).unwrap().last_page, None);
    }

    #[test]
    fn test_page_number() {
        assert_eq!(page_number("/index.php/vod/type/id/41/page/12.html"), Some(12));
        assert_eq!(page_number("/index.php/vod/type/id/41/page/x.html"), None);
        assert_eq!(page_number(""), None);
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link(&base(), "/a/b.html").as_deref(),
            Some("https://vod.example.com/a/b.html")
        );
        assert_eq!(
            resolve_link(&base(), "//img.example.net/c.jpg").as_deref(),
            Some("https://img.example.net/c.jpg")
        );
        assert_eq!(resolve_link(&base(), "javascript:void(0)"), None);
    }

    #[test]
    fn test_detail_document() {
        let html = r#"
            <div class="people">
              <div class="left"><img src="/upload/cover.jpg" alt="cover"><img src="/second.jpg"></div>
              <div class="right">
                <p>片名：葬送的芙莉莲</p>
                <p>别名：Frieren</p>
                <p>豆瓣ID： 36109567 </p>
                <p>演员：种崎敦美 &amp; 冈本信彦</p>
              </div>
            </div>
            <div class="vod_content">
              <p>勇者一行人</p>
              <p>打倒魔王之后</p>
            </div>
            <div class="playlist wbox bfzym3u8">
              <input type="checkbox" name="copy_bfzym3u8[]" value="第01集$https://cdn.example.com/1/index.m3u8">
              <input type="checkbox" name="copy_bfzym3u8[]" value="第02集$https://cdn.example.com/2/index.m3u8">
            </div>
            <div class="playlist wbox othersource">
              <input type="checkbox" name="copy_bfzym3u8[]" value="ignored$https://elsewhere">
            </div>
        "#;

        let doc = DetailDocument::parse(html).unwrap();
        assert_eq!(doc.field("片名："), Some("葬送的芙莉莲"));
        assert_eq!(doc.field("豆瓣ID："), Some("36109567"));
        assert_eq!(doc.field("演员："), Some("种崎敦美 & 冈本信彦"));
        assert_eq!(doc.field("导演："), None);
        assert_eq!(doc.cover_src(), Some("/upload/cover.jpg"));
        assert_eq!(doc.synopsis(), Some("勇者一行人打倒魔王之后"));
        assert_eq!(
            doc.episode_values(),
            &[
                "第01集$https://cdn.example.com/1/index.m3u8".to_string(),
                "第02集$https://cdn.example.com/2/index.m3u8".to_string(),
            ]
        );
    }

    #[test]
    fn test_detail_document_missing_everything() {
        let doc = DetailDocument::parse("<html><body><h1>资源详情</h1></body></html>").unwrap();
        assert_eq!(doc, DetailDocument::default());
    }

    #[test]
    fn test_image_without_src() {
        let doc = DetailDocument::parse(r#"<div class="people"><img alt="x"></div>"#).unwrap();
        assert_eq!(doc.cover_src(), Some(""));
    }
}
