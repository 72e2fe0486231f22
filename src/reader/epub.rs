//! EPUB document adapter.
//!
//! The spine is cut into fixed-size text locations, the way epub.js
//! generates locations: each spine document's text is split every
//! `chars_per_location` characters. A location token is
//! `"{href}@{char_offset}"` and the fraction is `index / total`.

use crate::config::BookFormat;
use crate::error::{AppError, Result};
use crate::reader::{
    DocumentAdapter, Navigation, PositionFeed, Presentation, ReadingPosition, RenderedView,
    TocEntry, corrupt,
};
use roxmltree::{Document, Node, ParsingOptions};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tokio::sync::watch;
use zip::ZipArchive;

/// Smallest font size in percent.
pub const MIN_FONT_PERCENT: u16 = 80;
/// Largest font size in percent.
pub const MAX_FONT_PERCENT: u16 = 150;
/// Font size change per step.
pub const FONT_STEP: u16 = 10;
const DEFAULT_FONT_PERCENT: u16 = 100;

const OPS_NS: &str = "http://www.idpf.org/2007/ops";

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

#[derive(Debug, Clone)]
struct Location {
    href: String,
    offset: usize,
    text: String,
}

/// Open EPUB document.
pub struct EpubDocument {
    locations: Vec<Location>,
    toc: Vec<TocEntry>,
    index: usize,
    font_percent: u16,
    feed: PositionFeed,
}

impl EpubDocument {
    /// Parse an EPUB archive held in memory.
    pub fn open(data: &[u8], chars_per_location: usize) -> Result<Self> {
        Self::parse(data, chars_per_location.max(1)).map_err(|e| match e {
            AppError::CorruptDocument(_) => e,
            other => corrupt(BookFormat::Epub, other),
        })
    }

    fn parse(data: &[u8], chars_per_location: usize) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;

        let opf_path = find_opf_path(&mut archive)?;
        let opf_dir = parent_dir(&opf_path);
        let opf = read_entry(&mut archive, &opf_path)?;
        let package = Package::parse(&opf, opf_dir)?;

        if package.spine.is_empty() {
            return Err(AppError::CorruptDocument("EPUB spine is empty".to_string()));
        }

        let mut locations = Vec::new();
        for href in &package.spine {
            let text = match read_entry(&mut archive, href) {
                Ok(markup) => extract_text(&markup),
                Err(e) => {
                    tracing::warn!(href = %href, error = %e, "Missing spine document");
                    String::new()
                }
            };
            push_locations(&mut locations, href, &text, chars_per_location);
        }

        let toc = match package.load_toc(&mut archive) {
            Ok(toc) => toc,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read EPUB navigation");
                Vec::new()
            }
        };

        let feed = PositionFeed::new(position_at(&locations, 0));

        Ok(Self {
            locations,
            toc,
            index: 0,
            font_percent: DEFAULT_FONT_PERCENT,
            feed,
        })
    }

    /// Number of generated locations.
    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    fn move_to(&mut self, index: usize) -> ReadingPosition {
        let index = index.min(self.locations.len().saturating_sub(1));
        if index != self.index {
            self.index = index;
            self.feed.publish(self.position());
        }
        self.position()
    }

    fn find_href(&self, target: &str) -> Option<usize> {
        let path = target.split('#').next().unwrap_or(target);
        self.locations.iter().position(|loc| {
            loc.href == path || loc.href.ends_with(&format!("/{}", path.trim_start_matches("./")))
        })
    }
}

impl DocumentAdapter for EpubDocument {
    fn format(&self) -> BookFormat {
        BookFormat::Epub
    }

    fn position(&self) -> ReadingPosition {
        position_at(&self.locations, self.index)
    }

    fn navigate(&mut self, navigation: Navigation) -> ReadingPosition {
        match navigation {
            Navigation::Next => self.move_to(self.index + 1),
            Navigation::Previous => self.move_to(self.index.saturating_sub(1)),
            Navigation::Page(index) => self.move_to(index as usize),
            Navigation::Href(target) => match self.find_href(&target) {
                Some(index) => self.move_to(index),
                None => {
                    tracing::debug!(target = %target, "Unknown EPUB target");
                    self.position()
                }
            },
        }
    }

    fn seek_progress(&mut self, progress: u8) -> ReadingPosition {
        // Inverse of `ReadingPosition::progress`, which rounds.
        let total = self.locations.len() as f64;
        let index = (f64::from(progress.min(100)) / 100.0 * total).round() as usize;
        self.move_to(index)
    }

    fn table_of_contents(&self) -> &[TocEntry] {
        &self.toc
    }

    fn presentation(&self) -> Presentation {
        Presentation::FontPercent(self.font_percent)
    }

    fn adjust_presentation(&mut self, steps: i32) -> Presentation {
        let size = self.font_percent as i32 + steps * FONT_STEP as i32;
        self.font_percent = size.clamp(MIN_FONT_PERCENT as i32, MAX_FONT_PERCENT as i32) as u16;
        self.presentation()
    }

    fn render(&self) -> Result<RenderedView> {
        let text = self
            .locations
            .get(self.index)
            .map(|loc| loc.text.clone())
            .unwrap_or_default();

        Ok(RenderedView {
            position: self.position(),
            text,
            presentation: self.presentation(),
        })
    }

    fn subscribe(&self) -> watch::Receiver<ReadingPosition> {
        self.feed.subscribe()
    }
}

fn position_at(locations: &[Location], index: usize) -> ReadingPosition {
    let Some(loc) = locations.get(index) else {
        return ReadingPosition::Flow {
            location: String::new(),
            fraction: 0.0,
        };
    };

    ReadingPosition::Flow {
        location: format!("{}@{}", loc.href, loc.offset),
        fraction: index as f64 / locations.len() as f64,
    }
}

fn push_locations(out: &mut Vec<Location>, href: &str, text: &str, chars_per_location: usize) {
    let chars: Vec<char> = text.chars().collect();

    // Empty documents still get one location so TOC targets resolve.
    if chars.is_empty() {
        out.push(Location {
            href: href.to_string(),
            offset: 0,
            text: String::new(),
        });
        return;
    }

    for (i, chunk) in chars.chunks(chars_per_location).enumerate() {
        out.push(Location {
            href: href.to_string(),
            offset: i * chars_per_location,
            text: chunk.iter().collect(),
        });
    }
}

fn xml_options<'a>() -> ParsingOptions<'a> {
    ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    }
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<String> {
    let mut file = archive.by_name(name)?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

/// Find the OPF file path from container.xml.
fn find_opf_path(archive: &mut Archive<'_>) -> Result<String> {
    let content = read_entry(archive, "META-INF/container.xml")?;
    let doc = Document::parse_with_options(&content, xml_options())?;

    doc.descendants()
        .find(|n| n.has_tag_name("rootfile"))
        .and_then(|n| n.attribute("full-path"))
        .map(String::from)
        .ok_or_else(|| AppError::CorruptDocument("No rootfile in container.xml".into()))
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Resolve an href relative to a directory inside the archive.
fn resolve(base_dir: &str, href: &str) -> String {
    let (path, fragment) = match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    };
    let path = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());

    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let resolved = segments.join("/");
    match fragment {
        Some(fragment) if !fragment.is_empty() => format!("{}#{}", resolved, fragment),
        _ => resolved,
    }
}

/// Visible text of an XHTML document, whitespace-normalized.
fn extract_text(markup: &str) -> String {
    let raw = match Document::parse_with_options(markup, xml_options()) {
        Ok(doc) => {
            let root = doc
                .descendants()
                .find(|n| n.has_tag_name("body"))
                .unwrap_or_else(|| doc.root());
            root.descendants()
                .filter(|n| n.is_text())
                .filter(|n| {
                    !n.ancestors()
                        .any(|a| a.has_tag_name("script") || a.has_tag_name("style"))
                })
                .filter_map(|n| n.text())
                .collect::<String>()
        }
        // HTML entities such as &nbsp; are not valid XML.
        Err(_) => strip_tags(markup),
    };

    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_tags(markup: &str) -> String {
    let body = markup
        .find("<body")
        .map(|start| &markup[start..])
        .unwrap_or(markup);

    let mut out = String::with_capacity(body.len());
    let mut in_tag = false;
    for c in body.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Parts of the OPF package the reader needs.
struct Package {
    spine: Vec<String>,
    nav: Option<String>,
    ncx: Option<String>,
}

impl Package {
    fn parse(content: &str, opf_dir: &str) -> Result<Self> {
        let doc = Document::parse_with_options(content, xml_options())?;

        let mut manifest: HashMap<&str, (&str, &str)> = HashMap::new();
        let mut nav = None;
        let mut ncx_by_type = None;

        for node in doc.descendants().filter(|n| n.has_tag_name("item")) {
            let (Some(id), Some(href)) = (node.attribute("id"), node.attribute("href")) else {
                continue;
            };
            let media_type = node.attribute("media-type").unwrap_or("");
            manifest.insert(id, (href, media_type));

            let is_nav = node
                .attribute("properties")
                .is_some_and(|p| p.split_whitespace().any(|p| p == "nav"));
            if is_nav {
                nav = Some(resolve(opf_dir, href));
            }
            if media_type == "application/x-dtbncx+xml" {
                ncx_by_type = Some(resolve(opf_dir, href));
            }
        }

        let spine_node = doc
            .descendants()
            .find(|n| n.has_tag_name("spine"))
            .ok_or_else(|| AppError::CorruptDocument("No spine in package".into()))?;

        let spine = spine_node
            .children()
            .filter(|n| n.has_tag_name("itemref"))
            .filter_map(|n| n.attribute("idref"))
            .filter_map(|idref| manifest.get(idref))
            .map(|(href, _)| resolve(opf_dir, href))
            .collect();

        let ncx = spine_node
            .attribute("toc")
            .and_then(|id| manifest.get(id))
            .map(|(href, _)| resolve(opf_dir, href))
            .or(ncx_by_type);

        Ok(Self { spine, nav, ncx })
    }

    fn load_toc(&self, archive: &mut Archive<'_>) -> Result<Vec<TocEntry>> {
        if let Some(nav) = &self.nav {
            let toc = read_entry(archive, nav)
                .and_then(|content| parse_nav(&content, parent_dir(nav)));
            match toc {
                Ok(toc) if !toc.is_empty() => return Ok(toc),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(nav = %nav, error = %e, "Unusable EPUB nav, trying NCX");
                }
            }
        }

        match &self.ncx {
            Some(ncx) => {
                let content = read_entry(archive, ncx)?;
                parse_ncx(&content, parent_dir(ncx))
            }
            None => Ok(Vec::new()),
        }
    }
}

fn node_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// EPUB 3 navigation document.
fn parse_nav(content: &str, base_dir: &str) -> Result<Vec<TocEntry>> {
    let doc = Document::parse_with_options(content, xml_options())?;

    let navs: Vec<_> = doc.descendants().filter(|n| n.has_tag_name("nav")).collect();
    let toc_nav = navs
        .iter()
        .find(|n| n.attribute((OPS_NS, "type")) == Some("toc"))
        .or_else(|| navs.first());

    let mut entries = Vec::new();
    if let Some(list) = toc_nav.and_then(|nav| nav.children().find(|n| n.has_tag_name("ol"))) {
        walk_nav_list(list, 0, base_dir, &mut entries);
    }
    Ok(entries)
}

fn walk_nav_list(list: Node<'_, '_>, level: u32, base_dir: &str, out: &mut Vec<TocEntry>) {
    for item in list.children().filter(|n| n.has_tag_name("li")) {
        if let Some(link) = item.children().find(|n| n.has_tag_name("a")) {
            out.push(TocEntry {
                label: node_text(link),
                href: link
                    .attribute("href")
                    .map(|h| resolve(base_dir, h))
                    .unwrap_or_default(),
                level,
            });
        }
        if let Some(nested) = item.children().find(|n| n.has_tag_name("ol")) {
            walk_nav_list(nested, level + 1, base_dir, out);
        }
    }
}

/// EPUB 2 NCX table of contents.
fn parse_ncx(content: &str, base_dir: &str) -> Result<Vec<TocEntry>> {
    let doc = Document::parse_with_options(content, xml_options())?;

    let mut entries = Vec::new();
    if let Some(nav_map) = doc.descendants().find(|n| n.has_tag_name("navMap")) {
        walk_nav_points(nav_map, 0, base_dir, &mut entries);
    }
    Ok(entries)
}

fn walk_nav_points(parent: Node<'_, '_>, level: u32, base_dir: &str, out: &mut Vec<TocEntry>) {
    for point in parent.children().filter(|n| n.has_tag_name("navPoint")) {
        let label = point
            .children()
            .find(|n| n.has_tag_name("navLabel"))
            .map(node_text)
            .unwrap_or_default();
        let href = point
            .children()
            .find(|n| n.has_tag_name("content"))
            .and_then(|n| n.attribute("src"))
            .map(|src| resolve(base_dir, src))
            .unwrap_or_default();

        out.push(TocEntry { label, href, level });
        walk_nav_points(point, level + 1, base_dir, out);
    }
}
