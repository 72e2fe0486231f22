//! PDF document adapter.

use crate::config::BookFormat;
use crate::error::{AppError, Result};
use crate::reader::{
    DocumentAdapter, Navigation, PositionFeed, Presentation, ReadingPosition, RenderedView,
    TocEntry, corrupt,
};
use lopdf::{Dictionary, Document, Object};
use tokio::sync::watch;

/// Smallest zoom factor.
pub const MIN_SCALE: f32 = 0.5;
/// Largest zoom factor.
pub const MAX_SCALE: f32 = 2.5;
/// Zoom change per step.
pub const SCALE_STEP: f32 = 0.1;

/// Open PDF document.
pub struct PdfDocument {
    doc: Document,
    page: u32,
    total: u32,
    scale: f32,
    feed: PositionFeed,
}

impl PdfDocument {
    /// Parse a PDF held in memory. Starts on page 1 at scale 1.0.
    pub fn open(data: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(data).map_err(|e| corrupt(BookFormat::Pdf, e))?;

        let total = doc.get_pages().len() as u32;
        let page = total.min(1);

        Ok(Self {
            doc,
            page,
            total,
            scale: 1.0,
            feed: PositionFeed::new(ReadingPosition::Fixed { page, total }),
        })
    }

    /// Number of pages.
    pub fn page_count(&self) -> u32 {
        self.total
    }

    fn go_to(&mut self, page: u32) -> ReadingPosition {
        if self.total == 0 {
            return self.position();
        }

        let page = page.clamp(1, self.total);
        if page != self.page {
            self.page = page;
            self.feed.publish(self.position());
        }
        self.position()
    }
}

impl DocumentAdapter for PdfDocument {
    fn format(&self) -> BookFormat {
        BookFormat::Pdf
    }

    fn position(&self) -> ReadingPosition {
        ReadingPosition::Fixed {
            page: self.page,
            total: self.total,
        }
    }

    fn navigate(&mut self, navigation: Navigation) -> ReadingPosition {
        match navigation {
            Navigation::Next => self.go_to(self.page.saturating_add(1)),
            Navigation::Previous => self.go_to(self.page.saturating_sub(1)),
            Navigation::Page(page) => self.go_to(page),
            Navigation::Href(target) => match target.trim_start_matches("page:").parse() {
                Ok(page) => self.go_to(page),
                Err(_) => self.position(),
            },
        }
    }

    fn seek_progress(&mut self, progress: u8) -> ReadingPosition {
        let page = (progress.min(100) as f64 / 100.0 * self.total as f64).round() as u32;
        self.go_to(page)
    }

    fn table_of_contents(&self) -> &[TocEntry] {
        &[]
    }

    fn presentation(&self) -> Presentation {
        Presentation::Scale(self.scale)
    }

    fn adjust_presentation(&mut self, steps: i32) -> Presentation {
        let scale = (self.scale + steps as f32 * SCALE_STEP).clamp(MIN_SCALE, MAX_SCALE);
        self.scale = (scale * 10.0).round() / 10.0;
        self.presentation()
    }

    fn render(&self) -> Result<RenderedView> {
        let text = if self.total == 0 {
            String::new()
        } else {
            self.doc
                .extract_text(&[self.page])
                .map_err(|e| AppError::Pdf(e.to_string()))?
        };

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

/// Image pulled out of a PDF page.
#[derive(Debug)]
pub enum RawImage {
    /// Encoded JPEG or PNG bytes.
    Encoded(Vec<u8>),
    /// Uncompressed 8-bit RGB samples.
    Rgb {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Row-major RGB triplets.
        pixels: Vec<u8>,
    },
}

/// First image XObject drawn on page one, if any.
pub fn first_page_image(data: &[u8]) -> Result<Option<RawImage>> {
    let doc = Document::load_mem(data).map_err(|e| AppError::Pdf(e.to_string()))?;

    let pages = doc.get_pages();
    let Some(&first_page_id) = pages.values().next() else {
        return Ok(None);
    };
    let Ok(page) = doc.get_dictionary(first_page_id) else {
        return Ok(None);
    };

    let Some(resources) = dict_entry(&doc, page, b"Resources") else {
        return Ok(None);
    };
    let Some(xobjects) = dict_entry(&doc, resources, b"XObject") else {
        return Ok(None);
    };

    for (_name, obj) in xobjects.iter() {
        let Object::Reference(xobj_ref) = obj else {
            continue;
        };
        let Ok(Object::Stream(stream)) = doc.get_object(*xobj_ref) else {
            continue;
        };

        let is_image = matches!(
            stream.dict.get(b"Subtype"),
            Ok(Object::Name(n)) if n == b"Image"
        );
        if !is_image {
            continue;
        }

        let is_dct = match stream.dict.get(b"Filter") {
            Ok(Object::Name(n)) => n == b"DCTDecode",
            Ok(Object::Array(arr)) => arr
                .iter()
                .any(|item| matches!(item, Object::Name(n) if n == b"DCTDecode")),
            _ => false,
        };

        if is_dct && is_encoded(&stream.content) {
            return Ok(Some(RawImage::Encoded(stream.content.clone())));
        }

        let Ok(decoded) = stream.decompressed_content() else {
            continue;
        };
        if is_encoded(&decoded) {
            return Ok(Some(RawImage::Encoded(decoded)));
        }

        let width = int_entry(stream.dict.get(b"Width").ok());
        let height = int_entry(stream.dict.get(b"Height").ok());
        if let (Some(width), Some(height)) = (width, height)
            && decoded.len() == (width as usize) * (height as usize) * 3
        {
            return Ok(Some(RawImage::Rgb {
                width,
                height,
                pixels: decoded,
            }));
        }
    }

    Ok(None)
}

/// Dictionary value that may be stored inline or by reference.
fn dict_entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    match dict.get(key) {
        Ok(Object::Reference(r)) => doc.get_dictionary(*r).ok(),
        Ok(Object::Dictionary(d)) => Some(d),
        _ => None,
    }
}

fn int_entry(obj: Option<&Object>) -> Option<u32> {
    match obj {
        Some(Object::Integer(i)) if *i > 0 => u32::try_from(*i).ok(),
        _ => None,
    }
}

fn is_encoded(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8, 0xFF]) || data.starts_with(&[0x89, 0x50, 0x4E, 0x47])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{pdf_bytes, pdf_with_jpeg};

    #[test]
    fn opens_on_first_page() {
        let doc = PdfDocument::open(&pdf_bytes(10)).unwrap();
        assert_eq!(doc.page_count(), 10);
        assert_eq!(doc.position(), ReadingPosition::Fixed { page: 1, total: 10 });
        assert_eq!(doc.presentation(), Presentation::Scale(1.0));
    }

    #[test]
    fn page_navigation_clamps() {
        let mut doc = PdfDocument::open(&pdf_bytes(3)).unwrap();

        assert_eq!(doc.navigate(Navigation::Previous).progress(), 33);
        doc.navigate(Navigation::Next);
        doc.navigate(Navigation::Next);
        let last = doc.navigate(Navigation::Next);
        assert_eq!(last, ReadingPosition::Fixed { page: 3, total: 3 });
        assert_eq!(last.progress(), 100);

        assert_eq!(doc.navigate(Navigation::Page(99)).progress(), 100);
        assert_eq!(
            doc.navigate(Navigation::Href("page:2".into())),
            ReadingPosition::Fixed { page: 2, total: 3 }
        );
    }

    #[test]
    fn empty_document_stays_at_zero() {
        let mut doc = PdfDocument::open(&pdf_bytes(0)).unwrap();
        let position = doc.navigate(Navigation::Next);
        assert_eq!(position, ReadingPosition::Fixed { page: 0, total: 0 });
        assert_eq!(position.progress(), 0);
        assert!(doc.render().unwrap().text.is_empty());
    }

    #[test]
    fn zoom_steps_are_clamped() {
        let mut doc = PdfDocument::open(&pdf_bytes(1)).unwrap();
        assert_eq!(doc.adjust_presentation(3), Presentation::Scale(1.3));
        assert_eq!(doc.adjust_presentation(50), Presentation::Scale(2.5));
        assert_eq!(doc.adjust_presentation(-50), Presentation::Scale(0.5));
    }

    #[test]
    fn seek_progress_picks_nearest_page() {
        let mut doc = PdfDocument::open(&pdf_bytes(10)).unwrap();
        assert_eq!(
            doc.seek_progress(50),
            ReadingPosition::Fixed { page: 5, total: 10 }
        );
        assert_eq!(
            doc.seek_progress(0),
            ReadingPosition::Fixed { page: 1, total: 10 }
        );
    }

    #[test]
    fn first_page_jpeg_is_found() {
        let image = first_page_image(&pdf_with_jpeg()).unwrap();
        assert!(matches!(image, Some(RawImage::Encoded(bytes)) if bytes.starts_with(&[0xFF, 0xD8])));

        assert!(first_page_image(&pdf_bytes(2)).unwrap().is_none());
    }
}
