use crate::app::App;
use crate::config::{BackendKind, BookFormat, Config};
use crate::covers::{placeholder_png, png_data_url};
use crate::db::{Database, Session, StoredBook, User, now_timestamp};
use crate::error::{AppError, Result};
use crate::library::{BookRecord, ContentRef, LibraryStore, NewBook, RecentEntry, Upload};
use crate::notify::{NoticeKind, Notifier};
use crate::reader::Navigation;
use crate::session::{AuthState, Registration};
use crate::storage::{ContentRemoval, Identity, LibraryBackend};
use async_trait::async_trait;
use fixtures::{Chapter, epub_bytes, pdf_bytes, pdf_with_jpeg};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;

/// Sample documents built in memory.
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    /// One spine document. Stored as `OEBPS/{lowercased title}.xhtml`.
    pub(crate) struct Chapter {
        title: String,
        body: String,
    }

    impl Chapter {
        pub(crate) fn new(title: &str, body: &str) -> Self {
            Self {
                title: title.to_string(),
                body: body.to_string(),
            }
        }

        fn id(&self) -> String {
            self.title.to_lowercase()
        }

        fn file_name(&self) -> String {
            format!("{}.xhtml", self.id())
        }

        fn xhtml(&self) -> String {
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{}</title></head>
<body><p>{}</p></body>
</html>"#,
                escape(&self.title),
                escape(&self.body)
            )
        }
    }

    fn escape(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    }

    fn manifest_items(chapters: &[Chapter]) -> (String, String) {
        let items = chapters
            .iter()
            .map(|c| {
                format!(
                    r#"<item id="{}" href="{}" media-type="application/xhtml+xml"/>"#,
                    c.id(),
                    c.file_name()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let itemrefs = chapters
            .iter()
            .map(|c| format!(r#"<itemref idref="{}"/>"#, c.id()))
            .collect::<Vec<_>>()
            .join("\n");
        (items, itemrefs)
    }

    fn write_archive(files: Vec<(String, String)>) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(CONTAINER.as_bytes()).unwrap();

        for (name, content) in files {
            zip.start_file(name.as_str(), deflated).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }

    /// EPUB 3 with a navigation document.
    pub(crate) fn epub_bytes(chapters: &[Chapter]) -> Vec<u8> {
        let (items, itemrefs) = manifest_items(chapters);
        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">sample-book</dc:identifier>
    <dc:title>Sample</dc:title>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    {}
  </manifest>
  <spine>
    {}
  </spine>
</package>"#,
            items, itemrefs
        );

        let links = chapters
            .iter()
            .map(|c| {
                format!(
                    r#"<li><a href="{}">{}</a></li>"#,
                    c.file_name(),
                    escape(&c.title)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let nav = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>Contents</title></head>
<body>
  <nav epub:type="toc"><ol>
    {}
  </ol></nav>
</body>
</html>"#,
            links
        );

        let mut files = vec![
            ("OEBPS/content.opf".to_string(), opf),
            ("OEBPS/nav.xhtml".to_string(), nav),
        ];
        files.extend(
            chapters
                .iter()
                .map(|c| (format!("OEBPS/{}", c.file_name()), c.xhtml())),
        );
        write_archive(files)
    }

    /// EPUB 2 with an NCX table of contents and no navigation document.
    pub(crate) fn epub2_bytes(chapters: &[Chapter]) -> Vec<u8> {
        ncx_archive(chapters, None)
    }

    /// NCX book that also declares a navigation document holding `nav`.
    pub(crate) fn epub_with_nav_and_ncx(chapters: &[Chapter], nav: &str) -> Vec<u8> {
        ncx_archive(chapters, Some(nav))
    }

    fn ncx_archive(chapters: &[Chapter], nav: Option<&str>) -> Vec<u8> {
        let (items, itemrefs) = manifest_items(chapters);
        let nav_item = match nav {
            Some(_) => r#"<item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#,
            None => "",
        };
        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">sample-book</dc:identifier>
    <dc:title>Sample</dc:title>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    {}
    {}
  </manifest>
  <spine toc="ncx">
    {}
  </spine>
</package>"#,
            nav_item, items, itemrefs
        );

        let points = chapters
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    r#"<navPoint id="np{0}" playOrder="{0}"><navLabel><text>{1}</text></navLabel><content src="{2}"/></navPoint>"#,
                    i + 1,
                    escape(&c.title),
                    c.file_name()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        let ncx = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head/>
  <docTitle><text>Sample</text></docTitle>
  <navMap>
    {}
  </navMap>
</ncx>"#,
            points
        );

        let mut files = vec![
            ("OEBPS/content.opf".to_string(), opf),
            ("OEBPS/toc.ncx".to_string(), ncx),
        ];
        if let Some(nav) = nav {
            files.push(("OEBPS/nav.xhtml".to_string(), nav.to_string()));
        }
        files.extend(
            chapters
                .iter()
                .map(|c| (format!("OEBPS/{}", c.file_name()), c.xhtml())),
        );
        write_archive(files)
    }

    fn text_stream(text: &str) -> Stream {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        Stream::new(dictionary! {}, content.encode().unwrap())
    }

    fn save(mut doc: Document) -> Vec<u8> {
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    /// Text-only PDF with `pages` pages.
    pub(crate) fn pdf_bytes(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for n in 1..=pages {
            let content_id = doc.add_object(text_stream(&format!("Page {}", n)));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let pages_dict = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        save(doc)
    }

    /// Single-page PDF whose page draws a JPEG image.
    pub(crate) fn pdf_with_jpeg() -> Vec<u8> {
        let pixels = image::RgbImage::from_pixel(16, 24, image::Rgb([180, 40, 40]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(pixels)
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 16,
                "Height" => 24,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![160.into(), 0.into(), 0.into(), 240.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });

        let pages_dict = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        save(doc)
    }
}

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, email: &str) {
    let user = User {
        id: id.to_string(),
        email: email.to_string(),
        password_hash: "hash".to_string(),
        display_name: None,
        confirmed: true,
        confirmation_token: None,
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();
}

fn stored_book(id: &str, user_id: &str, created_at: i64) -> StoredBook {
    StoredBook {
        id: id.to_string(),
        title: format!("Book {}", id),
        file_url: format!("http://localhost/books/{}/{}.pdf", user_id, id),
        file_type: "application/pdf".to_string(),
        user_id: user_id.to_string(),
        cover: None,
        progress: 0,
        is_favorite: false,
        created_at,
    }
}

fn sample_epub() -> Vec<u8> {
    epub_bytes(&[
        Chapter::new("One", &"a".repeat(250)),
        Chapter::new("Two", &"b".repeat(100)),
        Chapter::new("Three", ""),
    ])
}

fn config_for(backend: BackendKind, dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.backend = backend;
    config.storage.data_dir = dir.join("data");
    config.remote.database = dir.join("remote.db");
    config.remote.bucket_dir = dir.join("bucket");
    config.reader.chars_per_location = 100;
    config.reader.debounce_ms = 20;
    config
}

// ========== DATABASE ==========

#[test]
fn db_create_and_get_user() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let by_email = db.get_user_by_email("alice@example.com").unwrap().unwrap();
    assert_eq!(by_email.id, "user-1");
    assert!(by_email.confirmed);

    let by_id = db.get_user_by_id("user-1").unwrap().unwrap();
    assert_eq!(by_id.email, "alice@example.com");

    assert!(db.get_user_by_email("nobody@example.com").unwrap().is_none());
}

#[test]
fn db_duplicate_email_is_rejected() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let duplicate = User {
        id: "user-2".to_string(),
        email: "alice@example.com".to_string(),
        password_hash: "hash".to_string(),
        display_name: None,
        confirmed: true,
        confirmation_token: None,
        created_at: now_timestamp(),
        last_login: None,
    };
    assert!(db.create_user(&duplicate).is_err());
}

#[test]
fn db_confirm_user_consumes_token() {
    let db = test_db();
    let user = User {
        id: "user-1".to_string(),
        email: "bob@example.com".to_string(),
        password_hash: "hash".to_string(),
        display_name: Some("Bob".to_string()),
        confirmed: false,
        confirmation_token: Some("confirm-me".to_string()),
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();

    let confirmed = db.confirm_user("confirm-me").unwrap().unwrap();
    assert!(confirmed.confirmed);
    assert!(confirmed.confirmation_token.is_none());
    assert!(db.confirm_user("confirm-me").unwrap().is_none());
}

#[test]
fn db_sessions_expire() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    let live = Session {
        token: "live".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() + 3600,
    };
    let expired = Session {
        token: "expired".to_string(),
        user_id: "user-1".to_string(),
        expires_at: now_timestamp() - 3600,
    };
    db.create_session(&live).unwrap();
    db.create_session(&expired).unwrap();

    assert_eq!(db.cleanup_expired_sessions().unwrap(), 1);
    assert!(db.get_session("live").unwrap().is_some());
    assert!(db.get_session("expired").unwrap().is_none());

    db.delete_session("live").unwrap();
    assert!(db.get_session("live").unwrap().is_none());
}

#[test]
fn db_books_are_listed_newest_first() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");

    db.insert_book(&stored_book("old", "user-1", 100)).unwrap();
    db.insert_book(&stored_book("new", "user-1", 300)).unwrap();
    db.insert_book(&stored_book("mid", "user-1", 200)).unwrap();

    let ids: Vec<_> = db
        .list_books("user-1")
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, ["new", "mid", "old"]);

    let recent = db.recent_books("user-1", 2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, "new");
}

#[test]
fn db_book_updates_are_owner_scoped() {
    let db = test_db();
    create_user(&db, "user-1", "alice@example.com");
    create_user(&db, "user-2", "bob@example.com");
    db.insert_book(&stored_book("book-1", "user-1", 100)).unwrap();

    assert!(!db.update_book_progress("book-1", "user-2", 50).unwrap());
    assert!(db.update_book_progress("book-1", "user-1", 50).unwrap());
    assert!(db.set_book_favorite("book-1", "user-1", true).unwrap());

    let book = db.get_book("book-1", "user-1").unwrap().unwrap();
    assert_eq!(book.progress, 50);
    assert!(book.is_favorite);
    assert!(db.get_book("book-1", "user-2").unwrap().is_none());

    assert_eq!(db.favorite_books("user-1").unwrap().len(), 1);
    assert!(!db.delete_book("book-1", "user-2").unwrap());
    assert!(db.delete_book("book-1", "user-1").unwrap());
    assert!(db.list_books("user-1").unwrap().is_empty());
}

#[test]
fn stored_book_maps_to_remote_record() {
    let record = stored_book("book-1", "user-1", 100).into_record();
    assert_eq!(record.format, BookFormat::Pdf);
    assert_eq!(record.is_favorite, Some(false));
    assert!(matches!(record.content, ContentRef::RemoteUrl(_)));
}

// ========== LIBRARY ==========

#[tokio::test]
async fn reading_session_persists_progress_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Local, dir.path())).unwrap();
    let library = app.library();

    let record = library
        .add(Upload::new("novel.epub", sample_epub()), None)
        .await
        .unwrap();
    assert_eq!(record.title, "novel");
    assert_eq!(record.progress, 0);

    let mut session = library.open_reader(&record.id).await.unwrap();
    assert_eq!(session.table_of_contents().len(), 3);
    session.navigate(Navigation::Next);
    session.navigate(Navigation::Next);
    assert_eq!(session.close().await.unwrap(), Some(40));

    assert_eq!(library.books()[0].progress, 40);
    assert_eq!(library.list().await.unwrap()[0].progress, 40);

    let session = library.open_reader(&record.id).await.unwrap();
    assert_eq!(session.position().progress(), 40);
    assert_eq!(session.close().await.unwrap(), Some(40));

    let recent: Vec<RecentEntry> = library.recent().await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, record.id);
    assert_eq!(recent[0].progress, 40);

    // Only the add is announced; tracked progress writes are silent.
    let notices = app.notifier().active();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Success);
}

#[tokio::test]
async fn reopening_resumes_at_the_saved_chapter() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Local, dir.path())).unwrap();
    let library = app.library();

    let data = epub_bytes(&[
        Chapter::new("One", "first"),
        Chapter::new("Two", "second"),
        Chapter::new("Three", "third"),
    ]);
    let record = library
        .add(Upload::new("thirds.epub", data), None)
        .await
        .unwrap();

    let mut session = library.open_reader(&record.id).await.unwrap();
    session.navigate(Navigation::Next);
    assert_eq!(session.close().await.unwrap(), Some(33));

    let session = library.open_reader(&record.id).await.unwrap();
    let position = session.position();
    assert_eq!(position.progress(), 33);
    assert!(position.location_token().ends_with("two.xhtml@0"));
    session.close().await.unwrap();

    assert_eq!(library.books()[0].progress, 33);
}

#[tokio::test]
async fn pdf_progress_follows_pages() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Object, dir.path())).unwrap();
    let library = app.library();

    let record = library
        .add(Upload::new("scan.pdf", pdf_bytes(10)), Some("Scanned"))
        .await
        .unwrap();
    assert_eq!(record.title, "Scanned");
    assert_eq!(record.format, BookFormat::Pdf);

    let mut session = library.open_reader(&record.id).await.unwrap();
    session.navigate(Navigation::Page(5));
    assert_eq!(session.close().await.unwrap(), Some(50));

    assert_eq!(library.update_progress(&record.id, 150).await.unwrap(), 100);
    let last = app.notifier().active().pop().unwrap();
    assert_eq!(last.kind, NoticeKind::Success);
    assert_eq!(library.list().await.unwrap()[0].progress, 100);
}

#[tokio::test]
async fn unsupported_extension_is_rejected_before_storage() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Object, dir.path())).unwrap();
    let library = app.library();

    let result = library
        .add(Upload::new("notes.txt", b"plain text".to_vec()), None)
        .await;
    assert!(matches!(result, Err(AppError::InvalidFormat(_))));

    assert!(library.list().await.unwrap().is_empty());
    let notices = app.notifier().active();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].kind, NoticeKind::Error);
}

#[tokio::test]
async fn pdf_cover_is_taken_from_first_page() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Object, dir.path())).unwrap();

    let with_image = app
        .library()
        .add(Upload::new("photo.pdf", pdf_with_jpeg()), None)
        .await
        .unwrap();
    let cover = with_image.cover.unwrap();
    assert!(cover.starts_with("data:image/png;base64,"));
    assert_ne!(cover, png_data_url(&placeholder_png("photo")));

    let text_only = app
        .library()
        .add(Upload::new("text.pdf", pdf_bytes(1)), None)
        .await
        .unwrap();
    assert_eq!(text_only.cover.unwrap(), png_data_url(&placeholder_png("text")));
}

#[tokio::test]
async fn corrupt_document_is_reported_inline() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Local, dir.path())).unwrap();
    let library = app.library();

    let record = library
        .add(Upload::new("broken.epub", b"not a zip".to_vec()), None)
        .await
        .unwrap();
    let before = app.notifier().active().len();

    let result = library.open_reader(&record.id).await;
    assert!(matches!(result, Err(AppError::CorruptDocument(_))));
    assert_eq!(app.notifier().active().len(), before);
}

#[tokio::test]
async fn removed_book_cannot_be_opened() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Object, dir.path())).unwrap();
    let library = app.library();

    let record = library
        .add(Upload::new("gone.epub", sample_epub()), None)
        .await
        .unwrap();
    assert_eq!(
        library.remove(&record.id).await.unwrap(),
        ContentRemoval::Removed
    );
    assert!(library.books().is_empty());

    let result = library.open_reader(&record.id).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn local_content_does_not_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(BackendKind::Local, dir.path());

    let id = {
        let app = App::from_config(config.clone()).unwrap();
        app.library()
            .add(Upload::new("novel.epub", sample_epub()), None)
            .await
            .unwrap()
            .id
    };

    let app = App::from_config(config).unwrap();
    let books = app.library().list().await.unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].id, id);

    let result = app.library().open_reader(&id).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn favorites_need_the_remote_backend() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Local, dir.path())).unwrap();
    let library = app.library();

    let record = library
        .add(Upload::new("novel.epub", sample_epub()), None)
        .await
        .unwrap();
    assert_eq!(record.is_favorite, None);

    let result = library.toggle_favorite(&record.id).await;
    assert!(matches!(result, Err(AppError::Unsupported(_))));
    assert_eq!(
        app.notifier().active().pop().unwrap().kind,
        NoticeKind::Error
    );
    assert!(matches!(library.sign_out(), Err(AppError::Unsupported(_))));
}

#[tokio::test]
async fn clearing_history_emits_one_notice() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Object, dir.path())).unwrap();
    let library = app.library();

    let record = library
        .add(Upload::new("novel.epub", sample_epub()), None)
        .await
        .unwrap();
    library.open_reader(&record.id).await.unwrap().close().await.unwrap();
    assert_eq!(library.recent().await.unwrap().len(), 1);
    let before = app.notifier().active().len();

    library.clear_history().await.unwrap();

    assert!(library.recent().await.unwrap().is_empty());
    assert_eq!(library.list().await.unwrap().len(), 1);
    let notices = app.notifier().active();
    assert_eq!(notices.len(), before + 1);
    assert_eq!(notices[before].kind, NoticeKind::Success);
}

#[tokio::test]
async fn shelves_are_managed_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Local, dir.path())).unwrap();
    let library = app.library();

    let names: Vec<_> = library
        .shelves()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, ["Currently Reading", "Favorites", "Read Later"]);
    assert!(app.notifier().active().is_empty());

    // Blank names never reach the backend.
    let rejected = library.create_shelf("  ").await;
    assert!(matches!(rejected, Err(AppError::InvalidInput(_))));
    assert_eq!(library.shelves().await.unwrap().len(), 3);

    let record = library
        .add(Upload::new("novel.epub", sample_epub()), None)
        .await
        .unwrap();
    let shelf = library.create_shelf("Poetry").await.unwrap();
    library.add_to_shelf(&shelf.id, &record.id).await.unwrap();
    library.delete_shelf("1").await.unwrap();

    let shelves = library.shelves().await.unwrap();
    assert_eq!(shelves.len(), 3);
    assert_eq!(shelves[2].name, "Poetry");
    assert_eq!(shelves[2].book_ids, [record.id.clone()]);

    // One error for the blank name, then add, create, shelve and delete.
    let kinds: Vec<_> = app.notifier().active().into_iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        [
            NoticeKind::Error,
            NoticeKind::Success,
            NoticeKind::Success,
            NoticeKind::Success,
            NoticeKind::Success,
        ]
    );

    assert!(matches!(
        library.delete_shelf("1").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn remote_library_is_cleared_on_sign_out() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::from_config(config_for(BackendKind::Remote, dir.path())).unwrap();
    let library = app.library();

    assert_eq!(app.resume(None), AuthState::Anonymous);
    assert!(matches!(
        library.list().await,
        Err(AppError::NotAuthenticated)
    ));

    let registration = library
        .sign_up("Ada", "ada@example.com", "secret1")
        .unwrap();
    assert!(matches!(registration, Registration::SignedIn(_)));

    let record = library
        .add(Upload::new("paper.pdf", pdf_bytes(2)), None)
        .await
        .unwrap();
    assert!(library.toggle_favorite(&record.id).await.unwrap());
    assert_eq!(library.favorites().await.unwrap().len(), 1);
    assert_eq!(library.recent().await.unwrap()[0].id, record.id);

    let token = app.guard().unwrap().token().unwrap();
    library.sign_out().unwrap();
    assert!(library.books().is_empty());
    assert!(matches!(
        library.list().await,
        Err(AppError::NotAuthenticated)
    ));
    assert_eq!(app.resume(Some(token.as_str())), AuthState::Anonymous);

    library.sign_up("Bob", "bob@example.com", "secret2").unwrap();
    assert!(library.list().await.unwrap().is_empty());
    library.sign_out().unwrap();

    library.sign_in("ada@example.com", "secret1").unwrap();
    let books = library.list().await.unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].is_favorite, Some(true));

    let mut session = library.open_reader(&record.id).await.unwrap();
    session.navigate(Navigation::Next);
    assert_eq!(session.close().await.unwrap(), Some(100));
}

#[tokio::test]
async fn remote_session_resumes_from_token() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(BackendKind::Remote, dir.path());

    let token = {
        let app = App::from_config(config.clone()).unwrap();
        app.library()
            .sign_up("Ada", "ada@example.com", "secret1")
            .unwrap();
        app.guard().unwrap().token().unwrap()
    };

    let app = App::from_config(config).unwrap();
    assert_eq!(app.guard().unwrap().state(), AuthState::Checking);
    assert!(matches!(
        app.resume(Some(token.as_str())),
        AuthState::Authenticated(_)
    ));
    assert!(app.library().list().await.unwrap().is_empty());
}

/// Backend whose `list` waits until released.
#[derive(Default)]
struct SlowListBackend {
    started: Notify,
    release: Notify,
    listed: Vec<BookRecord>,
}

fn record_from(book: NewBook, id: &str) -> BookRecord {
    BookRecord {
        id: id.to_string(),
        title: book.title,
        format: book.format,
        content: ContentRef::Handle(id.to_string()),
        cover: book.cover,
        created_at: 2,
        last_opened: None,
        progress: 0,
        is_favorite: None,
    }
}

#[async_trait]
impl LibraryBackend for SlowListBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn list(&self, _identity: &Identity) -> Result<Vec<BookRecord>> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(self.listed.clone())
    }

    async fn get(&self, _identity: &Identity, _id: &str) -> Result<Option<BookRecord>> {
        Ok(None)
    }

    async fn insert(&self, _identity: &Identity, book: NewBook) -> Result<BookRecord> {
        Ok(record_from(book, "fresh"))
    }

    async fn remove(&self, _identity: &Identity, _id: &str) -> Result<ContentRemoval> {
        Ok(ContentRemoval::Removed)
    }

    async fn update_progress(&self, _identity: &Identity, _id: &str, _progress: u8) -> Result<()> {
        Ok(())
    }

    async fn content(&self, _identity: &Identity, record: &BookRecord) -> Result<Vec<u8>> {
        Err(AppError::NotFound(record.id.clone()))
    }

    async fn recent(&self, _identity: &Identity) -> Result<Vec<RecentEntry>> {
        Ok(Vec::new())
    }

    async fn record_opened(&self, _identity: &Identity, _record: &BookRecord) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn stale_fetch_does_not_overwrite_newer_state() {
    let stale = record_from(
        NewBook {
            title: "Stale".to_string(),
            filename: "stale.epub".to_string(),
            format: BookFormat::Epub,
            cover: None,
            data: Vec::new(),
        },
        "stale",
    );
    let backend = Arc::new(SlowListBackend {
        listed: vec![stale],
        ..SlowListBackend::default()
    });
    let store = Arc::new(LibraryStore::new(
        backend.clone(),
        None,
        Notifier::default(),
        &Config::default(),
    ));

    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.list().await }
    });
    backend.started.notified().await;

    let added = store
        .add(Upload::new("fresh.epub", sample_epub()), None)
        .await
        .unwrap();
    backend.release.notify_one();

    let listed = pending.await.unwrap().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, added.id);

    let ids: Vec<_> = store.books().into_iter().map(|b| b.id).collect();
    assert_eq!(ids, ["fresh"]);
}

#[tokio::test]
async fn progress_write_supersedes_fetch_in_flight() {
    let listed = record_from(
        NewBook {
            title: "Fresh".to_string(),
            filename: "fresh.epub".to_string(),
            format: BookFormat::Epub,
            cover: None,
            data: Vec::new(),
        },
        "fresh",
    );
    let backend = Arc::new(SlowListBackend {
        listed: vec![listed],
        ..SlowListBackend::default()
    });
    let store = Arc::new(LibraryStore::new(
        backend.clone(),
        None,
        Notifier::default(),
        &Config::default(),
    ));
    store
        .add(Upload::new("fresh.epub", sample_epub()), None)
        .await
        .unwrap();

    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.list().await }
    });
    backend.started.notified().await;

    assert_eq!(store.update_progress("fresh", 70).await.unwrap(), 70);
    backend.release.notify_one();

    let listed = pending.await.unwrap().unwrap();
    assert_eq!(listed[0].progress, 70);
    assert_eq!(store.books()[0].progress, 70);
}

#[test]
fn config_selects_backend() {
    let config = Config::parse(
        r#"
[storage]
backend = "object"
data_dir = "/tmp/library"

[reader]
debounce_ms = 250
"#,
    )
    .unwrap();

    assert_eq!(config.storage.backend, BackendKind::Object);
    assert_eq!(config.reader.debounce_ms, 250);
    assert_eq!(config.library.recent_limit, 10);
}

#[test]
fn telemetry_init_is_idempotent() {
    crate::telemetry::init();
    crate::telemetry::init();
    tracing::info!("telemetry ready");
}
