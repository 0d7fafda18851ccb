//! Documents for tests in this crate and its dependents (`test-util`).

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};

/// An A4 document with `pages` pages, each holding one filled square.
/// MediaBox and Resources live on the page tree root, so pages inherit both.
///
/// # Panics
///
/// If lopdf fails to encode the document.
pub fn sample_pdf(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids = Vec::new();
    for i in 0..pages {
        let content = Content {
            operations: vec![
                Operation::new(
                    "re",
                    vec![
                        Object::Integer(10 + i as i64),
                        Object::Integer(10),
                        Object::Integer(50),
                        Object::Integer(50),
                    ],
                ),
                Operation::new("f", vec![]),
            ],
        };
        let encoded = content.encode().expect("sample page content encodes");
        let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", pages_id);
        page.set("Contents", content_id);
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let mut root = Dictionary::new();
    root.set("Type", Object::Name(b"Pages".to_vec()));
    root.set("Count", Object::Integer(pages as i64));
    root.set("Kids", Object::Array(kids));
    root.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(595),
            Object::Integer(842),
        ]),
    );
    root.set("Resources", Object::Dictionary(Dictionary::new()));
    doc.objects.insert(pages_id, Object::Dictionary(root));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", pages_id);
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("sample document serializes");
    out
}
