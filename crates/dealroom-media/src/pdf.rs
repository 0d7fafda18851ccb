//! Embedding a captured signature into an existing PDF.
//!
//! The PNG is added once as an image XObject (RGB with a DeviceGray soft
//! mask for transparency) and drawn centred on each target page. Existing
//! page content is wrapped in `q ... Q` so its graphics state cannot leak
//! into the signature placement. Every other object is left untouched.

use std::collections::BTreeMap;

use image::{ImageFormat, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info};

use dealroom_shared::constants::{SIGNATURE_MAX_WIDTH, SIGNATURE_PAGE_WIDTH_RATIO};

use crate::error::{MediaError, Result};

/// XObject names used for embedded signatures start with this prefix.
const SIGNATURE_XOBJECT_PREFIX: &str = "DrSig";

/// Bound on Parent-chain walks, for malformed page trees.
const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePlacement {
    LastPage,
    AllPages,
}

pub fn page_count(pdf: &[u8]) -> Result<usize> {
    let doc = Document::load_mem(pdf)?;
    Ok(doc.get_pages().len())
}

/// Decide where a signature goes. A single-page document needs no choice;
/// a multi-page one must have been given an explicit placement.
pub fn resolve_placement(page_count: usize, choice: Option<PagePlacement>) -> Result<PagePlacement> {
    match (page_count, choice) {
        (0, _) => Err(MediaError::NoPages),
        (_, Some(placement)) => Ok(placement),
        (1, None) => Ok(PagePlacement::LastPage),
        (n, None) => Err(MediaError::PlacementRequired(n)),
    }
}

/// Size of the drawn signature on a page of `page_width` units:
/// `min(page_width * 0.28, 320)` wide, height keeping the image aspect.
pub fn signature_size(page_width: f32, image_width: u32, image_height: u32) -> (f32, f32) {
    let width = (page_width * SIGNATURE_PAGE_WIDTH_RATIO).min(SIGNATURE_MAX_WIDTH);
    if image_width == 0 {
        return (width, 0.0);
    }
    (width, width * image_height as f32 / image_width as f32)
}

/// Draw `png` onto the pages selected by `placement` and re-serialise.
pub fn embed_signature(pdf: &[u8], png: &[u8], placement: PagePlacement) -> Result<Vec<u8>> {
    let mut doc = Document::load_mem(pdf)?;
    let pages: BTreeMap<u32, ObjectId> = doc.get_pages();

    let targets: Vec<(u32, ObjectId)> = match placement {
        PagePlacement::LastPage => pages.iter().next_back().map(|(n, id)| (*n, *id)).into_iter().collect(),
        PagePlacement::AllPages => pages.iter().map(|(n, id)| (*n, *id)).collect(),
    };
    if targets.is_empty() {
        return Err(MediaError::NoPages);
    }

    let rgba = image::load_from_memory_with_format(png, ImageFormat::Png)?.to_rgba8();
    let (image_width, image_height) = rgba.dimensions();
    let image_id = add_image_xobject(&mut doc, &rgba);
    let name = format!("{SIGNATURE_XOBJECT_PREFIX}{}", image_id.0);

    for (page_number, page_id) in &targets {
        let [llx, lly, urx, ury] = media_box(&doc, *page_number, *page_id)?;
        let (page_width, page_height) = (urx - llx, ury - lly);
        let (width, height) = signature_size(page_width, image_width, image_height);
        let x = llx + (page_width - width) / 2.0;
        let y = lly + (page_height - height) / 2.0;

        register_xobject(&mut doc, *page_id, &name, image_id)?;
        wrap_contents(&mut doc, *page_id, &name, [width, height, x, y])?;
        debug!(page = page_number, width, height, x, y, "Signature placed");
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    info!(
        pages = targets.len(),
        total_pages = pages.len(),
        bytes = out.len(),
        "Signature embedded"
    );
    Ok(out)
}

/// Page numbers (1-based) whose content draws an embedded signature.
pub fn signed_pages(pdf: &[u8]) -> Result<Vec<u32>> {
    let doc = Document::load_mem(pdf)?;
    let mut signed = Vec::new();

    for (page_number, page_id) in doc.get_pages() {
        let content = Content::decode(&doc.get_page_content(page_id)?)?;
        let draws_signature = content.operations.iter().any(|op| {
            op.operator == "Do"
                && matches!(
                    op.operands.first(),
                    Some(Object::Name(name)) if name.starts_with(SIGNATURE_XOBJECT_PREFIX.as_bytes())
                )
        });
        if draws_signature {
            signed.push(page_number);
        }
    }
    Ok(signed)
}

fn add_image_xobject(doc: &mut Document, rgba: &RgbaImage) -> ObjectId {
    let (width, height) = rgba.dimensions();
    let pixels = width as usize * height as usize;
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let mut mask_dict = image_dict(width, height, "DeviceGray");
    mask_dict.set("Decode", Object::Array(vec![Object::Integer(0), Object::Integer(1)]));
    let mut mask = Stream::new(mask_dict, alpha);
    // Uncompressed streams are still valid PDF.
    let _ = mask.compress();
    let mask_id = doc.add_object(mask);

    let mut rgb_dict = image_dict(width, height, "DeviceRGB");
    rgb_dict.set("SMask", mask_id);
    let mut image = Stream::new(rgb_dict, rgb);
    let _ = image.compress();
    doc.add_object(image)
}

fn image_dict(width: u32, height: u32, color_space: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(i64::from(width)));
    dict.set("Height", Object::Integer(i64::from(height)));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object> {
    match object {
        Object::Reference(id) => Ok(doc.get_object(*id)?),
        other => Ok(other),
    }
}

fn as_number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// The page's MediaBox, inherited through the page tree when absent.
fn media_box(doc: &Document, page_number: u32, page_id: ObjectId) -> Result<[f32; 4]> {
    let mut current = Some(page_id);
    for _ in 0..MAX_TREE_DEPTH {
        let Some(node_id) = current else { break };
        let node = doc.get_dictionary(node_id)?;

        if let Ok(entry) = node.get(b"MediaBox") {
            let values: Vec<f32> = match resolve(doc, entry)? {
                Object::Array(items) => items.iter().filter_map(as_number).collect(),
                _ => Vec::new(),
            };
            return match values.as_slice() {
                [a, b, c, d] => Ok([a.min(*c), b.min(*d), a.max(*c), b.max(*d)]),
                _ => Err(MediaError::MissingMediaBox(page_number)),
            };
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Err(MediaError::MissingMediaBox(page_number))
}

/// Resources inherited from an ancestor of `page_id`, if any.
fn inherited_resources(doc: &Document, page_id: ObjectId) -> Result<Option<Dictionary>> {
    let mut current = doc
        .get_dictionary(page_id)?
        .get(b"Parent")
        .and_then(Object::as_reference)
        .ok();

    for _ in 0..MAX_TREE_DEPTH {
        let Some(node_id) = current else { break };
        let node = doc.get_dictionary(node_id)?;
        if let Ok(entry) = node.get(b"Resources") {
            if let Object::Dictionary(dict) = resolve(doc, entry)? {
                return Ok(Some(dict.clone()));
            }
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(None)
}

/// Make the page's resources an indirect object owned by (or shared with)
/// the page and return its id.
fn page_resources_id(doc: &mut Document, page_id: ObjectId) -> Result<ObjectId> {
    let resources = match doc.get_dictionary(page_id)?.get(b"Resources") {
        Ok(Object::Reference(id)) => return Ok(*id),
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => inherited_resources(doc, page_id)?.unwrap_or_else(Dictionary::new),
    };

    let resources_id = doc.add_object(Object::Dictionary(resources));
    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Resources", resources_id);
    Ok(resources_id)
}

fn register_xobject(doc: &mut Document, page_id: ObjectId, name: &str, image_id: ObjectId) -> Result<()> {
    let resources_id = page_resources_id(doc, page_id)?;

    let xobject_ref = match doc.get_dictionary(resources_id)?.get(b"XObject") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };
    if let Some(xobject_id) = xobject_ref {
        if let Ok(xobjects) = doc.get_object_mut(xobject_id)?.as_dict_mut() {
            xobjects.set(name, image_id);
            return Ok(());
        }
    }

    let resources = doc.get_object_mut(resources_id)?.as_dict_mut()?;
    let has_inline = matches!(resources.get(b"XObject"), Ok(Object::Dictionary(_)));
    if has_inline {
        if let Ok(Object::Dictionary(xobjects)) = resources.get_mut(b"XObject") {
            xobjects.set(name, image_id);
        }
    } else {
        let mut xobjects = Dictionary::new();
        xobjects.set(name, image_id);
        resources.set("XObject", Object::Dictionary(xobjects));
    }
    Ok(())
}

/// Contents become `[q, existing..., Q q <cm> /Name Do Q]`.
fn wrap_contents(doc: &mut Document, page_id: ObjectId, name: &str, [width, height, x, y]: [f32; 4]) -> Result<()> {
    let existing: Vec<Object> = match doc.get_dictionary(page_id)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id)? {
            Object::Array(items) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let prefix = Content {
        operations: vec![Operation::new("q", vec![])],
    };
    let suffix = Content {
        operations: vec![
            Operation::new("Q", vec![]),
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(height),
                    Object::Real(x),
                    Object::Real(y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };

    let prefix_id = doc.add_object(Stream::new(Dictionary::new(), prefix.encode()?));
    let suffix_id = doc.add_object(Stream::new(Dictionary::new(), suffix.encode()?));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(prefix_id));
    contents.extend(existing);
    contents.push(Object::Reference(suffix_id));

    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Contents", Object::Array(contents));
    Ok(())
}
