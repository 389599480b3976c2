//! PDF-merge strategy: copy every rendered page into one document

use crate::error::{RenderError, RenderResult};
use crate::orchestrator::RenderedUnits;
use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::debug;

/// Page attributes a page may inherit from its ancestors
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guard against malformed, cyclic page trees
const MAX_TREE_DEPTH: usize = 32;

/// A loaded upstream document plus what has already been copied from it
struct SourceDoc {
    doc: Document,
    pages: Vec<ObjectId>,
    id_map: HashMap<ObjectId, ObjectId>,
}

impl SourceDoc {
    fn load(bytes: &[u8]) -> Result<Self, lopdf::Error> {
        let doc = Document::load_mem(bytes)?;
        // get_pages is keyed by page number, so values come out in page order
        let pages = doc.get_pages().into_values().collect();
        Ok(Self {
            doc,
            pages,
            id_map: HashMap::new(),
        })
    }
}

/// Merge rendered PDFs into one document in original label order
///
/// Original ordinals are walked in batches of `batch_size`; each unique
/// document is parsed at most once per batch and dropped afterwards. Every
/// occurrence of a duplicated unit gets its own page objects, while shared
/// resources are copied once per batch.
pub fn merge_pdfs(rendered: &RenderedUnits, batch_size: usize) -> RenderResult<Vec<u8>> {
    let labels = rendered.index.len();
    let fail = |e: lopdf::Error| RenderError::assembly(labels, e);

    let mut target = Document::with_version("1.5");
    let pages_id = target.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(labels);

    for (batch, ordinals) in rendered.index.ordinals().chunks(batch_size.max(1)).enumerate() {
        let mut loaded: HashMap<usize, SourceDoc> = HashMap::new();

        for &unique in ordinals {
            let source = match loaded.entry(unique) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let bytes = rendered.artifacts.get(unique).ok_or_else(|| {
                        RenderError::assembly(labels, format!("missing artifact for unique unit {unique}"))
                    })?;
                    let source = SourceDoc::load(bytes).map_err(fail)?;
                    if source.pages.is_empty() {
                        return Err(RenderError::assembly(
                            labels,
                            format!("rendered document for unique unit {unique} has no pages"),
                        ));
                    }
                    entry.insert(source)
                }
            };

            for &page_id in &source.pages {
                let copied = copy_page(&source.doc, page_id, &mut target, &mut source.id_map, pages_id)
                    .map_err(fail)?;
                kids.push(Object::Reference(copied));
            }
        }

        debug!(batch, documents = loaded.len(), pages = kids.len(), "Merge batch complete");
    }

    let count = kids.len() as i64;
    target.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = target.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    target.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    target.save_to(&mut out).map_err(|e| RenderError::assembly(labels, e))?;
    Ok(out)
}

/// Copy one page as a fresh page object under `parent`
fn copy_page(
    source: &Document,
    page_id: ObjectId,
    target: &mut Document,
    id_map: &mut HashMap<ObjectId, ObjectId>,
    parent: ObjectId,
) -> Result<ObjectId, lopdf::Error> {
    let mut page = source.get_dictionary(page_id)?.clone();
    for key in INHERITABLE {
        if !page.has(key) {
            if let Some(value) = inherited(source, &page, key) {
                page.set(key.to_vec(), value.clone());
            }
        }
    }
    // Parent would drag the whole source page tree along
    page.remove(b"Parent");

    let mut page = match remap(source, target, id_map, Object::Dictionary(page))? {
        Object::Dictionary(dict) => dict,
        _ => return Err(lopdf::Error::ObjectNotFound(page_id)),
    };
    page.set("Parent", parent);
    Ok(target.add_object(page))
}

fn inherited<'a>(doc: &'a Document, page: &Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut next = page.get(b"Parent").and_then(Object::as_reference).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(next?).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        next = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

/// Deep-copy a referenced object, reusing earlier copies
fn copy_object(
    source: &Document,
    target: &mut Document,
    id_map: &mut HashMap<ObjectId, ObjectId>,
    source_id: ObjectId,
) -> Result<ObjectId, lopdf::Error> {
    if let Some(target_id) = id_map.get(&source_id) {
        return Ok(*target_id);
    }

    // Reserve the id before recursing so reference cycles terminate
    let new_id = target.add_object(Object::Null);
    id_map.insert(source_id, new_id);

    let object = source.get_object(source_id)?.clone();
    let object = remap(source, target, id_map, object)?;
    match target.objects.get_mut(&new_id) {
        Some(slot) => *slot = object,
        None => return Err(lopdf::Error::ObjectNotFound(new_id)),
    }
    Ok(new_id)
}

fn remap(
    source: &Document,
    target: &mut Document,
    id_map: &mut HashMap<ObjectId, ObjectId>,
    object: Object,
) -> Result<Object, lopdf::Error> {
    match object {
        Object::Reference(id) => Ok(Object::Reference(copy_object(source, target, id_map, id)?)),
        Object::Array(items) => Ok(Object::Array(
            items
                .into_iter()
                .map(|o| remap(source, target, id_map, o))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap(source, target, id_map, value.clone())?;
            }
            Ok(Object::Dictionary(dict))
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap(source, target, id_map, value.clone())?;
            }
            Ok(Object::Stream(stream))
        }
        other => Ok(other),
    }
}
