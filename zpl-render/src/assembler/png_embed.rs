//! PNG-embed strategy: one page per label, raster centered on the page

use crate::error::{RenderError, RenderResult};
use crate::orchestrator::RenderedUnits;
use image::ImageFormat;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

struct EmbeddedImage {
    id: ObjectId,
    name: String,
    width: f32,
    height: f32,
}

/// Placement `(width, height, x, y)` of an image scaled uniformly to fit the page
pub fn fit_centered(image_w: f32, image_h: f32, page_w: f32, page_h: f32) -> (f32, f32, f32, f32) {
    if image_w <= 0.0 || image_h <= 0.0 {
        return (page_w, page_h, 0.0, 0.0);
    }
    let scale = (page_w / image_w).min(page_h / image_h);
    let (w, h) = (image_w * scale, image_h * scale);
    (w, h, (page_w - w) / 2.0, (page_h - h) / 2.0)
}

/// Build a PDF with one `page_size` (points) page per original label
///
/// Each unique image is embedded once and referenced by every page showing it.
pub fn embed_pngs(rendered: &RenderedUnits, page_size: (f32, f32)) -> RenderResult<Vec<u8>> {
    let labels = rendered.index.len();
    let (page_w, page_h) = page_size;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut images = Vec::with_capacity(rendered.artifacts.len());
    for (unique, bytes) in rendered.artifacts.iter().enumerate() {
        let image = embed_image(&mut doc, unique, bytes).map_err(|e| {
            RenderError::assembly(labels, format!("unique unit {unique}: {e}"))
        })?;
        images.push(image);
    }

    let mut kids: Vec<Object> = Vec::with_capacity(labels);
    for image in rendered.index.expand(&images)? {
        let (w, h, x, y) = fit_centered(image.width, image.height, page_w, page_h);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(w),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(h),
                        Object::Real(x),
                        Object::Real(y),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(image.name.clone().into_bytes())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| RenderError::assembly(labels, e))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_w),
                Object::Real(page_h),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { image.name.as_str() => image.id },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| RenderError::assembly(labels, e))?;
    Ok(out)
}

fn embed_image(doc: &mut Document, unique: usize, bytes: &[u8]) -> Result<EmbeddedImage, String> {
    let rgb = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(|e| e.to_string())?
        .to_rgb8();
    let (width, height) = rgb.dimensions();

    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb.into_raw(),
    );

    Ok(EmbeddedImage {
        id: doc.add_object(stream),
        name: format!("Im{unique}"),
        width: width as f32,
        height: height as f32,
    })
}
