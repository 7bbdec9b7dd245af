use crate::assets::AssetStore;
use crate::compose::Compositor;
use crate::core::{Color, Face, GarmentType, ResourceRef};
use crate::surface::{DesignElement, DrawingSurface, ElementKind, sanitize_elements};
use crate::{Result, StudioError};
use chrono::Utc;
use error_stack::ResultExt;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, Write};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const SCHEMA_VERSION: &str = "1.0";

/// `design.json`: per-face element lists, z-order preserved by list order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DesignDocument {
    pub version: String,
    pub objects: BTreeMap<Face, Vec<DesignElement>>,
}

/// `metadata.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub version: String,
    #[serde(rename = "type")]
    pub garment_type: GarmentType,
    pub color: Color,
    pub timestamp: String,
}

/// Fully parsed and validated archive contents. Built completely before any
/// surface mutation, so a failed load leaves the surface untouched.
#[derive(Clone, Debug)]
pub struct LoadedProject {
    pub garment_type: GarmentType,
    pub base_color: Color,
    pub faces: BTreeMap<Face, Vec<DesignElement>>,
}

/// The surface as a `design.json`-shaped document, without embedding.
/// Used for the remote `canvasState` payload; transient references are
/// filtered exactly as an archive write filters them.
pub fn current_document(surface: &DrawingSurface) -> DesignDocument {
    let mut objects = BTreeMap::new();
    for face in Face::ALL {
        let list = sanitize_elements(surface.elements(face).to_vec());
        if !list.is_empty() {
            objects.insert(face, list);
        }
    }
    DesignDocument {
        version: SCHEMA_VERSION.to_owned(),
        objects,
    }
}

/// Serialize the surface into a ZIP archive.
///
/// Every image element is embedded under `images/` with a deterministic
/// per-element name; an element whose durable resource cannot be fetched
/// falls back to its region of the last composite. A face's portion of
/// `design.json` is only assembled once all of its embeddings resolved, and
/// the emitted document never references a transient or unresolved asset.
pub fn write_archive<W: Write + Seek>(
    writer: W,
    surface: &DrawingSurface,
    store: &AssetStore,
    compositor: &Compositor,
    garment_type: GarmentType,
    base_color: Color,
) -> Result<()> {
    let mut doc = DesignDocument {
        version: SCHEMA_VERSION.to_owned(),
        objects: BTreeMap::new(),
    };
    let mut blobs: Vec<(String, Vec<u8>)> = Vec::new();

    for face in Face::ALL {
        // Transient references never materialize into an archive.
        let candidates = sanitize_elements(surface.elements(face).to_vec());
        let mut resolved = Vec::with_capacity(candidates.len());
        for mut el in candidates {
            if let ElementKind::Image { src } = &el.kind {
                let entry = ResourceRef::embedded(face, resolved.len());
                match embed_element_bytes(store, compositor, &el, src) {
                    Some(png) => {
                        blobs.push((entry.as_str().to_owned(), png));
                        el.kind = ElementKind::Image { src: entry };
                    }
                    None => {
                        warn!(
                            reference = src.as_str(),
                            "element could not be embedded, leaving it out of the archive"
                        );
                        continue;
                    }
                }
            }
            resolved.push(el);
        }
        // All embeddings for this face are settled; only now does the face
        // enter the document.
        if !resolved.is_empty() {
            doc.objects.insert(face, resolved);
        }
    }

    let metadata = ArchiveMetadata {
        version: SCHEMA_VERSION.to_owned(),
        garment_type,
        color: base_color,
        timestamp: Utc::now().to_rfc3339(),
    };

    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default();
    let design = serde_json::to_vec_pretty(&doc).change_context(StudioError::ArchiveCorrupt)?;
    let meta = serde_json::to_vec_pretty(&metadata).change_context(StudioError::ArchiveCorrupt)?;

    zip.start_file("design.json", options)
        .change_context(StudioError::ArchiveCorrupt)?;
    zip.write_all(&design).change_context(StudioError::ArchiveCorrupt)?;
    zip.start_file("metadata.json", options)
        .change_context(StudioError::ArchiveCorrupt)?;
    zip.write_all(&meta).change_context(StudioError::ArchiveCorrupt)?;
    for (name, bytes) in &blobs {
        zip.start_file(name, options)
            .change_context(StudioError::ArchiveCorrupt)?;
        zip.write_all(bytes).change_context(StudioError::ArchiveCorrupt)?;
    }
    zip.finish().change_context(StudioError::ArchiveCorrupt)?;
    info!(embedded = blobs.len(), "archive written");
    Ok(())
}

/// PNG bytes for one image element: the fetched durable resource, or its
/// last-composite region when the fetch fails. `None` drops the element.
fn embed_element_bytes(
    store: &AssetStore,
    compositor: &Compositor,
    el: &DesignElement,
    src: &ResourceRef,
) -> Option<Vec<u8>> {
    match store.load(src) {
        Ok(img) => encode_png(&img).ok(),
        Err(err) => {
            warn!(
                reference = src.as_str(),
                ?err,
                "embedding fetch failed, re-rasterizing from last composite"
            );
            let crop = compositor.crop_last_region(el.id)?;
            encode_png(&crop).ok()
        }
    }
}

fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut out, image::ImageFormat::Png)
        .change_context(StudioError::EmbeddingFailure)?;
    Ok(out.into_inner())
}

/// Parse and validate a ZIP archive.
///
/// A malformed or missing `design.json` aborts the whole load; a missing
/// individual embedded image only drops that element. Embedded assets are
/// extracted into fresh durable local handles before the elements are
/// handed over.
pub fn read_archive<R: Read + Seek>(reader: R, store: &mut AssetStore) -> Result<LoadedProject> {
    let mut zip = ZipArchive::new(reader).change_context(StudioError::ArchiveCorrupt)?;

    let doc: DesignDocument = {
        let mut file = zip
            .by_name("design.json")
            .change_context(StudioError::ArchiveCorrupt)
            .attach("archive has no design.json")?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .change_context(StudioError::ArchiveCorrupt)?;
        serde_json::from_str(&raw)
            .change_context(StudioError::ArchiveCorrupt)
            .attach("design.json is malformed")?
    };

    let metadata = read_metadata(&mut zip);

    let mut faces = BTreeMap::new();
    for (face, elements) in doc.objects {
        // Transient schemes are never accepted back in.
        let mut restored = Vec::new();
        for mut el in sanitize_elements(elements) {
            if let ElementKind::Image { src } = &el.kind {
                if src.is_embedded() {
                    match extract_embedded(&mut zip, store, src.as_str()) {
                        Some(fresh) => el.kind = ElementKind::Image { src: fresh },
                        None => continue,
                    }
                }
            }
            restored.push(el);
        }
        faces.insert(face, restored);
    }

    Ok(LoadedProject {
        garment_type: metadata.garment_type,
        base_color: metadata.color,
        faces,
    })
}

fn read_metadata<R: Read + Seek>(zip: &mut ZipArchive<R>) -> ArchiveMetadata {
    let fallback = || ArchiveMetadata {
        version: SCHEMA_VERSION.to_owned(),
        garment_type: GarmentType::TShirt,
        color: Color::WHITE,
        timestamp: Utc::now().to_rfc3339(),
    };
    let Ok(mut file) = zip.by_name("metadata.json") else {
        warn!("archive has no metadata.json, using defaults");
        return fallback();
    };
    let mut raw = String::new();
    if file.read_to_string(&mut raw).is_err() {
        warn!("metadata.json unreadable, using defaults");
        return fallback();
    }
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(%err, "metadata.json malformed, using defaults");
        fallback()
    })
}

fn extract_embedded<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    store: &mut AssetStore,
    entry: &str,
) -> Option<ResourceRef> {
    let mut bytes = Vec::new();
    match zip.by_name(entry) {
        Ok(mut file) => {
            if file.read_to_end(&mut bytes).is_err() {
                warn!(entry, "embedded image unreadable, dropping element");
                return None;
            }
        }
        Err(_) => {
            warn!(entry, "embedded image missing from archive, dropping element");
            return None;
        }
    }
    match store.adopt_embedded(entry, &bytes) {
        Ok(fresh) => Some(fresh),
        Err(err) => {
            warn!(entry, ?err, "embedded image invalid, dropping element");
            None
        }
    }
}

/// Load an archive into the surface. The surface is only touched after the
/// whole archive parsed and validated; the caller applies the returned
/// garment metadata and re-applies the access gate afterwards.
pub fn load_archive_into<R: Read + Seek>(
    reader: R,
    surface: &mut DrawingSurface,
    store: &mut AssetStore,
) -> Result<LoadedProject> {
    let project = read_archive(reader, store)?;
    surface.replace_all(project.faces.clone());
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GarmentConfiguration, StudioTuning};
    use image::Rgba;
    use std::io::Cursor;

    fn rig() -> (DrawingSurface, AssetStore, Compositor) {
        let tuning = StudioTuning {
            working_resolution: 64,
            ..Default::default()
        };
        (
            DrawingSurface::new(tuning),
            AssetStore::new(),
            Compositor::new(&tuning),
        )
    }

    fn archive_bytes(
        surface: &DrawingSurface,
        store: &AssetStore,
        comp: &Compositor,
    ) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        write_archive(
            &mut buf,
            surface,
            store,
            comp,
            GarmentType::TShirt,
            Color::rgb(1, 2, 3),
        )
        .unwrap();
        buf.into_inner()
    }

    fn durable_png(dir: &tempfile::TempDir, name: &str) -> ResourceRef {
        let img = RgbaImage::from_pixel(3, 3, Rgba([40, 50, 60, 255]));
        let path = dir.path().join(name);
        img.save(&path).unwrap();
        ResourceRef::new(path.to_string_lossy().into_owned())
    }

    #[test]
    fn text_round_trip_preserves_content_and_geometry() {
        let (mut surface, mut store, comp) = rig();
        let id = surface.add_text("Hello");
        surface.select(Some(id));
        let bytes = archive_bytes(&surface, &store, &comp);

        let (mut fresh, ..) = rig();
        let project = load_archive_into(Cursor::new(bytes), &mut fresh, &mut store).unwrap();
        assert_eq!(project.garment_type, GarmentType::TShirt);
        assert_eq!(project.base_color, Color::rgb(1, 2, 3));

        let restored = fresh.elements(Face::Front);
        assert_eq!(restored.len(), 1);
        assert!(restored[0].same_content(surface.element(id).unwrap()));
        assert_eq!((restored[0].x, restored[0].y), (0.0, 0.0));
    }

    #[test]
    fn durable_image_round_trip_preserves_geometry_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let (mut surface, mut store, comp) = rig();
        let img_id = surface
            .add_image(&store, durable_png(&dir, "a.png"))
            .unwrap();
        surface.update(img_id, crate::surface::ElementEdit::Position(7.0, 11.0));
        surface.update(img_id, crate::surface::ElementEdit::Rotation(30.0));
        let text_id = surface.add_text("tail");
        let bytes = archive_bytes(&surface, &store, &comp);

        let (mut fresh, mut fresh_store, _) = rig();
        load_archive_into(Cursor::new(bytes), &mut fresh, &mut fresh_store).unwrap();
        let restored = fresh.elements(Face::Front);
        assert_eq!(restored.len(), 2);

        // order preserved, geometry intact, reference rewritten to a fresh durable handle
        let ElementKind::Image { src } = &restored[0].kind else {
            panic!("first element should be the image");
        };
        assert!(!src.is_transient());
        assert!(!src.is_embedded());
        assert_eq!(fresh_store.load(src).unwrap().dimensions(), (3, 3));
        assert_eq!((restored[0].x, restored[0].y), (7.0, 11.0));
        assert_eq!(restored[0].rotation, 30.0);
        assert!(restored[1].same_content(surface.element(text_id).unwrap()));
    }

    #[test]
    fn transient_elements_never_reach_design_json() {
        let (mut surface, mut store, comp) = rig();
        let transient = store.stash_rgba(RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255])));
        surface.add_image(&store, transient).unwrap();
        surface.add_text("kept");
        let bytes = archive_bytes(&surface, &store, &comp);

        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut raw = String::new();
        zip.by_name("design.json")
            .unwrap()
            .read_to_string(&mut raw)
            .unwrap();
        let doc: DesignDocument = serde_json::from_str(&raw).unwrap();
        let front = &doc.objects[&Face::Front];
        assert_eq!(front.len(), 1);
        assert!(matches!(&front[0].kind, ElementKind::Text { content, .. } if content == "kept"));
    }

    #[test]
    fn fetch_failure_falls_back_to_composite_region() {
        let dir = tempfile::tempdir().unwrap();
        let (mut surface, mut store, mut comp) = rig();
        let reference = durable_png(&dir, "gone.png");
        surface.add_image(&store, reference.clone()).unwrap();
        comp.composite(
            &mut surface,
            &store,
            &GarmentConfiguration::of(GarmentType::TShirt),
        );
        std::fs::remove_file(reference.as_str()).unwrap();

        let bytes = archive_bytes(&surface, &store, &comp);
        let (mut fresh, mut fresh_store, _) = rig();
        load_archive_into(Cursor::new(bytes), &mut fresh, &mut fresh_store).unwrap();
        let restored = fresh.elements(Face::Front);
        assert_eq!(restored.len(), 1, "fallback keeps the element in the archive");
        let ElementKind::Image { src } = &restored[0].kind else {
            panic!("expected image element");
        };
        assert_eq!(fresh_store.load(src).unwrap().dimensions(), (3, 3));
    }

    #[test]
    fn corrupt_archive_aborts_and_leaves_surface_untouched() {
        let (mut surface, mut store, _) = rig();
        surface.add_text("precious");
        surface.drain_events();

        let err = load_archive_into(Cursor::new(b"not a zip".to_vec()), &mut surface, &mut store)
            .unwrap_err();
        assert_eq!(*err.current_context(), StudioError::ArchiveCorrupt);
        assert_eq!(surface.elements(Face::Front).len(), 1);
        assert!(surface.drain_events().is_empty());

        // a zip without design.json is just as corrupt
        let mut buf = Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(&mut buf);
        zip.start_file("metadata.json", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"{}").unwrap();
        zip.finish().unwrap();
        let err =
            load_archive_into(Cursor::new(buf.into_inner()), &mut surface, &mut store).unwrap_err();
        assert_eq!(*err.current_context(), StudioError::ArchiveCorrupt);
        assert_eq!(surface.elements(Face::Front).len(), 1);
    }

    #[test]
    fn missing_embedded_file_skips_only_that_element() {
        let doc = serde_json::json!({
            "version": SCHEMA_VERSION,
            "objects": {
                "front": [
                    {"type": "image", "src": "images/front-0.png",
                     "x": 0.0, "y": 0.0, "scale": 1.0, "rotation": 0.0, "visible": true},
                    {"type": "text", "content": "survivor", "font": "Arial", "size": 40.0,
                     "color": "#000000", "outline": 0.0,
                     "x": 5.0, "y": 6.0, "scale": 1.0, "rotation": 0.0, "visible": true}
                ]
            }
        });
        let mut buf = Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(&mut buf);
        zip.start_file("design.json", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(doc.to_string().as_bytes()).unwrap();
        zip.finish().unwrap();

        let (mut surface, mut store, _) = rig();
        load_archive_into(Cursor::new(buf.into_inner()), &mut surface, &mut store).unwrap();
        let restored = surface.elements(Face::Front);
        assert_eq!(restored.len(), 1);
        assert!(
            matches!(&restored[0].kind, ElementKind::Text { content, .. } if content == "survivor")
        );
    }

    #[test]
    fn transient_references_are_rejected_on_load() {
        let doc = serde_json::json!({
            "version": SCHEMA_VERSION,
            "objects": {
                "front": [
                    {"type": "image", "src": "blob:foreign/42",
                     "x": 0.0, "y": 0.0, "scale": 1.0, "rotation": 0.0, "visible": true}
                ]
            }
        });
        let mut buf = Cursor::new(Vec::new());
        let mut zip = ZipWriter::new(&mut buf);
        zip.start_file("design.json", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(doc.to_string().as_bytes()).unwrap();
        zip.finish().unwrap();

        let (mut surface, mut store, _) = rig();
        let project =
            load_archive_into(Cursor::new(buf.into_inner()), &mut surface, &mut store).unwrap();
        assert!(project.faces[&Face::Front].is_empty());
        assert!(surface.is_empty());
    }
}
