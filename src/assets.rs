use crate::core::ResourceRef;
use crate::{Result, StudioError};
use error_stack::ResultExt;
use image::RgbaImage;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Session-local image store.
///
/// Uploads are decoded once and kept in memory behind `session:` handles;
/// those handles are transient by definition and never survive
/// serialization. Durable references (local paths, remote URLs) are resolved
/// on demand. Files extracted from archives land in a per-session directory
/// so their references stay valid for the rest of the session.
pub struct AssetStore {
    transient: HashMap<u64, RgbaImage>,
    next_handle: u64,
    extract_dir: PathBuf,
    extract_counter: u64,
    agent: ureq::Agent,
}

impl Default for AssetStore {
    fn default() -> Self {
        let extract_dir = std::env::temp_dir().join(format!("teeforge-{}", std::process::id()));
        Self {
            transient: HashMap::new(),
            next_handle: 1,
            extract_dir,
            extract_counter: 0,
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode uploaded bytes and mint a transient handle for them. The
    /// element add fails upstream when this fails; nothing is stored.
    pub fn stash_bytes(&mut self, bytes: &[u8]) -> Result<ResourceRef> {
        let decoded = image::load_from_memory(bytes)
            .change_context(StudioError::ResourceUnavailable)
            .attach("uploaded image could not be decoded")?;
        Ok(self.stash_rgba(decoded.to_rgba8()))
    }

    pub fn stash_rgba(&mut self, img: RgbaImage) -> ResourceRef {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.transient.insert(handle, img);
        ResourceRef::session(handle)
    }

    /// Resolve any reference to decoded pixels.
    pub fn load(&self, reference: &ResourceRef) -> Result<RgbaImage> {
        if let Some(handle) = reference.session_handle() {
            return self
                .transient
                .get(&handle)
                .cloned()
                .ok_or_else(|| error_stack::report!(StudioError::TransientResourceExpired))
                .attach_lazy(|| format!("stale session handle {handle}"));
        }
        if reference.is_transient() {
            // blob:/data: references from a foreign session cannot resolve here.
            return Err(error_stack::report!(StudioError::TransientResourceExpired))
                .attach_lazy(|| format!("unresolvable transient reference {}", reference.as_str()));
        }
        let bytes = self.fetch_bytes(reference)?;
        let decoded = image::load_from_memory(&bytes)
            .change_context(StudioError::ResourceUnavailable)
            .attach_lazy(|| format!("undecodable image at {}", reference.as_str()))?;
        Ok(decoded.to_rgba8())
    }

    /// Fetch the raw bytes behind a durable reference (local file or URL).
    pub fn fetch_bytes(&self, reference: &ResourceRef) -> Result<Vec<u8>> {
        if reference.is_remote() {
            let response = self
                .agent
                .get(reference.as_str())
                .call()
                .change_context(StudioError::ResourceUnavailable)
                .attach_lazy(|| format!("fetch failed for {}", reference.as_str()))?;
            return response
                .into_body()
                .read_to_vec()
                .change_context(StudioError::ResourceUnavailable)
                .attach("failed reading response body");
        }
        let path = reference
            .as_str()
            .strip_prefix("file://")
            .unwrap_or(reference.as_str());
        std::fs::read(path)
            .change_context(StudioError::ResourceUnavailable)
            .attach_lazy(|| format!("unreadable file {path}"))
    }

    /// Persist bytes pulled out of an archive into a fresh durable local
    /// handle. Returns the reference the restored element should carry.
    pub fn adopt_embedded(&mut self, entry_name: &str, bytes: &[u8]) -> Result<ResourceRef> {
        // Reject bytes that would produce an undrawable element later.
        image::load_from_memory(bytes)
            .change_context(StudioError::ResourceUnavailable)
            .attach_lazy(|| format!("embedded entry {entry_name} is not an image"))?;

        std::fs::create_dir_all(&self.extract_dir)
            .change_context(StudioError::ResourceUnavailable)
            .attach("could not create extraction directory")?;
        let base = entry_name.rsplit('/').next().unwrap_or(entry_name);
        let path = self
            .extract_dir
            .join(format!("{}-{base}", self.extract_counter));
        self.extract_counter += 1;
        std::fs::write(&path, bytes)
            .change_context(StudioError::ResourceUnavailable)
            .attach_lazy(|| format!("could not write {}", path.display()))?;
        debug!(entry = entry_name, path = %path.display(), "extracted embedded asset");
        Ok(ResourceRef::new(path.to_string_lossy().into_owned()))
    }

    /// Drop all transient images. Extracted files are left for the OS temp
    /// cleaner; handles into them stay durable for the session.
    pub fn clear_transient(&mut self) {
        if !self.transient.is_empty() {
            warn!(count = self.transient.len(), "discarding transient session images");
        }
        self.transient.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn png_bytes(w: u32, h: u32, px: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba(px));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn stash_and_load_round_trip() {
        let mut store = AssetStore::new();
        let r = store.stash_bytes(&png_bytes(4, 3, [10, 20, 30, 255])).unwrap();
        assert!(r.is_transient());
        let img = store.load(&r).unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.get_pixel(0, 0).0, [10, 20, 30, 255]);
    }

    #[test]
    fn undecodable_upload_is_rejected() {
        let mut store = AssetStore::new();
        let err = store.stash_bytes(b"not an image").unwrap_err();
        assert_eq!(*err.current_context(), StudioError::ResourceUnavailable);
    }

    #[test]
    fn stale_session_handle_is_transient_expired() {
        let store = AssetStore::new();
        let err = store.load(&ResourceRef::session(99)).unwrap_err();
        assert_eq!(*err.current_context(), StudioError::TransientResourceExpired);
    }

    #[test]
    fn cleared_handles_expire() {
        let mut store = AssetStore::new();
        let r = store.stash_bytes(&png_bytes(2, 2, [9, 9, 9, 255])).unwrap();
        store.clear_transient();
        let err = store.load(&r).unwrap_err();
        assert_eq!(*err.current_context(), StudioError::TransientResourceExpired);
    }

    #[test]
    fn adopt_embedded_yields_durable_local_handle() {
        let mut store = AssetStore::new();
        let bytes = png_bytes(2, 2, [1, 2, 3, 255]);
        let r = store.adopt_embedded("images/front-0.png", &bytes).unwrap();
        assert!(!r.is_transient());
        assert_eq!(store.load(&r).unwrap().dimensions(), (2, 2));
    }
}
