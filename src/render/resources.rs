use bevy::prelude::*;
use tracing::warn;

use crate::archive::{self, LoadedProject};
use crate::assets::AssetStore;
use crate::compose::Compositor;
use crate::core::{GarmentConfiguration, GarmentType, SessionContext, StudioTuning};
use crate::gate::AccessGate;
use crate::remote::DesignClient;
use crate::surface::DrawingSurface;
use crate::sync::SyncScheduler;
use std::io::{Read, Seek, Write};

/// The whole editing pipeline as one resource: surface, asset store,
/// compositor, and scheduler are a single cooperative unit, so they live
/// together instead of crossing system boundaries every frame.
#[derive(Resource)]
pub struct StudioSession {
    pub surface: DrawingSurface,
    pub store: AssetStore,
    pub compositor: Compositor,
    pub scheduler: SyncScheduler,
    pub gate: AccessGate,
    pub config: GarmentConfiguration,
    pub context: SessionContext,
    pub remote: Option<DesignClient>,
    pub(crate) pending_garment: Option<GarmentType>,
}

impl StudioSession {
    pub fn new(
        context: SessionContext,
        garment: GarmentType,
        tuning: StudioTuning,
        remote: Option<DesignClient>,
    ) -> Self {
        let mut surface = DrawingSurface::new(tuning);
        let mut gate = AccessGate::from_context(&context);
        gate.apply_view_only(!context.view_only, &mut surface);
        Self {
            surface,
            store: AssetStore::new(),
            compositor: Compositor::with_bundled_font(&tuning),
            scheduler: SyncScheduler::new(tuning.composite_throttle),
            gate,
            config: GarmentConfiguration::of(garment),
            context,
            remote,
            pending_garment: None,
        }
    }

    /// Switch the garment type. The texture offset is corrected immediately
    /// by the viewport systems; the recomposite follows on the next tick.
    pub fn set_garment_type(&mut self, garment: GarmentType) {
        if garment != self.config.garment_type {
            self.pending_garment = Some(garment);
        }
    }

    /// Load a project archive. On failure the surface is untouched; on
    /// success the gate is re-applied so loaded elements respect view-only.
    pub fn load_archive<R: Read + Seek>(&mut self, reader: R) -> crate::Result<()> {
        let project: LoadedProject =
            archive::load_archive_into(reader, &mut self.surface, &mut self.store)?;
        self.config = GarmentConfiguration::of(project.garment_type).with_color(project.base_color);
        self.gate.reapply_after_load(&mut self.surface);
        Ok(())
    }

    /// Serialize the current session into a project archive.
    pub fn save_archive<W: Write + Seek>(&self, writer: W) -> crate::Result<()> {
        archive::write_archive(
            writer,
            &self.surface,
            &self.store,
            &self.compositor,
            self.config.garment_type,
            self.config.base_color,
        )
    }

    /// Fetch the design named by the session context from the remote store.
    pub fn load_remote(&mut self) -> crate::Result<()> {
        let (Some(client), Some(id)) = (self.remote.as_ref(), self.context.design_id.clone())
        else {
            return Ok(());
        };
        let record = client.fetch(&id)?;
        self.surface.replace_all(record.canvas_state.objects.clone());
        if let Some(garment) = record.garment_type {
            let color = record.color.unwrap_or(self.config.base_color);
            self.config = GarmentConfiguration::of(garment).with_color(color);
        }
        // ownership beyond the pass/fail flag is the server's concern
        let owner = effective_owner(record.is_owner, &self.context);
        self.gate.apply_view_only(owner, &mut self.surface);
        Ok(())
    }

    /// Persist the session remotely, attaching the last composite as the
    /// preview image. Local state is unaffected either way.
    pub fn save_remote(&self) -> crate::Result<Option<String>> {
        let Some(client) = self.remote.as_ref() else {
            return Ok(None);
        };
        let preview = self.compositor.last_composite().and_then(|(bitmap, _)| {
            let mut out = std::io::Cursor::new(Vec::new());
            let ok = image::DynamicImage::ImageRgba8(bitmap.clone())
                .write_to(&mut out, image::ImageFormat::Png)
                .is_ok();
            if !ok {
                warn!("preview encode failed, saving without preview");
            }
            ok.then(|| out.into_inner())
        });
        let document = archive::current_document(&self.surface);
        let id = client.save(
            self.context.design_id.as_deref(),
            &crate::remote::SaveRequest {
                garment_type: self.config.garment_type,
                color: self.config.base_color,
                canvas_state: &document,
                preview_png: preview.as_deref(),
            },
        )?;
        Ok(Some(id))
    }
}

/// A record that omits the ownership flag falls back to what the session
/// context claims, rather than locking an owner out.
fn effective_owner(reported: Option<bool>, context: &SessionContext) -> bool {
    reported.unwrap_or(!context.view_only) && !context.view_only
}

/// Texture and mesh bookkeeping of the 3D viewport. Exactly one texture
/// handle is owned at a time; replacement releases the prior handle
/// explicitly.
#[derive(Resource, Default)]
pub struct ViewportHandles {
    pub material: Option<Handle<StandardMaterial>>,
    pub texture: Option<Handle<Image>>,
    pub scene_root: Option<Entity>,
}

impl ViewportHandles {
    /// Swap in a freshly composited bitmap as the garment texture.
    pub fn apply_texture(
        &mut self,
        bitmap: image::RgbaImage,
        images: &mut Assets<Image>,
        materials: &mut Assets<StandardMaterial>,
    ) {
        use bevy::image::{ImageAddressMode, ImageSampler, ImageSamplerDescriptor};
        use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
        use bevy_asset::RenderAssetUsages;

        let (width, height) = bitmap.dimensions();
        let mut image = Image::new_fill(
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            &[0, 0, 0, 0],
            TextureFormat::Rgba8UnormSrgb,
            RenderAssetUsages::default(),
        );
        image.data = Some(bitmap.into_raw());

        let mut sampler = ImageSamplerDescriptor::default();
        sampler.address_mode_u = ImageAddressMode::ClampToEdge;
        sampler.address_mode_v = ImageAddressMode::ClampToEdge;
        image.sampler = ImageSampler::Descriptor(sampler);

        let fresh = images.add(image);
        if let Some(material) = self.material.as_ref().and_then(|h| materials.get_mut(h)) {
            material.base_color_texture = Some(fresh.clone());
        }
        if let Some(old) = self.texture.replace(fresh) {
            images.remove(&old);
        }
    }

    /// Synchronous release at teardown; no implicit reclamation is assumed.
    pub fn release(&mut self, images: &mut Assets<Image>) {
        if let Some(old) = self.texture.take() {
            images.remove(&old);
        }
        self.material = None;
        self.scene_root = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(view_only: bool) -> SessionContext {
        SessionContext {
            design_id: Some("d1".into()),
            view_only,
            identity: None,
        }
    }

    #[test]
    fn omitted_ownership_falls_back_to_the_context() {
        assert!(effective_owner(None, &context(false)));
        assert!(!effective_owner(None, &context(true)));
    }

    #[test]
    fn reported_ownership_wins_but_never_overrides_view_only() {
        assert!(!effective_owner(Some(false), &context(false)));
        assert!(effective_owner(Some(true), &context(false)));
        assert!(!effective_owner(Some(true), &context(true)));
    }
}
