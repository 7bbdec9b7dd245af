use super::resources::{StudioSession, ViewportHandles};
use crate::core::GarmentConfiguration;
use bevy::app::AppExit;
use bevy::gltf::GltfAssetLabel;
use bevy::input::mouse::MouseWheel;
use bevy::prelude::*;
use bevy_math::Affine2;
use std::time::Instant;
use tracing::{error, info};

/// Camera, lighting, garment mesh, and the single material every composite
/// lands on.
pub fn setup_scene(
    mut commands: Commands,
    session: Res<StudioSession>,
    asset_server: Res<AssetServer>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut viewport: ResMut<ViewportHandles>,
) {
    commands.insert_resource(AmbientLight {
        brightness: 300.0,
        ..default()
    });
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0.0, 1.2, 2.6).looking_at(Vec3::new(0.0, 1.0, 0.0), Vec3::Y),
    ));
    commands.spawn((
        DirectionalLight {
            illuminance: 8000.0,
            ..default()
        },
        Transform::from_xyz(2.0, 4.0, 3.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    let material = materials.add(StandardMaterial {
        base_color: Color::WHITE,
        perceptual_roughness: 1.0,
        metallic: 0.0,
        uv_transform: garment_uv_transform(&session.config),
        ..default()
    });
    viewport.material = Some(material);
    viewport.scene_root = Some(spawn_garment(&mut commands, &asset_server, &session.config));
}

fn spawn_garment(
    commands: &mut Commands,
    asset_server: &AssetServer,
    config: &GarmentConfiguration,
) -> Entity {
    let scene: Handle<Scene> =
        asset_server.load(GltfAssetLabel::Scene(0).from_asset(config.model_reference));
    commands.spawn((SceneRoot(scene), Transform::default())).id()
}

/// Per-type texture placement, applied independent of composites so a
/// garment switch repositions immediately.
fn garment_uv_transform(config: &GarmentConfiguration) -> Affine2 {
    Affine2::from_scale_angle_translation(
        Vec2::splat(1.0 / config.scale_multiplier),
        0.0,
        Vec2::new(config.offset_x, config.offset_y),
    )
}

/// Kick off the session load named by the injected context.
pub fn load_initial_design(mut session: ResMut<StudioSession>) {
    match session.load_remote() {
        Ok(()) if session.context.design_id.is_some() => {
            info!(design = ?session.context.design_id, "remote design loaded");
        }
        Ok(()) => {}
        Err(err) => {
            // load failure leaves the surface untouched; the user retries
            error!(?err, "remote design load failed");
        }
    }
}

/// Route canvas gestures to the drawing surface.
pub fn handle_input(
    mut session: ResMut<StudioSession>,
    mut wheel: MessageReader<MouseWheel>,
    keys: Res<ButtonInput<KeyCode>>,
) {
    let mut ticks = 0i32;
    for event in wheel.read() {
        if event.y > 0.0 {
            ticks += 1;
        } else if event.y < 0.0 {
            ticks -= 1;
        }
    }
    if ticks != 0 {
        session.surface.wheel_scale(ticks);
    }
    if keys.just_pressed(KeyCode::BracketLeft) {
        session.surface.rotate_left();
    }
    if keys.just_pressed(KeyCode::BracketRight) {
        session.surface.rotate_right();
    }
    if keys.just_pressed(KeyCode::Delete) {
        if let Some(id) = session.surface.selection() {
            session.surface.delete(id);
        }
    }
}

/// Apply a pending garment switch: new configuration, immediate UV offset
/// correction, fresh mesh, recomposite against the new base color.
pub fn apply_garment_switch(
    mut commands: Commands,
    mut session: ResMut<StudioSession>,
    mut viewport: ResMut<ViewportHandles>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    asset_server: Res<AssetServer>,
) {
    let Some(garment) = session.pending_garment.take() else {
        return;
    };
    let color = session.config.base_color;
    session.config = GarmentConfiguration::of(garment).with_color(color);
    info!(?garment, "garment switched");

    if let Some(material) = viewport.material.as_ref().and_then(|h| materials.get_mut(h)) {
        material.uv_transform = garment_uv_transform(&session.config);
    }
    if let Some(root) = viewport.scene_root.take() {
        commands.entity(root).despawn();
    }
    viewport.scene_root = Some(spawn_garment(&mut commands, &asset_server, &session.config));
    session.scheduler.mark_dirty();
}

/// The frame pump: finish last cycle's deferrals, drain mutation events
/// through the scheduler, and run at most one composite.
pub fn drive_texture_sync(
    mut session: ResMut<StudioSession>,
    mut viewport: ResMut<ViewportHandles>,
    mut images: ResMut<Assets<Image>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    // selection parked by the previous composite returns one paint cycle later
    session.surface.apply_deferred_restore();
    // layout recompute deferred past the bulk-insert frame
    if session.surface.take_layout_dirty() {
        session.surface.refresh_layout();
    }

    let now = Instant::now();
    let mutated = !session.surface.drain_events().is_empty();
    let run = if mutated {
        session.scheduler.on_mutation(now)
    } else {
        session.scheduler.poll(now)
    };
    if !run {
        return;
    }

    let StudioSession {
        surface,
        store,
        compositor,
        scheduler,
        config,
        ..
    } = &mut *session;
    let bitmap = compositor.composite(surface, store, config);
    viewport.apply_texture(bitmap, &mut images, &mut materials);
    scheduler.finish();
}

/// Newly spawned garment meshes pick up the studio material.
pub fn bind_garment_material(
    mut commands: Commands,
    viewport: Res<ViewportHandles>,
    fresh_meshes: Query<Entity, Added<Mesh3d>>,
) {
    let Some(material) = viewport.material.clone() else {
        return;
    };
    for entity in &fresh_meshes {
        commands.entity(entity).insert(MeshMaterial3d(material.clone()));
    }
}

/// Texture handles and transient session images are released synchronously
/// at teardown.
pub fn release_on_exit(
    mut exit: MessageReader<AppExit>,
    mut session: ResMut<StudioSession>,
    mut viewport: ResMut<ViewportHandles>,
    mut images: ResMut<Assets<Image>>,
) {
    if exit.read().next().is_some() {
        viewport.release(&mut images);
        session.store.clear_transient();
    }
}
