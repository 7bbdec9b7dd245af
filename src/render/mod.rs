pub mod resources;
pub mod systems;

pub use resources::*;
use systems::*;

use bevy::prelude::*;

/// Bevy plugin wiring the viewport adapter and the frame pump. The host app
/// inserts a [`StudioSession`] resource before adding this plugin.
#[derive(Default)]
pub struct StudioRenderPlugin;

impl Plugin for StudioRenderPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ViewportHandles>()
            .add_systems(Startup, (setup_scene, load_initial_design).chain())
            .add_systems(
                Update,
                (
                    handle_input,
                    apply_garment_switch,
                    drive_texture_sync,
                    bind_garment_material,
                    release_on_exit,
                )
                    .chain(),
            );
    }
}
