use bevy::log::LogPlugin;
use bevy::prelude::*;

use crate::core::{GarmentType, SessionContext, StudioTuning};
use crate::remote::DesignClient;
use crate::render::{StudioRenderPlugin, StudioSession};

/// Launch the studio for one session. `remote_api` points at the external
/// persistence service; without it the session is archive-only.
pub fn run_studio(context: SessionContext, garment: GarmentType, remote_api: Option<String>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wgpu=warn".into()),
        )
        .try_init();

    let remote = remote_api.map(DesignClient::new);
    App::new()
        .insert_resource(ClearColor(Color::srgb(0.12, 0.12, 0.14)))
        .insert_resource(StudioSession::new(
            context,
            garment,
            StudioTuning::default(),
            remote,
        ))
        .add_plugins((
            DefaultPlugins
                .build()
                .disable::<LogPlugin>()
                .set(ImagePlugin::default_nearest()),
            StudioRenderPlugin,
        ))
        .run();
}
