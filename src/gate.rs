use crate::core::SessionContext;
use crate::surface::DrawingSurface;
use tracing::info;

/// Ownership gate over the drawing surface.
///
/// When the session is not owned by the viewer, every element is marked
/// non-interactive and surface-level selection is disabled. Loads insert
/// elements in their default interactive state, so the gate must be applied
/// once more after an asynchronous load settles; `reapply_after_load` is
/// that second application.
#[derive(Clone, Copy, Debug)]
pub struct AccessGate {
    view_only: bool,
}

impl AccessGate {
    pub fn from_context(context: &SessionContext) -> Self {
        Self {
            view_only: context.view_only,
        }
    }

    pub fn apply_view_only(&mut self, is_owner: bool, surface: &mut DrawingSurface) {
        self.view_only = !is_owner;
        if self.view_only {
            info!("surface locked for view-only session");
        }
        surface.set_interactivity(is_owner);
    }

    /// Close the gate-applied-before-load vs. elements-inserted-during-load
    /// race: freshly inserted elements are interactive by default.
    pub fn reapply_after_load(&self, surface: &mut DrawingSurface) {
        surface.set_interactivity(!self.view_only);
    }

    pub fn is_view_only(&self) -> bool {
        self.view_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Face, StudioTuning};
    use crate::surface::{DesignElement, sanitize_elements};

    #[test]
    fn view_only_survives_an_async_load() {
        let mut surface = DrawingSurface::new(StudioTuning::default());
        let context = SessionContext {
            view_only: true,
            ..Default::default()
        };
        let mut gate = AccessGate::from_context(&context);
        gate.apply_view_only(false, &mut surface);

        // load inserts five elements; replace_all leaves them locked, but a
        // host-driven insert path may not, so the gate runs once more
        let incoming: Vec<DesignElement> = {
            let mut tmp = DrawingSurface::new(StudioTuning::default());
            for i in 0..5 {
                tmp.add_text(format!("t{i}"));
            }
            tmp.elements(Face::Front).to_vec()
        };
        surface.replace_all([(Face::Front, sanitize_elements(incoming))]);
        gate.reapply_after_load(&mut surface);

        assert_eq!(surface.elements(Face::Front).len(), 5);
        for el in surface.elements(Face::Front) {
            assert!(!el.interactive);
        }
        let first = surface.elements(Face::Front)[0].id;
        surface.select(Some(first));
        assert_eq!(surface.selection(), None);
    }

    #[test]
    fn owner_keeps_full_interactivity() {
        let mut surface = DrawingSurface::new(StudioTuning::default());
        let id = surface.add_text("mine");
        let mut gate = AccessGate::from_context(&SessionContext::default());
        gate.apply_view_only(true, &mut surface);
        surface.select(Some(id));
        assert_eq!(surface.selection(), Some(id));
        assert!(!gate.is_view_only());
    }
}
