use crate::assets::AssetStore;
use crate::core::{Color, Face, ResourceRef, StudioTuning};
use crate::{Result, StudioError};
use error_stack::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

impl Default for ElementId {
    fn default() -> Self {
        static CTR: AtomicU64 = AtomicU64::new(1);
        Self(CTR.fetch_add(1, Ordering::Relaxed))
    }
}

impl ElementId {
    pub fn new() -> Self {
        Self::default()
    }
}

fn default_scale() -> f32 {
    1.0
}
fn default_true() -> bool {
    true
}

/// Kind-specific payload of a design element. The serde tag matches the
/// `type` discriminator of `design.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementKind {
    Image {
        src: ResourceRef,
    },
    Text {
        content: String,
        font: String,
        size: f32,
        color: Color,
        outline: f32,
    },
}

/// One element on a garment face. Position and transform are in working
/// resolution units; list position within a face encodes z-stacking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DesignElement {
    #[serde(skip, default)]
    pub id: ElementId,
    #[serde(flatten)]
    pub kind: ElementKind,
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Runtime-only: cleared by the access gate, never persisted.
    #[serde(skip, default = "default_true")]
    pub interactive: bool,
}

impl DesignElement {
    fn new(kind: ElementKind) -> Self {
        Self {
            id: ElementId::new(),
            kind,
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            rotation: 0.0,
            visible: true,
            interactive: true,
        }
    }

    /// Durable equality: everything the archive round-trip preserves.
    /// Runtime identity and interactivity are excluded.
    pub fn same_content(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.x == other.x
            && self.y == other.y
            && self.scale == other.scale
            && self.rotation == other.rotation
            && self.visible == other.visible
    }
}

/// Typed field edit for `DrawingSurface::update`. Text-only fields applied
/// to an image element are ignored.
#[derive(Clone, Debug)]
pub enum ElementEdit {
    Position(f32, f32),
    Scale(f32),
    Rotation(f32),
    Visible(bool),
    Content(String),
    Font(String),
    FontSize(f32),
    TextColor(Color),
    Outline(f32),
}

/// Mutation events observed by the sync scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Added(ElementId),
    Removed(ElementId),
    Modified(ElementId),
    SelectionChanged(Option<ElementId>),
    /// Bulk replacement (archive or remote load) or active-face switch.
    Reloaded,
}

/// Drop elements whose image reference is only valid inside some other
/// session. This is the single validation pass every externally sourced
/// element list goes through, regardless of which door it came in by.
pub fn sanitize_elements(elements: Vec<DesignElement>) -> Vec<DesignElement> {
    elements
        .into_iter()
        .filter(|el| match &el.kind {
            ElementKind::Image { src } if src.is_transient() => {
                warn!(reference = src.as_str(), "dropping element with transient reference");
                false
            }
            _ => true,
        })
        .collect()
}

/// The 2D composition canvas. Owns the ordered per-face element lists and
/// the selection; every mutation lands in an event queue the scheduler
/// drains. Working coordinates are fixed-resolution and independent of the
/// display, so composites look the same on every device.
pub struct DrawingSurface {
    faces: [Vec<DesignElement>; 4],
    active_face: Face,
    selection: Option<ElementId>,
    deferred_restore: Option<ElementId>,
    events: VecDeque<SurfaceEvent>,
    selection_enabled: bool,
    pinch_start_scale: Option<f32>,
    layout_dirty: bool,
    tuning: StudioTuning,
}

impl DrawingSurface {
    pub fn new(tuning: StudioTuning) -> Self {
        Self {
            faces: [const { Vec::new() }; 4],
            active_face: Face::Front,
            selection: None,
            deferred_restore: None,
            events: VecDeque::new(),
            selection_enabled: true,
            pinch_start_scale: None,
            layout_dirty: false,
            tuning,
        }
    }

    pub fn tuning(&self) -> &StudioTuning {
        &self.tuning
    }

    pub fn active_face(&self) -> Face {
        self.active_face
    }

    pub fn set_active_face(&mut self, face: Face) {
        if self.active_face != face {
            self.active_face = face;
            self.select(None);
            self.events.push_back(SurfaceEvent::Reloaded);
        }
    }

    pub fn elements(&self, face: Face) -> &[DesignElement] {
        &self.faces[face.index()]
    }

    pub fn element(&self, id: ElementId) -> Option<&DesignElement> {
        self.faces.iter().flatten().find(|el| el.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.faces.iter().all(Vec::is_empty)
    }

    fn element_mut(&mut self, id: ElementId) -> Option<&mut DesignElement> {
        self.faces.iter_mut().flatten().find(|el| el.id == id)
    }

    /// Add an image element on the active face. Fails without creating the
    /// element when the source cannot be decoded.
    pub fn add_image(&mut self, store: &AssetStore, src: ResourceRef) -> Result<ElementId> {
        store
            .load(&src)
            .change_context(StudioError::ResourceUnavailable)
            .attach_lazy(|| format!("cannot add image {}", src.as_str()))?;
        Ok(self.push_element(ElementKind::Image { src }))
    }

    pub fn add_text(&mut self, content: impl Into<String>) -> ElementId {
        self.push_element(ElementKind::Text {
            content: content.into(),
            font: "Arial".to_owned(),
            size: 40.0,
            color: Color::BLACK,
            outline: 0.0,
        })
    }

    fn push_element(&mut self, kind: ElementKind) -> ElementId {
        let mut el = DesignElement::new(kind);
        el.interactive = self.selection_enabled;
        let id = el.id;
        self.faces[self.active_face.index()].push(el);
        self.events.push_back(SurfaceEvent::Added(id));
        id
    }

    pub fn update(&mut self, id: ElementId, edit: ElementEdit) -> bool {
        let (scale_min, scale_max) = (self.tuning.scale_min, self.tuning.scale_max);
        let Some(el) = self.element_mut(id) else {
            return false;
        };
        match edit {
            ElementEdit::Position(x, y) => {
                el.x = x;
                el.y = y;
            }
            ElementEdit::Scale(s) => el.scale = s.clamp(scale_min, scale_max),
            ElementEdit::Rotation(deg) => el.rotation = deg,
            ElementEdit::Visible(v) => el.visible = v,
            ElementEdit::Content(c) => match &mut el.kind {
                ElementKind::Text { content, .. } => *content = c,
                ElementKind::Image { .. } => return false,
            },
            ElementEdit::Font(f) => match &mut el.kind {
                ElementKind::Text { font, .. } => *font = f,
                ElementKind::Image { .. } => return false,
            },
            ElementEdit::FontSize(s) => match &mut el.kind {
                ElementKind::Text { size, .. } => *size = s.max(1.0),
                ElementKind::Image { .. } => return false,
            },
            ElementEdit::TextColor(c) => match &mut el.kind {
                ElementKind::Text { color, .. } => *color = c,
                ElementKind::Image { .. } => return false,
            },
            ElementEdit::Outline(o) => match &mut el.kind {
                ElementKind::Text { outline, .. } => *outline = o.max(0.0),
                ElementKind::Image { .. } => return false,
            },
        }
        self.events.push_back(SurfaceEvent::Modified(id));
        true
    }

    pub fn delete(&mut self, id: ElementId) -> bool {
        for face in &mut self.faces {
            if let Some(pos) = face.iter().position(|el| el.id == id) {
                face.remove(pos);
                if self.selection == Some(id) {
                    self.selection = None;
                    self.events.push_back(SurfaceEvent::SelectionChanged(None));
                }
                self.events.push_back(SurfaceEvent::Removed(id));
                return true;
            }
        }
        false
    }

    pub fn selection(&self) -> Option<ElementId> {
        self.selection
    }

    pub fn select(&mut self, id: Option<ElementId>) {
        let target = match id {
            Some(id) if self.selection_enabled => {
                match self.element(id) {
                    Some(el) if el.interactive => Some(id),
                    _ => return,
                }
            }
            Some(_) => return,
            None => None,
        };
        if self.selection != target {
            self.selection = target;
            self.events.push_back(SurfaceEvent::SelectionChanged(target));
        }
    }

    // --- gestures -----------------------------------------------------------

    /// Pointer-wheel scroll on the selected element: one step per tick,
    /// clamped.
    pub fn wheel_scale(&mut self, ticks: i32) {
        let step = self.tuning.scale_step;
        let Some(id) = self.selection else { return };
        let Some(el) = self.element_mut(id) else { return };
        let scale = el.scale + step * ticks as f32;
        self.update(id, ElementEdit::Scale(scale));
    }

    /// Two-finger gesture start: capture the scale the ratio applies to.
    pub fn begin_pinch(&mut self) {
        self.pinch_start_scale = self
            .selection
            .and_then(|id| self.element(id))
            .map(|el| el.scale);
    }

    /// Ratio of current to initial inter-finger distance, applied to the
    /// scale captured at gesture start.
    pub fn pinch_scale(&mut self, ratio: f32) {
        let Some(start) = self.pinch_start_scale else { return };
        let Some(id) = self.selection else { return };
        self.update(id, ElementEdit::Scale(start * ratio));
    }

    pub fn end_pinch(&mut self) {
        self.pinch_start_scale = None;
    }

    /// Discrete rotate actions: one step per action, unbounded. Wrapping
    /// happens naturally at render time via modulo.
    pub fn rotate_left(&mut self) {
        self.rotate_by(-self.tuning.rotate_step);
    }

    pub fn rotate_right(&mut self) {
        self.rotate_by(self.tuning.rotate_step);
    }

    fn rotate_by(&mut self, degrees: f32) {
        let Some(id) = self.selection else { return };
        let Some(el) = self.element(id) else { return };
        let rotation = el.rotation + degrees;
        self.update(id, ElementEdit::Rotation(rotation));
    }

    /// Z-order: swap with the next element above within the face list.
    pub fn bring_forward(&mut self, id: ElementId) -> bool {
        self.shift_element(id, 1)
    }

    pub fn send_backward(&mut self, id: ElementId) -> bool {
        self.shift_element(id, -1)
    }

    fn shift_element(&mut self, id: ElementId, dir: isize) -> bool {
        for face in &mut self.faces {
            if let Some(pos) = face.iter().position(|el| el.id == id) {
                let target = pos as isize + dir;
                if target < 0 || target as usize >= face.len() {
                    return false;
                }
                face.swap(pos, target as usize);
                self.events.push_back(SurfaceEvent::Modified(id));
                return true;
            }
        }
        false
    }

    // --- events -------------------------------------------------------------

    pub fn drain_events(&mut self) -> Vec<SurfaceEvent> {
        std::mem::take(&mut self.events).into()
    }

    // --- compositor hand-off ------------------------------------------------

    /// Clear the selection for a snapshot without arming the mutation path.
    pub fn take_selection_silently(&mut self) -> Option<ElementId> {
        self.selection.take()
    }

    /// Park a selection for restoration on the next paint cycle.
    pub fn defer_selection_restore(&mut self, id: Option<ElementId>) {
        self.deferred_restore = id;
    }

    /// Restore a parked selection. No event is emitted: the surface state
    /// the snapshot captured is unchanged by the restore.
    pub fn apply_deferred_restore(&mut self) {
        if let Some(id) = self.deferred_restore.take() {
            if self.selection_enabled && self.element(id).is_some() {
                self.selection = Some(id);
            }
        }
    }

    // --- bulk load ----------------------------------------------------------

    /// Replace the whole surface with externally sourced lists. The
    /// transient-reference validation pass runs here so every ingestion door
    /// shares it. Emits a single `Reloaded` and schedules the deferred
    /// layout pass.
    pub fn replace_all(&mut self, faces: impl IntoIterator<Item = (Face, Vec<DesignElement>)>) {
        self.selection = None;
        self.deferred_restore = None;
        self.faces = [const { Vec::new() }; 4];
        for (face, elements) in faces {
            let mut list = sanitize_elements(elements);
            for el in &mut list {
                el.interactive = self.selection_enabled;
            }
            self.faces[face.index()] = list;
        }
        self.layout_dirty = true;
        self.events.push_back(SurfaceEvent::Reloaded);
    }

    /// A layout pass right after a bulk insert reads stale geometry, so the
    /// caller runs this one deferral later.
    pub fn take_layout_dirty(&mut self) -> bool {
        std::mem::take(&mut self.layout_dirty)
    }

    /// Clamp element anchors back into the working square. Elements restored
    /// from foreign archives may carry positions from other templates.
    pub fn refresh_layout(&mut self) {
        let max = self.tuning.working_resolution as f32;
        for el in self.faces.iter_mut().flatten() {
            el.x = el.x.clamp(0.0, max);
            el.y = el.y.clamp(0.0, max);
        }
    }

    // --- access gate --------------------------------------------------------

    /// Lock or unlock every element plus surface-level selection.
    pub(crate) fn set_interactivity(&mut self, enabled: bool) {
        self.selection_enabled = enabled;
        for el in self.faces.iter_mut().flatten() {
            el.interactive = enabled;
        }
        if !enabled && self.selection.is_some() {
            self.selection = None;
            self.events.push_back(SurfaceEvent::SelectionChanged(None));
        }
    }

    pub fn selection_enabled(&self) -> bool {
        self.selection_enabled
    }
}
