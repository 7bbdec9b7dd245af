use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// sRGB color with 8-bit channels. Serialized as a CSS-style hex string so
/// archives stay readable next to the original web tooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        let parse = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            6 => Some(Self::rgb(parse(0)?, parse(2)?, parse(4)?)),
            8 => Some(Self::rgba(parse(0)?, parse(2)?, parse(4)?, parse(6)?)),
            _ => None,
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color {s:?}")))
    }
}

/// Garment face carrying its own element list. Order of `ALL` is the order
/// faces appear in archives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Face {
    Front,
    Back,
    Left,
    Right,
}

impl Face {
    pub const ALL: [Face; 4] = [Face::Front, Face::Back, Face::Left, Face::Right];

    pub const fn index(self) -> usize {
        match self {
            Self::Front => 0,
            Self::Back => 1,
            Self::Left => 2,
            Self::Right => 3,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentType {
    TShirt,
    Hoodie,
    LongSleeve,
    Tank,
}

/// Per-type template, mesh, and placement metadata. Immutable: switching
/// garment type swaps the whole configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct GarmentConfiguration {
    pub garment_type: GarmentType,
    pub base_color: Color,
    pub model_reference: &'static str,
    /// Texture UV offset applied on the mesh, independent of composites.
    pub offset_x: f32,
    pub offset_y: f32,
    pub scale_multiplier: f32,
}

impl GarmentConfiguration {
    /// Static registry: one configuration per garment type.
    pub fn of(garment_type: GarmentType) -> Self {
        let (model_reference, offset_x, offset_y, scale_multiplier) = match garment_type {
            GarmentType::TShirt => ("models/tshirt.glb", 0.0, 0.0, 1.0),
            GarmentType::Hoodie => ("models/hoodie.glb", 0.0, -0.08, 0.92),
            GarmentType::LongSleeve => ("models/longsleeve.glb", 0.0, -0.03, 0.97),
            GarmentType::Tank => ("models/tank.glb", 0.0, 0.05, 1.05),
        };
        Self {
            garment_type,
            base_color: Color::WHITE,
            model_reference,
            offset_x,
            offset_y,
            scale_multiplier,
        }
    }

    pub fn with_color(mut self, base_color: Color) -> Self {
        self.base_color = base_color;
        self
    }

    /// 2D background template shown behind the canvas for a face.
    pub fn template_image(&self, face: Face) -> String {
        let dir = match self.garment_type {
            GarmentType::TShirt => "tshirt",
            GarmentType::Hoodie => "hoodie",
            GarmentType::LongSleeve => "longsleeve",
            GarmentType::Tank => "tank",
        };
        format!("garments/{dir}/{}.png", face.name())
    }
}

/// Tunable constants of the pipeline. The defaults reproduce the original
/// product behavior; nothing reads these through a global.
#[derive(Clone, Copy, Debug)]
pub struct StudioTuning {
    /// Square working resolution of every composite, independent of display size.
    pub working_resolution: u32,
    /// Minimum gap between timer-driven composite triggers.
    pub composite_throttle: Duration,
    pub scale_min: f32,
    pub scale_max: f32,
    /// Scale delta per wheel tick.
    pub scale_step: f32,
    /// Degrees per discrete rotate action.
    pub rotate_step: f32,
}

impl Default for StudioTuning {
    fn default() -> Self {
        Self {
            working_resolution: 2048,
            composite_throttle: Duration::from_millis(150),
            scale_min: 0.1,
            scale_max: 5.0,
            scale_step: 0.1,
            rotate_step: 15.0,
        }
    }
}

/// Context injected by the host page. Consumed by the access gate and the
/// load trigger; never stored globally.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    pub design_id: Option<String>,
    pub view_only: bool,
    pub identity: Option<String>,
}

/// Reference to an image resource, classified by scheme.
///
/// `session:` handles (and the `blob:`/`data:` schemes of the original web
/// tooling) are transient: valid only inside the running session, never
/// allowed into a materialized archive and dropped on the way back in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRef(String);

impl ResourceRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn session(handle: u64) -> Self {
        Self(format!("session:{handle}"))
    }

    pub fn embedded(face: Face, index: usize) -> Self {
        Self(format!("images/{}-{index}.png", face.name()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_transient(&self) -> bool {
        self.0.starts_with("session:")
            || self.0.starts_with("blob:")
            || self.0.starts_with("data:")
    }

    pub fn is_embedded(&self) -> bool {
        self.0.starts_with("images/")
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    pub fn session_handle(&self) -> Option<u64> {
        self.0.strip_prefix("session:")?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_hex_round_trip() {
        let c = Color::rgb(0x1a, 0x2b, 0x3c);
        assert_eq!(c.to_hex(), "#1a2b3c");
        assert_eq!(Color::from_hex("#1a2b3c"), Some(c));
        let t = Color::rgba(9, 8, 7, 128);
        assert_eq!(Color::from_hex(&t.to_hex()), Some(t));
        assert_eq!(Color::from_hex("red"), None);
    }

    #[test]
    fn reference_schemes() {
        assert!(ResourceRef::session(3).is_transient());
        assert!(ResourceRef::new("blob:abc").is_transient());
        assert!(!ResourceRef::new("https://cdn.example/a.png").is_transient());
        assert!(ResourceRef::new("https://cdn.example/a.png").is_remote());
        assert!(ResourceRef::embedded(Face::Front, 2).is_embedded());
        assert_eq!(ResourceRef::session(7).session_handle(), Some(7));
    }

    #[test]
    fn registry_is_total() {
        for ty in [
            GarmentType::TShirt,
            GarmentType::Hoodie,
            GarmentType::LongSleeve,
            GarmentType::Tank,
        ] {
            let cfg = GarmentConfiguration::of(ty);
            assert_eq!(cfg.garment_type, ty);
            assert!(cfg.scale_multiplier > 0.0);
            assert!(cfg.template_image(Face::Front).ends_with("front.png"));
        }
    }
}
