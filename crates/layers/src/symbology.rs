use crate::layer::LayerId;

#[derive(Debug, Clone, PartialEq)]
pub struct LayerStyle {
    pub visible: bool,
    /// CSS hex color.
    pub color: &'static str,
    /// Line width in pixels; ignored for markers.
    pub width: f32,
}

impl LayerStyle {
    pub const fn new(visible: bool, color: &'static str, width: f32) -> Self {
        Self {
            visible,
            color,
            width,
        }
    }

    pub fn for_layer(layer: LayerId) -> Self {
        match layer {
            LayerId::ROUTE => Self::new(true, "#1f6feb", 4.0),
            LayerId::WAYPOINTS => Self::new(true, "#6e7781", 0.0),
            LayerId::VEHICLE => Self::new(true, "#d1242f", 0.0),
            _ => Self::default(),
        }
    }

    /// Marker color used while the feed is stale.
    pub const STALE_COLOR: &'static str = "#8c959f";
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            visible: true,
            color: "#ffffff",
            width: 1.0,
        }
    }
}
