//! GeoJSON surface.
//!
//! Applies render commands to an in-memory scene and exports it as a
//! FeatureCollection: the route as a LineString, each waypoint as a Point and
//! the vehicle as a Point with its heading once it has moved. Styling uses simplestyle property names so the
//! document can be dropped onto common web map viewers as-is.

use std::collections::BTreeMap;

use foundation::math::initial_bearing_deg;
use foundation::{GeoBounds, LatLon, Position, Waypoint};
use serde_json::{Map, Value};

use crate::layer::LayerId;
use crate::renderer::{DisplayStatus, FeedStatus};
use crate::surface::{MapSurface, RenderCommand};
use crate::symbology::LayerStyle;

#[derive(Debug, Default)]
pub struct GeoJsonSurface {
    route: Option<Vec<LatLon>>,
    waypoints: Vec<Waypoint>,
    vehicle: Option<Position>,
    heading_deg: Option<f64>,
    view: Option<GeoBounds>,
    status: Option<DisplayStatus>,
    styles: BTreeMap<LayerId, LayerStyle>,
    applied: u64,
}

impl GeoJsonSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_style(mut self, layer: LayerId, style: LayerStyle) -> Self {
        self.styles.insert(layer, style);
        self
    }

    fn style(&self, layer: LayerId) -> LayerStyle {
        self.styles
            .get(&layer)
            .cloned()
            .unwrap_or_else(|| LayerStyle::for_layer(layer))
    }

    /// Number of commands applied so far.
    pub fn commands_applied(&self) -> u64 {
        self.applied
    }

    pub fn view(&self) -> Option<GeoBounds> {
        self.view
    }

    pub fn to_geojson_value(&self) -> Value {
        let mut features: Vec<Value> = Vec::new();

        let route_style = self.style(LayerId::ROUTE);
        if let (Some(points), true) = (&self.route, route_style.visible) {
            let mut props = layer_properties(LayerId::ROUTE);
            props.insert("stroke".to_string(), Value::from(route_style.color));
            props.insert(
                "stroke-width".to_string(),
                Value::from(f64::from(route_style.width)),
            );
            features.push(feature(
                geometry("LineString", Value::Array(points.iter().map(|p| coords(*p)).collect())),
                props,
            ));
        }

        let waypoint_style = self.style(LayerId::WAYPOINTS);
        if waypoint_style.visible {
            for (index, wp) in self.waypoints.iter().enumerate() {
                let mut props = layer_properties(LayerId::WAYPOINTS);
                props.insert("index".to_string(), Value::from(index));
                if let Some(label) = wp.label() {
                    props.insert("label".to_string(), Value::from(label));
                }
                props.insert("marker-color".to_string(), Value::from(waypoint_style.color));
                features.push(feature(geometry("Point", coords(wp.coord())), props));
            }
        }

        let vehicle_style = self.style(LayerId::VEHICLE);
        if let (Some(pos), true) = (&self.vehicle, vehicle_style.visible) {
            let stale = self
                .status
                .as_ref()
                .is_some_and(|s| matches!(s.feed, FeedStatus::Stale { .. }));
            let mut props = layer_properties(LayerId::VEHICLE);
            props.insert(
                "observed_at".to_string(),
                Value::from(pos.observed_at().to_rfc3339()),
            );
            if let Some(acc) = pos.accuracy_m() {
                props.insert("accuracy_m".to_string(), Value::from(acc));
            }
            if let Some(heading) = self.heading_deg {
                props.insert("heading_deg".to_string(), Value::from(heading));
            }
            props.insert("stale".to_string(), Value::Bool(stale));
            let color = if stale {
                LayerStyle::STALE_COLOR
            } else {
                vehicle_style.color
            };
            props.insert("marker-color".to_string(), Value::from(color));
            features.push(feature(geometry("Point", coords(pos.coord())), props));
        }

        let mut root = Map::new();
        root.insert(
            "type".to_string(),
            Value::String("FeatureCollection".to_string()),
        );
        if let Some(b) = self.view {
            root.insert(
                "bbox".to_string(),
                Value::Array(vec![
                    Value::from(b.west),
                    Value::from(b.south),
                    Value::from(b.east),
                    Value::from(b.north),
                ]),
            );
        }
        if let Some(status) = &self.status {
            if let Ok(v) = serde_json::to_value(status) {
                root.insert("status".to_string(), v);
            }
        }
        root.insert("features".to_string(), Value::Array(features));
        Value::Object(root)
    }

    pub fn to_geojson_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_geojson_value())
    }
}

impl MapSurface for GeoJsonSurface {
    fn submit(&mut self, command: RenderCommand) {
        self.applied += 1;
        match command {
            RenderCommand::DrawRoute { points, .. } => self.route = Some(points),
            RenderCommand::ClearRoute { .. } => self.route = None,
            RenderCommand::PlaceMarker { position, .. } => {
                self.heading_deg = None;
                self.vehicle = Some(position);
            }
            RenderCommand::MoveMarker { position, .. } => {
                if let Some(prev) = &self.vehicle {
                    if prev.coord() != position.coord() {
                        self.heading_deg =
                            Some(initial_bearing_deg(prev.coord(), position.coord()));
                    }
                }
                self.vehicle = Some(position);
            }
            RenderCommand::DrawWaypoints { waypoints, .. } => self.waypoints = waypoints,
            RenderCommand::FitBounds { bounds } => self.view = Some(bounds),
            RenderCommand::SetStatus { status } => self.status = Some(status),
        }
    }
}

fn layer_properties(layer: LayerId) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("layer".to_string(), Value::from(layer.name()));
    props
}

fn coords(p: LatLon) -> Value {
    Value::Array(vec![Value::from(p.lon), Value::from(p.lat)])
}

fn geometry(kind: &str, coordinates: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("type".to_string(), Value::String(kind.to_string()));
    obj.insert("coordinates".to_string(), coordinates);
    Value::Object(obj)
}

fn feature(geometry: Value, properties: Map<String, Value>) -> Value {
    let mut obj = Map::new();
    obj.insert("type".to_string(), Value::String("Feature".to_string()));
    obj.insert("properties".to_string(), Value::Object(properties));
    obj.insert("geometry".to_string(), geometry);
    Value::Object(obj)
}
