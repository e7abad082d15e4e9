use foundation::{GeoBounds, LatLon, Position, Waypoint};
use serde::Serialize;
use streaming::RouteKey;

use crate::layer::LayerId;
use crate::renderer::DisplayStatus;

/// One drawing instruction for a mapping collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RenderCommand {
    DrawRoute {
        layer: LayerId,
        key: RouteKey,
        points: Vec<LatLon>,
    },
    ClearRoute {
        layer: LayerId,
    },
    /// Create the marker. Sent once per marker.
    PlaceMarker {
        layer: LayerId,
        position: Position,
    },
    MoveMarker {
        layer: LayerId,
        position: Position,
    },
    DrawWaypoints {
        layer: LayerId,
        waypoints: Vec<Waypoint>,
    },
    FitBounds {
        bounds: GeoBounds,
    },
    SetStatus {
        status: DisplayStatus,
    },
}

/// Something the renderer can draw onto.
pub trait MapSurface: Send {
    fn submit(&mut self, command: RenderCommand);
}

/// Keeps every submitted command in order.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    commands: Vec<RenderCommand>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    pub fn take(&mut self) -> Vec<RenderCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn count(&self, pred: impl Fn(&RenderCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }
}

impl MapSurface for RecordingSurface {
    fn submit(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }
}
