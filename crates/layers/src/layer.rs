use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LayerId(pub u64);

impl LayerId {
    pub const ROUTE: LayerId = LayerId(1);
    pub const WAYPOINTS: LayerId = LayerId(2);
    pub const VEHICLE: LayerId = LayerId(3);

    pub fn name(self) -> &'static str {
        match self {
            LayerId::ROUTE => "route",
            LayerId::WAYPOINTS => "waypoint",
            LayerId::VEHICLE => "vehicle",
            _ => "custom",
        }
    }
}
