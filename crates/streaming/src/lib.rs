pub mod cache;
pub mod osrm;
pub mod residency;
pub mod route;
pub mod routing;

pub use cache::*;
pub use osrm::*;
pub use residency::*;
pub use route::*;
pub use routing::*;
