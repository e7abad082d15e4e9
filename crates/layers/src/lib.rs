pub mod geojson;
pub mod layer;
pub mod renderer;
pub mod surface;
pub mod symbology;

pub use geojson::*;
pub use layer::*;
pub use renderer::*;
pub use surface::*;
pub use symbology::*;
