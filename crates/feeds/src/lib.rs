pub mod feed;
pub mod findmy;
pub mod history;
pub mod http;
pub mod replay;
pub mod source;

pub use feed::*;
pub use findmy::*;
pub use history::*;
pub use http::*;
pub use replay::*;
pub use source::*;
