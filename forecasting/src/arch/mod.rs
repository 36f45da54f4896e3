pub mod blocks;
pub mod init;
pub mod layers;
pub mod loss;
mod model;
mod params;
mod tcn;

pub use model::{Model, NbOutput};
pub use params::{BackIter, FrontIter, ParamBuffer, ParamInfo, ParamShape};
pub use tcn::{TcnConfig, TemporalConvNet, doubling_dilations};
