mod conv;
mod dense;
mod dropout;
mod layer_norm;
mod relu;
mod softplus;

pub use conv::CausalConv1d;
pub use dense::Dense;
pub use dropout::Dropout;
pub use layer_norm::LayerNorm;
pub use relu::Relu;
pub use softplus::Softplus;
