mod head;
mod residual;

pub use head::PositiveHead;
pub use residual::ResidualBlock;
