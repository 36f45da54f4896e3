mod adam;
mod clip;
mod gradient_descent;
mod optimizer;
mod schedule;

pub use adam::{Adam, AdamW};
pub use clip::{ClipNorm, GradClip, norm};
pub use gradient_descent::GradientDescent;
pub use optimizer::Optimizer;
pub use schedule::{LrSchedule, LrScheduler};
