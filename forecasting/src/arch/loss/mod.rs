mod loss_fn;
mod nb_nll;

pub use loss_fn::LossFn;
pub use nb_nll::{NegBinomialNll, nll, nll_grad};
