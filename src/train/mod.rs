//! Training: cost-sensitive loss and the gold-window batch driver.

pub mod batch;
pub mod oracle_loss;

pub use batch::{init_gold_batch, update_batch, TrainExample, UpdateStats};
pub use oracle_loss::cost_sensitive_grad;
