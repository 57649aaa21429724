//! Boosted-tree cascade: model storage and sliding-window evaluation.
pub mod eval;
pub mod model;

pub use eval::{
    compute_cids, evaluate_window, evaluator_for, scan_bank, ChannelSample, ScanLayout, WindowHit,
};
pub use model::{Classifier, Model, ModelOptions, MAX_TREE_DEPTH};
