//! Stage-to-stage plumbing shared by every stage of the traffic pipeline.

pub mod messenger;
pub mod stage;
