pub mod loss_stats;
pub mod sequence_tracker;
