pub mod data;
pub mod identity;
pub mod queue;
