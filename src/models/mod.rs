pub mod drone;
pub mod handoff;
pub mod order;
