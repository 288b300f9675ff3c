pub mod flatten;
pub mod resilience;
pub mod state;
