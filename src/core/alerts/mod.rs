// Alert decisions.
//
// Architecture:
// - model.rs: Alert records and explanation factors
// - gate.rs: Threshold and cooldown decision gate

pub mod gate;
pub mod model;
