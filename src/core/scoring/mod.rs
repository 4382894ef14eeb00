//! Risk scoring. Produces the `(probability, top factors)` pair the alert
//! pipeline consumes.

pub mod model;
