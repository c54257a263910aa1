// Forecast horizons and feature tables
pub mod features;
pub mod horizon;

// Model inputs
pub mod ml;

// Forecast output
pub mod prediction;

// Port interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
