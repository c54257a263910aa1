// Alignment, scaling, ensembling and forecast derivation
pub mod ml;

// Model cache, inference gate and the request path
pub mod serving;
