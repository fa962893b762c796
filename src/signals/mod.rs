//! Signal-side pure logic: recency decay weighting and deterministic
//! magnitude staircases. No database access here.

pub mod decay;
pub mod magnitude;
