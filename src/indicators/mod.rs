//! Indicator computation: formula registry, bottom-up aggregation, threshold
//! classification and cross-entity/time comparison.

pub mod aggregate;
pub mod classify;
pub mod compare;
pub mod formula;
pub mod registry;
pub mod types;
pub mod utility;
