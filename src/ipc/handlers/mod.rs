pub mod accounts;
pub mod aggregates;
pub mod backup;
pub mod copies;
pub mod core;
pub mod evaluations;
pub mod exports;
pub mod groups;
pub mod results;
