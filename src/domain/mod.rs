pub mod intervals;
pub mod models;
pub mod naming;
