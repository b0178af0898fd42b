pub mod cards;
pub mod models;
