pub mod config;
pub mod engine;
pub mod gateway;
pub mod index;
pub mod limits;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod observability;
