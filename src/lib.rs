pub mod arrival;
pub mod catalog;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod overstay;
pub mod predictor;
pub mod sql;
pub mod wire;
