pub mod anomaly;
pub mod approval;
pub mod expense;
pub mod policy;
pub mod user;
