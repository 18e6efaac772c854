pub mod alert;
pub mod cloud_account;
pub mod cost_datum;
pub mod recommendation;
pub mod resource;
pub mod user;
