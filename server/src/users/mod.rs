pub mod password;
pub mod routes;
pub mod store;
