pub mod retention;
pub mod routes;
pub mod store;
