pub mod config;
pub mod extract;
pub mod fetch;
pub mod http_client;
pub mod model;
pub mod page_schema;
pub mod pipeline;
pub mod statement;
pub mod store;
