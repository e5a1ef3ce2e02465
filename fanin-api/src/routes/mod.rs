//! HTTP Routes Module
//!
//! - GraphQL endpoint and playground
//! - Health check endpoints (Kubernetes-compatible)

pub mod graphql;
pub mod health;

pub use graphql::{create_schema, graphiql_handler, graphql_handler, FaninSchema};
pub use health::{liveness, ping, readiness};
