//! Built-in protocol handlers.
//!
//! - [`core`]: session negotiation (protocol 0), client and server roles.
//! - [`discovery_query`]: resource queries (protocol 13), customer and store
//!   roles.

pub mod core;
pub mod discovery_query;

pub use self::core::{CoreClientHandler, CoreServerHandler};
pub use self::discovery_query::{
    DiscoveryQueryCustomerHandler, DiscoveryQueryStoreHandler, ResourceProvider,
};
