pub mod candidates;
pub mod classify;
pub mod conflict;
pub mod errors;
pub mod expand;
pub mod locks;
pub mod memory;
pub mod resolver;
pub mod response;
pub mod store;
pub mod types;

pub use errors::ResolveError;
pub use resolver::Resolver;
pub use store::{ContactStore, ContactTx};
pub use types::{
    ConsolidatedIdentity, Contact, ContactId, LinkPrecedence, Observation, Outcome, Resolution,
};
