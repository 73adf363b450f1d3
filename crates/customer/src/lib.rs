pub mod client;

pub use client::{Customer, CustomerClient, CustomerClientError, CustomerLookup};
