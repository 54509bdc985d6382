//! Provider API interaction module
//!
//! Core functionality for talking to the cloud provider's control-plane
//! APIs: authentication, the HTTP client and paginated listing.
//!
//! # Module Structure
//!
//! - [`auth`] - OAuth2 client-credentials tokens, cached per scope
//! - [`client`] - Main provider client and sequential [`client::Pager`]
//! - [`http`] - HTTP utilities and status classification
//!
//! # Example
//!
//! ```ignore
//! use cloudgraph::provider::client::{Api, ProviderClient};
//!
//! async fn example(client: &ProviderClient) -> cloudgraph::error::Result<()> {
//!     let url = client.subscription_url("sub-id", "/resourcegroups", "2021-04-01");
//!     let mut pager = client.pager(Api::Management, url);
//!     while let Some(page) = pager.next_page().await? {
//!         println!("{} resource groups", page.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;

pub use client::{Api, Pager, ProviderClient};
