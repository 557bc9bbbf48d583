//! Identity binding: the provider-facing authorization-code client and the
//! reconciliation of remote profiles onto local user accounts.
//!
//! ## Flow
//!
//! 1. [`IdentityProviderClient::begin_login`] builds the provider authorize URL
//! 2. the provider redirects back with a code
//! 3. [`IdentityProviderClient::complete_login`] exchanges it and fetches the profile
//! 4. [`Reconciler::reconcile`] matches or creates the local account

mod http;
pub mod provider;
pub mod reconcile;

pub use provider::{IdentityProviderClient, RemoteProfile};
pub use reconcile::{Reconciled, ReconcileOutcome, Reconciler};
