//! fleet-provision — async wrapper over the external provisioning API.
//!
//! The [`Provisioner`] trait covers the five operations the controller
//! depends on: create, start, stop, delete and status. Every call is
//! non-throwing: network errors, non-success HTTP codes and the explicit
//! unauthorized condition all surface as a `bool`/`Option`/[`StatusQuery`]
//! failure result plus a logged cause, never as a propagated error that
//! could abort a reconciliation tick. Status queries keep "the provider
//! does not know this server" apart from "the query went unanswered" —
//! only the former licenses destructive cleanup.
//!
//! [`HttpProvisioner`] is the HTTP+bearer implementation; tests and the
//! controller's test suite substitute their own mocks.

pub mod api;
pub mod client;

pub use api::{CreatedServer, PowerSignal, PowerState, ServerStatus, StatusQuery};
pub use client::{HttpProvisioner, Provisioner};
