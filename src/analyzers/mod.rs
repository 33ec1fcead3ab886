//! Alert classification and service status aggregation.
//!
//! [`severity`] assigns each decoded alert a tier; [`status`] folds the
//! classified alerts into a per-route view for the query facade.

pub mod severity;
pub mod status;
pub mod types;
