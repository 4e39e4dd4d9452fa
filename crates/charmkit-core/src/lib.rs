//! charmkit-core
//!
//! Core primitives for charmkit:
//! - Charm identity model: `CharmUrl` (fully-qualified) and `CharmRef`
//!   (possibly series-less), with canonical string rendering
//! - Bundle topology model (`BundleData`) and its consistency verifier
//! - Charm metadata reading for extracted directories and `.charm` archives
//!
//! This crate performs no network I/O. Filesystem access is limited to
//! reading charms and bundles from extracted directories or archives on
//! behalf of the repository backends in `charmkit-repo`.

pub mod bundle;
pub mod charm;
pub mod url;

pub use crate::bundle::{
    read_bundle_archive, read_bundle_data, read_bundle_dir, Bundle, BundleData, BundleError,
    MachineSpec, ServiceSpec, UnitPlacement, VerificationError,
};
pub use crate::charm::{Charm, CharmError, CharmMeta, ARCHIVE_SUFFIX};
pub use crate::url::{quote, CharmRef, CharmUrl, IdentityError, Schema};
