// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, record writes, credential secrets and parameters.

pub mod crd;
pub mod params;
pub mod records;
pub mod secrets;

pub use crd::wait_for_crds;
pub use params::{param_to_json, resolve_params};
pub use records::{add_finalizer, has_finalizer, is_deleting, remove_finalizer, replace, write_status};
pub use secrets::{delete_secret, flatten_credentials, sync_credentials_secret, SecretSync};
