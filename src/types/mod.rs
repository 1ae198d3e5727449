// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resources reconciled by the operator.

pub mod binding;
pub mod common;
pub mod service;

pub use binding::{Binding, BindingSpec, BindingStatus};
pub use common::{KeyRef, LifecycleStatus, Param, ParamSource, Phase, RemoteRef, ResourceContext};
pub use service::{Service, ServiceClassType, ServiceSpec, ServiceStatus};
