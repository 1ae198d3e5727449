// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// API group served by the operator's custom resources
pub const API_GROUP: &str = "ibmcloud.ibm.com";

/// API version served by the operator's custom resources
pub const API_VERSION: &str = "v1";

/// Annotation keys read from Service and Binding records
pub mod annotations {
    /// When set to "enabled", a Service is recreated if its remote instance disappears
    pub const SELF_HEALING: &str = "ibmcloud.ibm.com/self-healing";
    /// Disambiguates an alias Service between same-named remote instances
    pub const INSTANCE_ID: &str = "ibmcloud.ibm.com/instanceId";
    /// Identifies an alias credential by its provider key ID
    pub const KEY_ID: &str = "ibmcloud.ibm.com/keyId";

    /// Value of [`SELF_HEALING`] that turns the behaviour on
    pub const ENABLED: &str = "enabled";
}

/// Annotation keys written onto credential secrets
pub mod secret_annotations {
    pub const INSTANCE_ID: &str = "service-instance-id";
    pub const KEY_ID: &str = "service-key-id";
    pub const SERVICE_NAME: &str = "service-name";
}

/// Finalizer names blocking deletion until remote cleanup is done
pub mod finalizers {
    pub const SERVICE: &str = "service.ibmcloud.ibm.com";
    pub const BINDING: &str = "binding.ibmcloud.ibm.com";
}

/// Plan name that adopts a pre-existing remote instance instead of creating one
pub const ALIAS_PLAN: &str = "alias";

/// Service class type selecting the legacy marketplace provider
pub const LEGACY_CLASS_TYPE: &str = "CF";

/// Role preferred for new credentials when none is requested
pub const DEFAULT_ROLE: &str = "Manager";

/// Placeholder returned by the provider instead of real credential data
pub const REDACTED: &str = "REDACTED";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
