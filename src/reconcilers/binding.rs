// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Binding reconciler - issues credentials for a Service and keeps their Secret in sync.

use crate::config::Config;
use crate::constants::{finalizers, DEFAULT_ROLE};
use crate::error::{OperatorError, Result};
use crate::kubernetes::{
    add_finalizer, delete_secret, has_finalizer, is_deleting, remove_finalizer, replace, resolve_params,
    sync_credentials_secret, write_status, SecretSync,
};
use crate::provider::{
    KeyRequest, ProviderError, ProviderSession, RemoteKey, RemoteResourceClient, Role, SessionResolver,
};
use crate::reconcilers::{persist_status, record_failure};
use crate::types::{Binding, BindingStatus, LifecycleStatus, Phase, RemoteRef, Service};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    runtime::{controller, controller::Action, watcher, Controller},
    Api, Client, Resource, ResourceExt,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub struct BindingReconciler {
    client: Client,
    config: Arc<Config>,
    sessions: Arc<dyn SessionResolver>,
}

impl BindingReconciler {
    pub fn new(client: Client, config: Arc<Config>, sessions: Arc<dyn SessionResolver>) -> Self {
        Self {
            client,
            config,
            sessions,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let bindings: Api<Binding> = Api::all(self.client.clone());
        let secrets: Api<Secret> = Api::all(self.client.clone());
        let concurrency = self.config.max_concurrent_reconciles;
        let context = Arc::new(self);

        Controller::new(bindings, watcher::Config::default())
            .owns(secrets, watcher::Config::default())
            .with_config(controller::Config::default().concurrency(concurrency))
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled binding: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

/// Choose the IAM role a new credential is issued with.
///
/// A requested role must exist (matched case-insensitively). Without a request
/// the Manager role is preferred, then whatever the service lists first.
/// Services without IAM roles get no role at all.
pub fn select_role(roles: &[Role], requested: Option<&str>) -> Result<Option<Role>> {
    if roles.is_empty() {
        return Ok(None);
    }

    if let Some(requested) = requested.filter(|r| !r.is_empty()) {
        return roles
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(requested))
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                let available: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
                OperatorError::InvalidSpec(format!(
                    "role {} is not available, pick one of {}",
                    requested,
                    available.join(", ")
                ))
            });
    }

    Ok(roles
        .iter()
        .find(|r| r.name == DEFAULT_ROLE)
        .or_else(|| roles.first())
        .cloned())
}

/// Look up the pre-existing credential an alias Binding points at
#[instrument(skip(client, binding))]
async fn alias_key(
    client: &dyn RemoteResourceClient,
    binding: &Binding,
    instance_id: &str,
    alias: &str,
) -> Result<RemoteKey> {
    let key = match binding.pinned_key_id() {
        Some(id) => {
            let key = client.get_key(id).await?;
            if key.name != alias {
                return Err(OperatorError::InvalidSpec(format!(
                    "credential {} is named {}, not {}",
                    id, key.name, alias
                )));
            }
            key
        }
        None => {
            let mut keys = client.find_keys_by_name(instance_id, alias).await?;
            match keys.len() {
                0 => return Err(ProviderError::NotFound(format!("no credential named {}", alias)).into()),
                1 => keys.remove(0),
                n => {
                    return Err(OperatorError::InvalidSpec(format!(
                        "{} credentials are named {}, set the ibmcloud.ibm.com/keyId annotation to pick one",
                        n, alias
                    )))
                }
            }
        }
    };
    Ok(key.revealed()?)
}

/// State carried through a single reconcile pass
struct BindingPass<'a> {
    ctx: &'a BindingReconciler,
    api: Api<Binding>,
    binding: Binding,
    persisted: BindingStatus,
    status: BindingStatus,
}

impl BindingPass<'_> {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace(), self.binding.name_any())
    }

    fn namespace(&self) -> String {
        self.binding.namespace().unwrap_or_default()
    }

    async fn persist(&mut self) -> Result<bool> {
        persist_status(&self.api, &mut self.binding, &mut self.persisted, &self.status).await
    }

    async fn fail(mut self, err: OperatorError) -> Result<Action> {
        let config = self.ctx.config.clone();
        record_failure(
            &self.api,
            &mut self.binding,
            &mut self.persisted,
            &mut self.status,
            err,
            &config,
        )
        .await
    }

    /// Persist and come back after `after`, or wait for the write that beat us
    async fn settle(mut self, after: std::time::Duration) -> Result<Action> {
        if self.persist().await? {
            Ok(Action::requeue(after))
        } else {
            Ok(Action::await_change())
        }
    }

    async fn release(self) -> Result<Action> {
        remove_finalizer(&self.api, &self.binding, finalizers::BINDING).await?;
        Ok(Action::await_change())
    }

    async fn delete_secret(&self) -> Result<()> {
        delete_secret(&self.ctx.client, &self.namespace(), &self.binding.secret_name()).await
    }

    /// Delete an owned credential remotely, treating "already gone" as done
    async fn delete_owned_key(&self, session: &ProviderSession) -> Result<()> {
        if self.binding.is_alias() {
            return Ok(());
        }
        let Some(key_id) = self.status.key_instance_id.id() else {
            return Ok(());
        };
        match session.client.delete_key(key_id).await {
            Ok(()) => {
                info!("Deleted credential {} of binding {}", key_id, self.key());
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Credential {} already gone", key_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(self, session: &ProviderSession) -> Result<Action> {
        info!("Deleting binding {}", self.key());
        if let Err(e) = self.delete_owned_key(session).await {
            return self.fail(e).await;
        }
        if let Err(e) = self.delete_secret().await {
            return self.fail(e).await;
        }
        self.release().await
    }

    /// Issue (or look up) a credential and materialize it
    async fn provision(&mut self, parent: &Service, session: &ProviderSession, instance_id: &str) -> Result<bool> {
        let namespace = self.namespace();
        let parameters = resolve_params(&self.ctx.client, &namespace, &self.binding.spec.parameters).await?;
        let role = match self.binding.alias() {
            Some(_) => None,
            None => {
                let roles = session.client.list_roles(&parent.spec.service_class).await?;
                select_role(&roles, self.binding.spec.role.as_deref())?
            }
        };

        self.status.key_instance_id = RemoteRef::InProgress;
        self.status.set_state(Phase::Pending, "Creating credentials");
        if !self.persist().await? {
            return Ok(false);
        }

        let key = match self.binding.alias().map(str::to_string) {
            Some(alias) => match alias_key(session.client.as_ref(), &self.binding, instance_id, &alias).await {
                Ok(key) => key,
                Err(e) => {
                    if e.is_not_found() {
                        self.status.key_instance_id = RemoteRef::Unset;
                    }
                    return Err(e);
                }
            },
            None => {
                let request = KeyRequest {
                    instance_id: instance_id.to_string(),
                    name: self.binding.name_any(),
                    role,
                    parameters,
                };
                let key = session.client.create_key(&request).await?;
                info!("Created credential {} for binding {}", key.id, self.key());
                key
            }
        };

        self.materialize(instance_id, &key).await?;
        Ok(true)
    }

    /// Point the status at `key` and bring the Secret in line with it
    async fn materialize(&mut self, instance_id: &str, key: &RemoteKey) -> Result<()> {
        self.status.key_instance_id = RemoteRef::Bound(key.id.clone());
        match sync_credentials_secret(&self.ctx.client, &self.binding, instance_id, key).await? {
            SecretSync::Created => info!("Secret for binding {} created", self.key()),
            SecretSync::Recreated => info!("Secret for binding {} recreated after drift", self.key()),
            SecretSync::InSync => debug!("Secret for binding {} in sync", self.key()),
        }
        self.status.set_state(Phase::Online, "Online");
        Ok(())
    }

    /// Re-fetch the recorded credential
    async fn fetch(&self, session: &ProviderSession, instance_id: &str) -> Result<RemoteKey> {
        if let Some(alias) = self.binding.alias() {
            return alias_key(session.client.as_ref(), &self.binding, instance_id, alias).await;
        }
        let key = match &self.status.key_instance_id {
            RemoteRef::Bound(id) => session.client.get_key(id).await?,
            _ => {
                let name = self.binding.name_any();
                session
                    .client
                    .find_keys_by_name(instance_id, &name)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProviderError::NotFound(format!("no credential named {}", name)))?
            }
        };
        Ok(key.revealed()?)
    }
}

fn waiting(status: &mut BindingStatus, service: &str) {
    status.set_state(Phase::Pending, format!("Waiting for service {} to be online", service));
}

pub async fn reconcile(binding: Arc<Binding>, ctx: Arc<BindingReconciler>) -> Result<Action> {
    let namespace = binding.namespace().unwrap_or_default();
    let name = binding.name_any();
    let api: Api<Binding> = Api::namespaced(ctx.client.clone(), &namespace);

    let Some(mut binding) = api.get_opt(&name).await? else {
        debug!("Binding {}/{} no longer exists", namespace, name);
        return Ok(Action::await_change());
    };

    let status = match binding.status.clone() {
        Some(status) => status,
        None => {
            info!("Initializing status of binding {}/{}", namespace, name);
            let status = BindingStatus::pending(&binding);
            match write_status(&api, &binding, &status).await? {
                Some(updated) => binding = updated,
                None => return Ok(Action::await_change()),
            }
            status
        }
    };

    if is_deleting(&binding) && !has_finalizer(&binding, finalizers::BINDING) {
        return Ok(Action::await_change());
    }

    let mut pass = BindingPass {
        ctx: &ctx,
        api,
        binding,
        persisted: status.clone(),
        status,
    };
    let deleting = is_deleting(&pass.binding);
    let service_name = pass.binding.spec.service_name.clone();
    let service_namespace = pass.binding.service_namespace();

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &service_namespace);
    let Some(parent) = services.get_opt(&service_name).await? else {
        if deleting {
            info!("Service {} of deleted binding {} is gone", service_name, pass.key());
            return pass.release().await;
        }
        if !pass.status.key_instance_id.is_unset() {
            info!(
                "Service {} of binding {} is gone, resetting credentials",
                service_name,
                pass.key()
            );
            pass.status.key_instance_id = RemoteRef::Unset;
            pass.status.instance_id = RemoteRef::Unset;
        }
        waiting(&mut pass.status, &service_name);
        return pass.settle(ctx.config.dependency_requeue).await;
    };

    if !deleting && service_namespace == pass.namespace() {
        if let Some(owner) = parent.owner_ref(&()) {
            let owned = pass
                .binding
                .owner_references()
                .iter()
                .any(|o| o.uid == owner.uid);
            if !owned {
                let mut updated = pass.binding.clone();
                updated.owner_references_mut().push(owner);
                match replace(&pass.api, &updated).await? {
                    Some(updated) => pass.binding = updated,
                    None => return Ok(Action::await_change()),
                }
            }
        }
    }

    let Some(instance_id) = parent.instance_id().map(str::to_string) else {
        if deleting {
            info!(
                "Binding {} is deleted before service {} went online",
                pass.key(),
                service_name
            );
            if let Err(e) = pass.delete_secret().await {
                return pass.fail(e).await;
            }
            return pass.release().await;
        }
        waiting(&mut pass.status, &service_name);
        return pass.settle(ctx.config.dependency_requeue).await;
    };

    let context = parent.status.as_ref().map(|s| s.context.clone());
    let session = match ctx
        .sessions
        .resolve(&service_namespace, parent.spec.class_type(), context.as_ref())
        .await
    {
        Ok(session) => session,
        Err(e) if e.is_not_found() && deleting => {
            info!(
                "No provider context for deleted binding {}, releasing it: {}",
                pass.key(),
                e
            );
            return pass.release().await;
        }
        Err(e) => return pass.fail(e).await,
    };

    if deleting {
        return pass.delete(&session).await;
    }

    if !has_finalizer(&pass.binding, finalizers::BINDING) {
        match add_finalizer(&pass.api, &pass.binding, finalizers::BINDING).await? {
            Some(updated) => pass.binding = updated,
            None => return Ok(Action::await_change()),
        }
    }

    if pass.status.instance_id.id() != Some(instance_id.as_str()) {
        if let Some(previous) = pass.status.instance_id.id().map(str::to_string) {
            info!(
                "Service {} of binding {} moved from instance {} to {}",
                service_name,
                pass.key(),
                previous,
                instance_id
            );
            if let Err(e) = pass.delete_owned_key(&session).await {
                return pass.fail(e).await;
            }
            if let Err(e) = pass.delete_secret().await {
                return pass.fail(e).await;
            }
            pass.status.key_instance_id = RemoteRef::Unset;
        }
        pass.status.instance_id = RemoteRef::Bound(instance_id.clone());
        if !pass.persist().await? {
            return Ok(Action::await_change());
        }
    }

    if pass.status.key_instance_id.is_unset() {
        return match pass.provision(&parent, &session, &instance_id).await {
            Ok(true) => pass.settle(ctx.config.sync_period).await,
            Ok(false) => Ok(Action::await_change()),
            Err(e) => pass.fail(e).await,
        };
    }

    match pass.fetch(&session, &instance_id).await {
        Ok(key) => {
            if let Err(e) = pass.materialize(&instance_id, &key).await {
                return pass.fail(e).await;
            }
            pass.settle(ctx.config.sync_period).await
        }
        Err(e) if e.is_not_found() && pass.binding.is_alias() => {
            warn!("Aliased credential of binding {} is gone: {}", pass.key(), e);
            if let Err(e) = pass.delete_secret().await {
                return pass.fail(e).await;
            }
            pass.status.key_instance_id = RemoteRef::Unset;
            pass.status.set_state(Phase::Pending, format!("Aliased credential is gone: {}", e));
            pass.settle(ctx.config.dependency_requeue).await
        }
        Err(e) if e.is_not_found() => {
            warn!("Credential of binding {} is gone, issuing a new one: {}", pass.key(), e);
            pass.status.key_instance_id = RemoteRef::Unset;
            match pass.provision(&parent, &session, &instance_id).await {
                Ok(true) => pass.settle(ctx.config.sync_period).await,
                Ok(false) => Ok(Action::await_change()),
                Err(e) => pass.fail(e).await,
            }
        }
        Err(e) => pass.fail(e).await,
    }
}

pub fn error_policy(binding: Arc<Binding>, error: &OperatorError, ctx: Arc<BindingReconciler>) -> Action {
    error!(
        "Reconciliation error for binding {}/{}: {}",
        binding.namespace().unwrap_or_default(),
        binding.name_any(),
        error
    );
    Action::requeue(ctx.config.retry_interval)
}
