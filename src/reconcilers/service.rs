// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Service reconciler - provisions, adopts and deletes remote service instances.

use crate::config::Config;
use crate::constants::finalizers;
use crate::error::{OperatorError, Result};
use crate::kubernetes::{
    add_finalizer, has_finalizer, is_deleting, remove_finalizer, replace, resolve_params, write_status,
};
use crate::provider::{InstanceRequest, ProviderError, ProviderSession, RemoteInstance, SessionResolver};
use crate::reconcilers::{persist_status, record_failure};
use crate::types::{LifecycleStatus, Phase, RemoteRef, Service, ServiceStatus};
use futures::StreamExt;
use kube::{
    runtime::{controller, controller::Action, watcher, Controller},
    Api, Client, ResourceExt,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub struct ServiceReconciler {
    client: Client,
    config: Arc<Config>,
    sessions: Arc<dyn SessionResolver>,
}

impl ServiceReconciler {
    pub fn new(client: Client, config: Arc<Config>, sessions: Arc<dyn SessionResolver>) -> Self {
        Self {
            client,
            config,
            sessions,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let services: Api<Service> = Api::all(self.client.clone());
        let concurrency = self.config.max_concurrent_reconciles;
        let context = Arc::new(self);

        Controller::new(services, watcher::Config::default())
            .with_config(controller::Config::default().concurrency(concurrency))
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled service: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

/// Pick the remote instance an alias Service adopts, or an interrupted
/// create resumes with.
///
/// A single match is adopted directly. Several same-named instances need the
/// instanceId annotation to pick one.
pub fn select_alias_instance(
    candidates: Vec<RemoteInstance>,
    pinned: Option<&str>,
    name: &str,
) -> Result<RemoteInstance> {
    if let Some(pinned) = pinned {
        return candidates
            .into_iter()
            .find(|i| i.id == pinned)
            .ok_or_else(|| ProviderError::NotFound(format!("instance {} named {}", pinned, name)).into());
    }

    let mut candidates = candidates;
    match candidates.len() {
        0 => Err(ProviderError::NotFound(format!("no instance named {}", name)).into()),
        1 => Ok(candidates.remove(0)),
        n => Err(OperatorError::InvalidSpec(format!(
            "{} instances are named {}, set the ibmcloud.ibm.com/instanceId annotation to pick one",
            n, name
        ))),
    }
}

enum Outcome {
    /// The pass produced a new status, possibly after creating `created`
    Updated { created: Option<String> },
    LostRace,
}

/// State carried through a single reconcile pass
struct ServicePass<'a> {
    ctx: &'a ServiceReconciler,
    api: Api<Service>,
    session: ProviderSession,
    service: Service,
    persisted: ServiceStatus,
    status: ServiceStatus,
}

impl ServicePass<'_> {
    fn key(&self) -> String {
        format!("{}/{}", self.service.namespace().unwrap_or_default(), self.service.name_any())
    }

    async fn persist(&mut self) -> Result<bool> {
        persist_status(&self.api, &mut self.service, &mut self.persisted, &self.status).await
    }

    async fn fail(mut self, err: OperatorError) -> Result<Action> {
        let config = self.ctx.config.clone();
        record_failure(
            &self.api,
            &mut self.service,
            &mut self.persisted,
            &mut self.status,
            err,
            &config,
        )
        .await
    }

    fn bind(&mut self, instance: &RemoteInstance) {
        self.status.instance_id = RemoteRef::Bound(instance.id.clone());
        let state = Phase::from_provider(&instance.state);
        let message = if state.is_online() {
            "Online".to_string()
        } else {
            instance.state.clone()
        };
        self.status.set_state(state, message);
        self.status.dashboard_url = instance.dashboard_url.clone();
        self.status.context = self.session.context.clone();
    }

    async fn parameters(&self) -> Result<Map<String, Value>> {
        let namespace = self.service.namespace().unwrap_or_default();
        resolve_params(&self.ctx.client, &namespace, &self.service.spec.parameters).await
    }

    #[instrument(skip(self), fields(service = %self.key()))]
    async fn adopt_alias(&mut self) -> Result<Outcome> {
        let name = self.service.external_name();
        let candidates = self
            .session
            .client
            .find_instances_by_name(&name, &self.service.spec.service_class)
            .await?;
        let instance = select_alias_instance(candidates, self.service.pinned_instance_id(), &name)?;

        info!("Service {} adopts existing instance {}", self.key(), instance.id);
        self.status.echo_spec(&self.service);
        self.bind(&instance);
        Ok(Outcome::Updated { created: None })
    }

    /// Resolve parameters, claim the slot with `InProgress`, then create
    async fn provision(&mut self) -> Result<Outcome> {
        let parameters = self.parameters().await?;

        self.status.echo_spec(&self.service);
        self.status.instance_id = RemoteRef::InProgress;
        self.status.set_state(Phase::Pending, "Provisioning remote instance");
        if !self.persist().await? {
            return Ok(Outcome::LostRace);
        }

        self.create(parameters).await
    }

    #[instrument(skip(self, parameters), fields(service = %self.key()))]
    async fn create(&mut self, parameters: Map<String, Value>) -> Result<Outcome> {
        let request = InstanceRequest {
            name: self.service.external_name(),
            service_class: self.service.spec.service_class.clone(),
            plan: self.service.spec.plan.clone(),
            context: self.session.context.clone(),
            parameters,
            tags: self.service.spec.tags.clone(),
        };
        let instance = self.session.client.create_instance(&request).await?;

        info!("Created instance {} for service {}", instance.id, self.key());
        self.bind(&instance);
        Ok(Outcome::Updated {
            created: Some(instance.id),
        })
    }

    /// Pick up after a create that may or may not have reached the provider
    async fn resume(&mut self) -> Result<Outcome> {
        let name = self.service.external_name();
        let found = self
            .session
            .client
            .find_instances_by_name(&name, &self.service.spec.service_class)
            .await?;

        if found.is_empty() {
            let parameters = self.parameters().await?;
            return self.create(parameters).await;
        }

        let instance = select_alias_instance(found, self.service.pinned_instance_id(), &name)?;
        info!("Service {} resumes with instance {}", self.key(), instance.id);
        self.bind(&instance);
        Ok(Outcome::Updated { created: None })
    }

    async fn verify(&mut self, id: &str) -> Result<Outcome> {
        match self.session.client.get_instance(id).await {
            Ok(instance) => {
                self.bind(&instance);
                Ok(Outcome::Updated { created: None })
            }
            Err(e) if e.is_not_found() && self.service.self_healing() => {
                warn!("Instance {} of service {} is gone, recreating it", id, self.key());
                self.status.instance_id = RemoteRef::Unset;
                self.provision().await
            }
            Err(e) if e.is_not_found() => {
                warn!("Instance {} of service {} is gone", id, self.key());
                self.status.set_state(
                    Phase::Failed,
                    format!(
                        "Remote instance {} no longer exists; delete and recreate the Service or enable self-healing",
                        id
                    ),
                );
                Ok(Outcome::Updated { created: None })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn dispatch(&mut self) -> Result<Outcome> {
        match self.status.instance_id.clone() {
            RemoteRef::Unset if self.service.spec.is_alias() => self.adopt_alias().await,
            RemoteRef::Unset => self.provision().await,
            RemoteRef::InProgress => self.resume().await,
            RemoteRef::Bound(id) => self.verify(&id).await,
        }
    }

    async fn delete(mut self) -> Result<Action> {
        info!("Deleting service {}", self.key());
        self.status.set_state(Phase::Deleting, "Deleting remote instance");
        if !self.persist().await? {
            return Ok(Action::await_change());
        }

        if !self.service.spec.is_alias() {
            if let Some(id) = self.status.instance_id.id().map(str::to_string) {
                match self.session.client.delete_instance(&id).await {
                    Ok(()) => info!("Deleted instance {} of service {}", id, self.key()),
                    Err(e) if e.is_not_found() => debug!("Instance {} already gone", id),
                    Err(e) => return self.fail(e.into()).await,
                }
            }
        }

        remove_finalizer(&self.api, &self.service, finalizers::SERVICE).await?;
        Ok(Action::await_change())
    }

    fn requeue(&self) -> Action {
        match self.status.state {
            Phase::Online | Phase::Failed => Action::requeue(self.ctx.config.sync_period),
            _ => Action::requeue(self.ctx.config.dependency_requeue),
        }
    }
}

pub async fn reconcile(service: Arc<Service>, ctx: Arc<ServiceReconciler>) -> Result<Action> {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &namespace);

    let Some(mut service) = api.get_opt(&name).await? else {
        debug!("Service {}/{} no longer exists", namespace, name);
        return Ok(Action::await_change());
    };

    let status = match service.status.clone() {
        Some(status) => status,
        None => {
            info!("Initializing status of service {}/{}", namespace, name);
            let status = ServiceStatus::pending(&service);
            match write_status(&api, &service, &status).await? {
                Some(updated) => service = updated,
                None => return Ok(Action::await_change()),
            }
            status
        }
    };

    if is_deleting(&service) && !has_finalizer(&service, finalizers::SERVICE) {
        return Ok(Action::await_change());
    }

    if let Some(reverted) = service.reverted_immutable_fields() {
        info!(
            "Service {}/{} changed immutable fields, reverting to plan {} of class {}",
            namespace, name, reverted.spec.plan, reverted.spec.service_class
        );
        replace(&api, &reverted).await?;
        return Ok(Action::requeue(ctx.config.dependency_requeue));
    }

    let session = match ctx
        .sessions
        .resolve(&namespace, service.spec.class_type(), service.spec.context.as_ref())
        .await
    {
        Ok(session) => session,
        Err(e) if e.is_not_found() && is_deleting(&service) => {
            info!(
                "No provider context for deleted service {}/{}, releasing it: {}",
                namespace, name, e
            );
            remove_finalizer(&api, &service, finalizers::SERVICE).await?;
            return Ok(Action::await_change());
        }
        Err(e) => {
            let mut persisted = status.clone();
            let mut status = status;
            return record_failure(&api, &mut service, &mut persisted, &mut status, e, &ctx.config).await;
        }
    };

    let mut pass = ServicePass {
        ctx: &ctx,
        api: api.clone(),
        session,
        service,
        persisted: status.clone(),
        status,
    };

    if is_deleting(&pass.service) {
        return pass.delete().await;
    }

    if !has_finalizer(&pass.service, finalizers::SERVICE) {
        match add_finalizer(&pass.api, &pass.service, finalizers::SERVICE).await? {
            Some(updated) => pass.service = updated,
            None => return Ok(Action::await_change()),
        }
    }

    let created = match pass.dispatch().await {
        Ok(Outcome::Updated { created }) => created,
        Ok(Outcome::LostRace) => return Ok(Action::await_change()),
        Err(e) => return pass.fail(e).await,
    };

    let written = pass.persist().await;
    if !matches!(written, Ok(true)) {
        if let Some(id) = created.filter(|_| pass.service.self_healing()) {
            warn!(
                "Could not record instance {} on service {}, deleting it",
                id,
                pass.key()
            );
            if let Err(e) = pass.session.client.delete_instance(&id).await {
                error!("Rollback of instance {} failed: {}", id, e);
            }
        }
    }

    if written? {
        debug!("Service {} is {}", pass.key(), pass.status.state);
        Ok(pass.requeue())
    } else {
        Ok(Action::await_change())
    }
}

pub fn error_policy(service: Arc<Service>, error: &OperatorError, ctx: Arc<ServiceReconciler>) -> Action {
    error!(
        "Reconciliation error for service {}/{}: {}",
        service.namespace().unwrap_or_default(),
        service.name_any(),
        error
    );
    Action::requeue(ctx.config.retry_interval)
}
