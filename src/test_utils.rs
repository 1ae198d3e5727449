// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: an in-memory Kubernetes API server, an in-memory provider,
//! and record fixtures.

use crate::error::{OperatorError, Result as OperatorResult};
use crate::provider::{
    InstanceRequest, KeyRequest, ProviderError, ProviderSession, RemoteInstance, RemoteKey,
    RemoteResourceClient, Role, SessionResolver,
};
use crate::types::{
    Binding, BindingSpec, Phase, RemoteRef, ResourceContext, Service, ServiceClassType, ServiceSpec,
    ServiceStatus,
};
use async_trait::async_trait;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::api::ObjectMeta;
use kube::client::Body;
use kube::{Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service as TowerService;

const DELETION_TIMESTAMP: &str = "2026-01-01T00:00:00Z";

/// A request as seen by [`FakeApiServer`]
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

#[derive(Default)]
struct ApiState {
    objects: BTreeMap<String, Value>,
    requests: Vec<RecordedRequest>,
    version: u64,
    status_writes_left: Option<usize>,
}

fn status_body(code: u16, reason: &str, message: String) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
}

fn not_found(path: &str) -> (u16, Value) {
    (404, status_body(404, "NotFound", format!("{} not found", path)))
}

fn conflict(path: &str) -> (u16, Value) {
    (
        409,
        status_body(409, "Conflict", format!("the object {} has been modified", path)),
    )
}

/// Apply an RFC 7386 JSON merge patch onto `target`
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn resource_version(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn has_finalizers(obj: &Value) -> bool {
    obj.pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

impl ApiState {
    fn stamp(&mut self, obj: &mut Value) {
        self.version += 1;
        obj["metadata"]["resourceVersion"] = json!(self.version.to_string());
        if obj.pointer("/metadata/uid").is_none() {
            obj["metadata"]["uid"] = json!(format!("uid-{}", self.version));
        }
    }

    fn handle(&mut self, method: &str, path: &str, body: Value) -> (u16, Value) {
        let (key, status_subresource) = match path.strip_suffix("/status") {
            Some(object_path) => (object_path, true),
            None => (path, false),
        };

        match method {
            "GET" => match self.objects.get(key) {
                Some(obj) => (200, obj.clone()),
                None => not_found(key),
            },
            "POST" => self.create(path, body),
            "PUT" => self.replace(key, body),
            "PATCH" => self.patch(key, status_subresource, body),
            "DELETE" => self.delete(key),
            _ => (
                405,
                status_body(405, "MethodNotAllowed", format!("{} not supported", method)),
            ),
        }
    }

    fn create(&mut self, collection: &str, mut obj: Value) -> (u16, Value) {
        let Some(name) = obj.pointer("/metadata/name").and_then(Value::as_str) else {
            return (422, status_body(422, "Invalid", "metadata.name is required".to_string()));
        };
        let key = format!("{}/{}", collection, name);
        if self.objects.contains_key(&key) {
            return (409, status_body(409, "AlreadyExists", format!("{} already exists", key)));
        }

        self.stamp(&mut obj);
        self.objects.insert(key, obj.clone());
        (201, obj)
    }

    fn replace(&mut self, key: &str, mut obj: Value) -> (u16, Value) {
        let Some(current) = self.objects.get(key).cloned() else {
            return not_found(key);
        };
        if let Some(rv) = resource_version(&obj) {
            if Some(rv) != resource_version(&current) {
                return conflict(key);
            }
        }

        // Replacing the main resource never touches status
        match current.get("status") {
            Some(status) => obj["status"] = status.clone(),
            None => {
                if let Some(map) = obj.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        for field in ["uid", "deletionTimestamp"] {
            if let Some(value) = current["metadata"].get(field) {
                obj["metadata"][field] = value.clone();
            }
        }

        if obj.pointer("/metadata/deletionTimestamp").is_some() && !has_finalizers(&obj) {
            self.objects.remove(key);
            return (200, obj);
        }

        self.stamp(&mut obj);
        self.objects.insert(key.to_string(), obj.clone());
        (200, obj)
    }

    fn patch(&mut self, key: &str, status_subresource: bool, patch: Value) -> (u16, Value) {
        let Some(mut current) = self.objects.get(key).cloned() else {
            return not_found(key);
        };
        if let Some(rv) = resource_version(&patch) {
            if Some(rv) != resource_version(&current) {
                return conflict(key);
            }
        }

        if status_subresource {
            if let Some(left) = self.status_writes_left {
                if left == 0 {
                    return (
                        500,
                        status_body(500, "InternalError", "status write rejected".to_string()),
                    );
                }
                self.status_writes_left = Some(left - 1);
            }
            if let Some(status) = patch.get("status") {
                merge_patch(&mut current["status"], status);
            }
        } else {
            merge_patch(&mut current, &patch);
        }

        self.stamp(&mut current);
        self.objects.insert(key.to_string(), current.clone());
        (200, current)
    }

    fn delete(&mut self, key: &str) -> (u16, Value) {
        let Some(mut current) = self.objects.get(key).cloned() else {
            return not_found(key);
        };

        if !has_finalizers(&current) {
            self.objects.remove(key);
            return (200, current);
        }
        if current.pointer("/metadata/deletionTimestamp").is_none() {
            current["metadata"]["deletionTimestamp"] = json!(DELETION_TIMESTAMP);
            self.stamp(&mut current);
            self.objects.insert(key.to_string(), current.clone());
        }
        (200, current)
    }
}

fn object_path<K: Resource<DynamicType = ()>>(namespace: &str, name: &str) -> String {
    format!("{}/{}", K::url_path(&(), Some(namespace)), name)
}

/// A stateful stand-in for the Kubernetes API server.
///
/// Objects are stored as JSON keyed by their URL path. Writes are checked
/// against the stored resourceVersion, deletion honours finalizers, and every
/// request is logged for assertions.
#[derive(Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<ApiState>>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if it had been created, returning it with uid and
    /// resourceVersion assigned
    pub fn insert<K>(&self, obj: &K) -> K
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut value = serde_json::to_value(obj).unwrap();

        let mut state = self.state.lock().unwrap();
        state.stamp(&mut value);
        state
            .objects
            .insert(object_path::<K>(&namespace, &name), value.clone());
        serde_json::from_value(value).unwrap()
    }

    pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&object_path::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Drop an object regardless of finalizers
    pub fn remove<K>(&self, namespace: &str, name: &str)
    where
        K: Resource<DynamicType = ()>,
    {
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&object_path::<K>(namespace, name));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Count logged requests with this method whose path starts with `prefix`
    pub fn count(&self, method: &str, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.starts_with(prefix))
            .count()
    }

    /// Let `n` more status writes succeed, then reject the rest with a 500
    pub fn fail_status_writes_after(&self, n: usize) {
        self.state.lock().unwrap().status_writes_left = Some(n);
    }

    /// Build a kube Client backed by this server
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }
}

impl TowerService<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let state = self.state.clone();

        Box::pin(async move {
            let method = req.method().to_string();
            let path = req.uri().path().to_string();
            let bytes = req.into_body().collect().await?.to_bytes();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

            let (status, payload) = {
                let mut state = state.lock().unwrap();
                state.requests.push(RecordedRequest {
                    method: method.clone(),
                    path: path.clone(),
                    body: body.clone(),
                });
                state.handle(&method, &path, body)
            };

            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string().into_bytes()))
                .unwrap())
        })
    }
}

#[derive(Default)]
struct ProviderState {
    instances: BTreeMap<String, (String, RemoteInstance)>,
    keys: BTreeMap<String, (String, RemoteKey)>,
    roles: Vec<Role>,
    calls: Vec<String>,
    failures: BTreeMap<String, ProviderError>,
    key_requests: Vec<KeyRequest>,
    next_id: u64,
}

/// In-memory provider holding instances and keys, logging every call as
/// `operation:argument`
pub struct FakeProvider {
    state: Mutex<ProviderState>,
    create_state: Mutex<String>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        let state = ProviderState {
            roles: vec![
                Role { name: "Reader".to_string(), id: "crn:role:reader".to_string() },
                Role { name: "Manager".to_string(), id: "crn:role:manager".to_string() },
            ],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            create_state: Mutex::new("active".to_string()),
        }
    }
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(state: &mut ProviderState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }

    fn record(&self, call: String) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        let operation = call.split(':').next().unwrap_or_default().to_string();
        state.calls.push(call);
        match state.failures.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn seed_instance(&self, name: &str, service_class: &str, lifecycle: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state, "crn:instance");
        let instance = RemoteInstance {
            id: id.clone(),
            name: name.to_string(),
            state: lifecycle.to_string(),
            dashboard_url: None,
        };
        state
            .instances
            .insert(id.clone(), (service_class.to_string(), instance));
        id
    }

    pub fn seed_key(&self, instance_id: &str, name: &str, credentials: Value) -> String {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state, "key");
        let key = RemoteKey {
            id: id.clone(),
            name: name.to_string(),
            credentials: credentials.as_object().cloned().unwrap_or_default(),
        };
        state.keys.insert(id.clone(), (instance_id.to_string(), key));
        id
    }

    pub fn remove_instance(&self, id: &str) {
        self.state.lock().unwrap().instances.remove(id);
    }

    pub fn remove_key(&self, id: &str) {
        self.state.lock().unwrap().keys.remove(id);
    }

    pub fn set_instance_state(&self, id: &str, lifecycle: &str) {
        if let Some((_, instance)) = self.state.lock().unwrap().instances.get_mut(id) {
            instance.state = lifecycle.to_string();
        }
    }

    pub fn set_credentials(&self, key_id: &str, credentials: Value) {
        if let Some((_, key)) = self.state.lock().unwrap().keys.get_mut(key_id) {
            key.credentials = credentials.as_object().cloned().unwrap_or_default();
        }
    }

    pub fn set_roles(&self, roles: Vec<Role>) {
        self.state.lock().unwrap().roles = roles;
    }

    /// Lifecycle state reported by newly created instances
    pub fn set_create_state(&self, lifecycle: &str) {
        *self.create_state.lock().unwrap() = lifecycle.to_string();
    }

    /// Make every call of `operation` fail with `err`
    pub fn fail(&self, operation: &str, err: ProviderError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(operation.to_string(), err);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(':').next() == Some(operation))
            .count()
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().instances.keys().cloned().collect()
    }

    pub fn key_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().keys.keys().cloned().collect()
    }

    pub fn key_requests(&self) -> Vec<KeyRequest> {
        self.state.lock().unwrap().key_requests.clone()
    }
}

#[async_trait]
impl RemoteResourceClient for FakeProvider {
    async fn create_instance(&self, request: &InstanceRequest) -> Result<RemoteInstance, ProviderError> {
        self.record(format!("create_instance:{}", request.name))?;
        let lifecycle = self.create_state.lock().unwrap().clone();
        let id = self.seed_instance(&request.name, &request.service_class, &lifecycle);
        self.get_stored_instance(&id)
    }

    async fn get_instance(&self, id: &str) -> Result<RemoteInstance, ProviderError> {
        self.record(format!("get_instance:{}", id))?;
        self.get_stored_instance(id)
    }

    async fn find_instances_by_name(
        &self,
        name: &str,
        service_class: &str,
    ) -> Result<Vec<RemoteInstance>, ProviderError> {
        self.record(format!("find_instances_by_name:{}", name))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .instances
            .values()
            .filter(|(class, i)| i.name == name && class == service_class)
            .map(|(_, i)| i.clone())
            .collect())
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ProviderError> {
        self.record(format!("delete_instance:{}", id))?;
        match self.state.lock().unwrap().instances.remove(id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(id.to_string())),
        }
    }

    async fn create_key(&self, request: &KeyRequest) -> Result<RemoteKey, ProviderError> {
        self.record(format!("create_key:{}", request.name))?;
        self.state.lock().unwrap().key_requests.push(request.clone());
        let id = self.seed_key(
            &request.instance_id,
            &request.name,
            json!({"apikey": format!("secret-for-{}", request.name), "port": 443}),
        );
        self.get_stored_key(&id)
    }

    async fn get_key(&self, id: &str) -> Result<RemoteKey, ProviderError> {
        self.record(format!("get_key:{}", id))?;
        self.get_stored_key(id)
    }

    async fn find_keys_by_name(&self, instance_id: &str, name: &str) -> Result<Vec<RemoteKey>, ProviderError> {
        self.record(format!("find_keys_by_name:{}", name))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .keys
            .values()
            .filter(|(instance, k)| instance == instance_id && k.name == name)
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn delete_key(&self, id: &str) -> Result<(), ProviderError> {
        self.record(format!("delete_key:{}", id))?;
        match self.state.lock().unwrap().keys.remove(id) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(id.to_string())),
        }
    }

    async fn list_roles(&self, service_class: &str) -> Result<Vec<Role>, ProviderError> {
        self.record(format!("list_roles:{}", service_class))?;
        Ok(self.state.lock().unwrap().roles.clone())
    }
}

impl FakeProvider {
    fn get_stored_instance(&self, id: &str) -> Result<RemoteInstance, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(id)
            .map(|(_, i)| i.clone())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    fn get_stored_key(&self, id: &str) -> Result<RemoteKey, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .keys
            .get(id)
            .map(|(_, k)| k.clone())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }
}

/// How [`FakeResolver`] fails, when it does
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveFailure {
    Unreachable,
    MissingContext,
}

/// Session resolver handing out a shared [`FakeProvider`]
pub struct FakeResolver {
    provider: Arc<FakeProvider>,
    failure: Mutex<Option<ResolveFailure>>,
}

impl FakeResolver {
    pub fn new(provider: Arc<FakeProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            failure: Mutex::new(None),
        })
    }

    pub fn fail_with(&self, failure: Option<ResolveFailure>) {
        *self.failure.lock().unwrap() = failure;
    }
}

#[async_trait]
impl SessionResolver for FakeResolver {
    async fn resolve(
        &self,
        _namespace: &str,
        _class_type: ServiceClassType,
        overrides: Option<&ResourceContext>,
    ) -> OperatorResult<ProviderSession> {
        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(ResolveFailure::Unreachable) => Err(ProviderError::Unreachable(
                "dns error: failed to lookup address information".to_string(),
            )
            .into()),
            Some(ResolveFailure::MissingContext) => Err(OperatorError::ContextNotFound(
                "secret secret-ibm-cloud-operator not found".to_string(),
            )),
            None => {
                let defaults = ResourceContext {
                    region: Some("us-south".to_string()),
                    resource_group: Some("default".to_string()),
                    ..Default::default()
                };
                Ok(ProviderSession {
                    client: self.provider.clone(),
                    context: overrides.map(|o| o.or(&defaults)).unwrap_or(defaults),
                })
            }
        }
    }
}

/// A Service in the `default` namespace, not yet seen by the operator
pub fn service_fixture(name: &str, plan: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: ServiceSpec {
            service_class: "cloudantnosqldb".to_string(),
            service_class_type: None,
            plan: plan.to_string(),
            external_name: None,
            parameters: vec![],
            tags: vec![],
            context: None,
        },
        status: None,
    }
}

/// A Service that has already been provisioned and is Online
pub fn online_service_fixture(name: &str, instance_id: &str) -> Service {
    let mut service = service_fixture(name, "lite");
    service.metadata.finalizers = Some(vec![crate::constants::finalizers::SERVICE.to_string()]);
    let mut status = ServiceStatus::pending(&service);
    status.state = Phase::Online;
    status.message = "active".to_string();
    status.instance_id = RemoteRef::Bound(instance_id.to_string());
    service.status = Some(status);
    service
}

/// A Binding in the `default` namespace pointing at `service_name`
pub fn binding_fixture(name: &str, service_name: &str) -> Binding {
    Binding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: BindingSpec {
            service_name: service_name.to_string(),
            service_namespace: None,
            secret_name: None,
            role: None,
            alias: None,
            parameters: vec![],
        },
        status: None,
    }
}
