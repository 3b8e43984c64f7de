//! WebSocket endpoint registry.
//!
//! # Responsibilities
//! - Collect endpoints from providers (discovered) and explicit registration
//! - Merge both sources into one deployment scoped under the root context
//! - Reject malformed paths and path collisions before anything binds
//! - Turn the deployment into routes with a uniform incoming buffer size
//!
//! # Data Flow
//! ```text
//! EndpointProvider::discover ──┐
//!                              ├─→ EndpointRegistry::merge ─→ WebSocketAddOn ─→ Router
//! EndpointRegistry::register ──┘
//! ```
//!
//! # Design Decisions
//! - Exact duplicates from the same source collapse; any other collision on
//!   a path is a deployment conflict
//! - An empty deployment yields no add-on at all
//! - Deployment is all-or-nothing

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::routing::get;
use axum::Router;
use serde_json::Value;

/// Per-endpoint user properties handed to every session.
pub type Properties = BTreeMap<String, Value>;

/// Context for one WebSocket session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Deployed route, including the root context.
    pub path: String,
    pub user_properties: Arc<Properties>,
}

/// A WebSocket endpoint handler.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Serve one upgraded connection until it closes.
    async fn serve(&self, socket: WebSocket, session: Session);
}

/// An endpoint type that declares its own path.
pub trait ServerEndpoint: Endpoint + Default {
    const PATH: &'static str;
}

/// Identity of an endpoint handler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(&'static str);

impl HandlerId {
    pub fn of<E: ?Sized + 'static>() -> Self {
        Self(std::any::type_name::<E>())
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One endpoint ready for deployment.
#[derive(Clone)]
pub struct EndpointDescriptor {
    handler_id: HandlerId,
    path: String,
    user_properties: Properties,
    handler: Arc<dyn Endpoint>,
}

impl EndpointDescriptor {
    pub fn new<E: Endpoint>(endpoint: E, path: impl Into<String>) -> Self {
        Self {
            handler_id: HandlerId::of::<E>(),
            path: path.into(),
            user_properties: Properties::new(),
            handler: Arc::new(endpoint),
        }
    }

    /// Descriptor for an endpoint type at its declared path.
    pub fn declared<E: ServerEndpoint>() -> Self {
        Self::new(E::default(), E::PATH)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_properties<I, K>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.user_properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn handler_id(&self) -> HandlerId {
        self.handler_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn user_properties(&self) -> &Properties {
        &self.user_properties
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("handler_id", &self.handler_id)
            .field("path", &self.path)
            .field("user_properties", &self.user_properties)
            .finish_non_exhaustive()
    }
}

/// Produces endpoints that declare their own paths.
pub trait EndpointProvider: Send + Sync {
    fn discover(&self) -> Vec<EndpointDescriptor>;
}

/// Provider over a fixed list of `ServerEndpoint` types.
#[derive(Default)]
pub struct DeclaredEndpoints {
    factories: Vec<fn() -> EndpointDescriptor>,
}

impl DeclaredEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<E: ServerEndpoint>(mut self) -> Self {
        self.factories.push(EndpointDescriptor::declared::<E>);
        self
    }
}

impl EndpointProvider for DeclaredEndpoints {
    fn discover(&self) -> Vec<EndpointDescriptor> {
        self.factories.iter().map(|factory| factory()).collect()
    }
}

/// Where an endpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    Discovered,
    Registered,
}

impl fmt::Display for EndpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSource::Discovered => f.write_str("discovered"),
            EndpointSource::Registered => f.write_str("registered"),
        }
    }
}

/// Error type for endpoint deployment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeploymentError {
    #[error("Unable to deploy WebSocket endpoints: malformed path '{path}' for {handler}: {reason}")]
    MalformedPath {
        handler: HandlerId,
        path: String,
        reason: &'static str,
    },
    #[error(
        "Unable to deploy WebSocket endpoints: {existing} ({existing_source}) and {incoming} ({incoming_source}) both target '{path}'"
    )]
    Conflict {
        path: String,
        existing: HandlerId,
        existing_source: EndpointSource,
        incoming: HandlerId,
        incoming_source: EndpointSource,
    },
    #[error("Unable to deploy {owner} at '{path}': the path is already routed")]
    RouteTaken { path: String, owner: String },
}

/// Accumulates endpoints during bootstrap.
#[derive(Default)]
pub struct EndpointRegistry {
    discovered: Vec<EndpointDescriptor>,
    registered: Vec<EndpointDescriptor>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every endpoint the provider discovers.
    pub fn discover_from(&mut self, provider: &dyn EndpointProvider) {
        self.discovered.extend(provider.discover());
    }

    /// Register an endpoint at an explicit path.
    pub fn register(&mut self, descriptor: EndpointDescriptor) {
        self.registered.push(descriptor);
    }

    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty() && self.registered.is_empty()
    }

    /// Merge both sources into one deployment.
    ///
    /// Returns `None` when there is nothing to deploy.
    pub fn merge(
        self,
        root_context: &str,
        buffer_size: usize,
    ) -> Result<Option<WebSocketAddOn>, DeploymentError> {
        let mut by_path: BTreeMap<String, (EndpointSource, EndpointDescriptor)> = BTreeMap::new();

        let sources = self
            .discovered
            .into_iter()
            .map(|d| (EndpointSource::Discovered, d))
            .chain(self.registered.into_iter().map(|d| (EndpointSource::Registered, d)));

        for (source, descriptor) in sources {
            validate_path(&descriptor)?;
            let route = join_route(root_context, &descriptor.path);

            match by_path.get(&route) {
                None => {
                    by_path.insert(route, (source, descriptor));
                }
                Some((existing_source, existing))
                    if *existing_source == source
                        && existing.handler_id == descriptor.handler_id
                        && existing.user_properties == descriptor.user_properties =>
                {
                    tracing::debug!(path = %route, handler = %descriptor.handler_id, "Duplicate endpoint collapsed");
                }
                Some((existing_source, existing)) => {
                    return Err(DeploymentError::Conflict {
                        path: route,
                        existing: existing.handler_id,
                        existing_source: *existing_source,
                        incoming: descriptor.handler_id,
                        incoming_source: source,
                    });
                }
            }
        }

        if by_path.is_empty() {
            return Ok(None);
        }

        let endpoints = by_path
            .into_iter()
            .map(|(route, (source, descriptor))| DeployedEndpoint {
                route,
                source,
                descriptor,
            })
            .collect();

        Ok(Some(WebSocketAddOn {
            buffer_size,
            endpoints,
        }))
    }
}

fn validate_path(descriptor: &EndpointDescriptor) -> Result<(), DeploymentError> {
    let malformed = |reason| DeploymentError::MalformedPath {
        handler: descriptor.handler_id,
        path: descriptor.path.clone(),
        reason,
    };
    let path = descriptor.path.as_str();

    if !path.starts_with('/') {
        return Err(malformed("must start with '/'"));
    }
    if path.chars().any(char::is_whitespace) {
        return Err(malformed("must not contain whitespace"));
    }
    if path.contains("//") {
        return Err(malformed("must not contain empty segments"));
    }
    let segments: Vec<&str> = path.split('/').collect();
    for (index, segment) in segments.iter().enumerate() {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Err(malformed("captures are written as '{name}' or '{*name}'"));
        }
        if segment.starts_with("{*") && index + 1 != segments.len() {
            return Err(malformed("a catch-all capture must be the last segment"));
        }
        let opens = segment.matches('{').count();
        let closes = segment.matches('}').count();
        if opens != closes || opens > 1 {
            return Err(malformed("unbalanced parameter braces"));
        }
        if opens == 1 && !(segment.starts_with('{') && segment.ends_with('}') && segment.len() > 2) {
            return Err(malformed("parameters must span a whole segment"));
        }
    }
    Ok(())
}

/// Join a root context and an endpoint path into a route.
pub fn join_route(root_context: &str, path: &str) -> String {
    let root = root_context.trim_end_matches('/');
    match (root.is_empty(), path) {
        (true, _) => path.to_string(),
        (false, "/") => root.to_string(),
        (false, _) => format!("{}{}", root, path),
    }
}

/// A deployed endpoint and its full route.
#[derive(Debug, Clone)]
pub struct DeployedEndpoint {
    pub route: String,
    pub source: EndpointSource,
    pub descriptor: EndpointDescriptor,
}

/// The single WebSocket add-on attached to a listener.
#[derive(Debug, Clone)]
pub struct WebSocketAddOn {
    buffer_size: usize,
    endpoints: Vec<DeployedEndpoint>,
}

impl WebSocketAddOn {
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Deployed endpoints ordered by route.
    pub fn endpoints(&self) -> &[DeployedEndpoint] {
        &self.endpoints
    }

    /// Routes upgrading requests and handing sessions to the endpoints.
    pub fn router<S>(&self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let buffer_size = self.buffer_size;
        self.endpoints.iter().fold(Router::new(), |router, endpoint| {
            let handler = endpoint.descriptor.handler.clone();
            let session = Session {
                path: endpoint.route.clone(),
                user_properties: Arc::new(endpoint.descriptor.user_properties.clone()),
            };
            tracing::info!(
                path = %endpoint.route,
                handler = %endpoint.descriptor.handler_id,
                source = %endpoint.source,
                "WebSocket endpoint deployed"
            );

            router.route(
                &endpoint.route,
                get(move |ws: WebSocketUpgrade| {
                    let handler = handler.clone();
                    let session = session.clone();
                    async move {
                        ws.max_message_size(buffer_size)
                            .on_upgrade(move |socket| async move { handler.serve(socket, session).await })
                    }
                }),
            )
        })
    }
}
