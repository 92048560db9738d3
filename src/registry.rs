//! Route registry for RPC services.
//!
//! Services declare named methods; the registry maps every
//! `/service/method` route to its codec callbacks and, once registered, a
//! handler. Building is a mutable phase; [`Registry::freeze`] checks
//! completeness and yields the immutable table that reads go through while
//! serving. The registry never invokes handlers itself; dispatch belongs to
//! the transport layer, which answers unresolved routes with UNIMPLEMENTED.

use crate::frame::{MarshalFn, UnmarshalFn};

use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Registry configuration errors. All are raised synchronously at
/// configuration time, before serving begins.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A service declared the same method name twice.
    #[error("service {service:?} declares method {method:?} twice")]
    DuplicateMethod { service: String, method: String },
    /// A service with this name was already added.
    #[error("service {0:?} already added")]
    DuplicateService(String),
    /// Another service already claimed this route.
    #[error("route {0:?} already present")]
    DuplicateRoute(String),
    /// The route is not declared by any added service.
    #[error("route {0:?} is not declared by any service")]
    UnknownRoute(String),
    /// The route already has a handler.
    #[error("route {0:?} already has a handler")]
    HandlerRegistered(String),
    /// Routes were left without handlers at freeze time.
    #[error("missing handlers for routes: {}", .0.join(", "))]
    Incomplete(Vec<String>),
}

/// A method declaration: a name plus optional codec callbacks.
///
/// A method without callbacks is a raw byte-in/byte-out route.
#[derive(Clone)]
pub struct Method {
    name: String,
    marshal: Option<MarshalFn>,
    unmarshal: Option<UnmarshalFn>,
}

impl Method {
    /// Declare a method with no codec callbacks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            marshal: None,
            unmarshal: None,
        }
    }

    /// Attach a marshal callback.
    pub fn marshal(mut self, marshal: MarshalFn) -> Self {
        self.marshal = Some(marshal);
        self
    }

    /// Attach an unmarshal callback.
    pub fn unmarshal(mut self, unmarshal: UnmarshalFn) -> Self {
        self.unmarshal = Some(unmarshal);
        self
    }

    /// Get the method name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("marshal", &self.marshal.is_some())
            .field("unmarshal", &self.unmarshal.is_some())
            .finish()
    }
}

/// An immutable service declaration: a name and an ordered set of methods.
#[derive(Debug, Clone)]
pub struct Service {
    name: String,
    methods: Vec<Method>,
}

impl Service {
    /// Build a service descriptor. Method names must be unique within the
    /// service.
    pub fn new(name: impl Into<String>, methods: Vec<Method>) -> Result<Self, RegistryError> {
        let name = name.into();

        let mut seen = HashSet::new();
        for method in &methods {
            if !seen.insert(method.name.as_str()) {
                return Err(RegistryError::DuplicateMethod {
                    service: name.clone(),
                    method: method.name.clone(),
                });
            }
        }

        Ok(Self { name, methods })
    }

    /// Get the service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the declared methods, in declaration order.
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }
}

struct RouteEntry<H> {
    route: String,
    marshal: Option<MarshalFn>,
    unmarshal: Option<UnmarshalFn>,
    handler: Option<H>,
}

/// The build-phase route table.
///
/// Routes are recorded in service-declaration then method-declaration
/// order, which is the order [`missing_routes`] reports them in.
///
/// [`missing_routes`]: Registry::missing_routes
pub struct Registry<H> {
    services: Vec<String>,
    routes: Vec<RouteEntry<H>>,
    index: HashMap<String, usize>,
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Registry<H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            routes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Create a registry pre-loaded with services.
    pub fn with_services(
        services: impl IntoIterator<Item = Service>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for service in services {
            registry.add_service(service)?;
        }
        Ok(registry)
    }

    /// Add every `/service/method` route of a service, handler-less.
    ///
    /// Fails without modifying the registry if the service name was already
    /// added or any route collides with an existing one.
    pub fn add_service(&mut self, service: Service) -> Result<(), RegistryError> {
        let Service { name, methods } = service;

        if self.services.contains(&name) {
            return Err(RegistryError::DuplicateService(name));
        }

        let mut pending = Vec::with_capacity(methods.len());
        for method in &methods {
            let route = format!("/{}/{}", name, method.name);
            if self.index.contains_key(&route) {
                return Err(RegistryError::DuplicateRoute(route));
            }
            pending.push(route);
        }

        for (method, route) in methods.into_iter().zip(pending) {
            self.index.insert(route.clone(), self.routes.len());
            self.routes.push(RouteEntry {
                route,
                marshal: method.marshal,
                unmarshal: method.unmarshal,
                handler: None,
            });
        }
        self.services.push(name);

        Ok(())
    }

    /// Attach a handler to a declared route.
    pub fn register(&mut self, route: &str, handler: H) -> Result<(), RegistryError> {
        let Some(&idx) = self.index.get(route) else {
            return Err(RegistryError::UnknownRoute(route.to_string()));
        };

        let entry = &mut self.routes[idx];
        if entry.handler.is_some() {
            return Err(RegistryError::HandlerRegistered(route.to_string()));
        }
        entry.handler = Some(handler);

        Ok(())
    }

    /// Whether a handler is registered for the route.
    ///
    /// Declared routes without a handler answer false.
    pub fn has_route(&self, route: &str) -> bool {
        self.index
            .get(route)
            .is_some_and(|&i| self.routes[i].handler.is_some())
    }

    /// Declared routes with no handler, in declaration order.
    pub fn missing_routes(&self) -> Vec<&str> {
        self.routes
            .iter()
            .filter(|e| e.handler.is_none())
            .map(|e| e.route.as_str())
            .collect()
    }

    /// The route's marshal callback.
    ///
    /// Unknown routes and routes declared without a marshaller both answer
    /// `None`; the two cases are not distinguished.
    pub fn marshaller(&self, route: &str) -> Option<MarshalFn> {
        self.index.get(route).and_then(|&i| self.routes[i].marshal.clone())
    }

    /// The route's unmarshal callback.
    ///
    /// Unknown routes and routes declared without an unmarshaller both
    /// answer `None`.
    pub fn unmarshaller(&self, route: &str) -> Option<UnmarshalFn> {
        self.index
            .get(route)
            .and_then(|&i| self.routes[i].unmarshal.clone())
    }

    /// Whether every declared route has a handler.
    pub fn is_complete(&self) -> bool {
        self.routes.iter().all(|e| e.handler.is_some())
    }

    /// Check completeness and produce the immutable serve-time table.
    ///
    /// Fails with the missing-route list unless every route has a handler.
    /// Consuming the builder makes post-freeze mutation unrepresentable.
    pub fn freeze(self) -> Result<FrozenRegistry<H>, RegistryError> {
        let missing: Vec<String> = self
            .routes
            .iter()
            .filter(|e| e.handler.is_none())
            .map(|e| e.route.clone())
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::Incomplete(missing));
        }

        debug!(
            services = self.services.len(),
            routes = self.routes.len(),
            "registry frozen"
        );

        Ok(FrozenRegistry {
            routes: self.routes,
            index: self.index,
        })
    }
}

impl<H> fmt::Debug for Registry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.services)
            .field("routes", &self.routes.iter().map(|e| &e.route).collect::<Vec<_>>())
            .finish()
    }
}

/// A resolved route: the registered handler plus codec callbacks.
pub struct Route<'a, H> {
    /// The `/service/method` route string.
    pub path: &'a str,
    /// The registered handler.
    pub handler: &'a H,
    /// The method's marshal callback, if declared.
    pub marshal: Option<&'a MarshalFn>,
    /// The method's unmarshal callback, if declared.
    pub unmarshal: Option<&'a UnmarshalFn>,
}

/// The immutable serve-time route table.
///
/// Every route holds a handler. Reads take shared references only, so the
/// table can be consulted concurrently from any number of streams.
pub struct FrozenRegistry<H> {
    routes: Vec<RouteEntry<H>>,
    index: HashMap<String, usize>,
}

impl<H> FrozenRegistry<H> {
    /// Look up a route.
    ///
    /// `None` is the caller's cue to answer with an UNIMPLEMENTED status.
    pub fn resolve(&self, route: &str) -> Option<Route<'_, H>> {
        let &idx = self.index.get(route)?;
        let entry = &self.routes[idx];
        let handler = entry.handler.as_ref()?;

        Some(Route {
            path: &entry.route,
            handler,
            marshal: entry.marshal.as_ref(),
            unmarshal: entry.unmarshal.as_ref(),
        })
    }

    /// Whether the route is served.
    pub fn has_route(&self, route: &str) -> bool {
        self.index.contains_key(route)
    }

    /// All served routes, in declaration order.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|e| e.route.as_str())
    }

    /// Number of served routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table serves no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<H> fmt::Debug for FrozenRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenRegistry")
            .field("routes", &self.routes.iter().map(|e| &e.route).collect::<Vec<_>>())
            .finish()
    }
}
