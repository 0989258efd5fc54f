//! Declarative route tables.
//!
//! A [`RouteTable<S>`] is an ordered list of `(method, path pattern, handler)`
//! entries for one service type `S`. Handlers are plain function pointers
//! taking the service instance explicitly, so a table can be built before any
//! instance exists and copied cheaply with [`derive`](RouteTable::derive).
//!
//! At startup the table is bound to a live instance with
//! [`bind_to`](RouteTable::bind_to). Lookup is a linear scan in registration
//! order with a `{param}` template matcher; the first entry whose method and
//! template both match wins.

use crate::error::HandlerResult;
use crate::pipeline::{HandlerRequest, Reply};
use boost_kernel::HttpMethod;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Future returned by every handler.
pub type HandlerFuture = BoxFuture<'static, HandlerResult<Reply>>;

/// Unbound handler for a service of type `S`.
pub type Handler<S> = fn(Arc<S>, HandlerRequest) -> HandlerFuture;

/// Handler already resolved against a service instance.
pub type BoundHandler = Arc<dyn Fn(HandlerRequest) -> HandlerFuture + Send + Sync>;

/// One registered route.
pub struct RouteEntry<S> {
    pub method: HttpMethod,
    pub path_pattern: String,
    pub handler: Handler<S>,
}

impl<S> Clone for RouteEntry<S> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            path_pattern: self.path_pattern.clone(),
            handler: self.handler,
        }
    }
}

impl<S> fmt::Debug for RouteEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("path_pattern", &self.path_pattern)
            .finish_non_exhaustive()
    }
}

/// Ordered route declarations for service type `S`.
pub struct RouteTable<S> {
    entries: Vec<RouteEntry<S>>,
}

impl<S> Default for RouteTable<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S> fmt::Debug for RouteTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.entries).finish()
    }
}

impl<S> RouteTable<S> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start registering a route; finish with [`RouteRegistrar::to`].
    pub fn add_route(&mut self, method: HttpMethod, path: impl Into<String>) -> RouteRegistrar<'_, S> {
        RouteRegistrar {
            table: self,
            method,
            path: path.into(),
        }
    }

    /// Independent copy of this table.
    ///
    /// Routes added to (or removed from) the copy never show up in `self`,
    /// and the other way round.
    pub fn derive(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }

    /// Remove every entry registered for exactly `method` and `path`.
    /// Returns how many entries were removed.
    pub fn remove_route(&mut self, method: HttpMethod, path: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.method == method && e.path_pattern == path));
        before - self.entries.len()
    }

    pub fn entries(&self) -> &[RouteEntry<S>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Send + Sync + 'static> RouteTable<S> {
    /// Resolve every handler against `service`.
    pub fn bind_to(&self, service: Arc<S>) -> BoundRoutes {
        let routes = self
            .entries
            .iter()
            .map(|entry| {
                let service = Arc::clone(&service);
                let handler = entry.handler;
                BoundRoute {
                    method: entry.method,
                    path_pattern: entry.path_pattern.clone(),
                    handler: Arc::new(move |req| handler(Arc::clone(&service), req)),
                }
            })
            .collect();
        BoundRoutes { routes }
    }
}

/// Pending registration returned by [`RouteTable::add_route`].
pub struct RouteRegistrar<'a, S> {
    table: &'a mut RouteTable<S>,
    method: HttpMethod,
    path: String,
}

impl<S> RouteRegistrar<'_, S> {
    /// Append the entry and hand the handler back unchanged.
    pub fn to(self, handler: Handler<S>) -> Handler<S> {
        self.table.entries.push(RouteEntry {
            method: self.method,
            path_pattern: self.path,
            handler,
        });
        handler
    }
}

/// A route resolved against a service instance.
#[derive(Clone)]
pub struct BoundRoute {
    pub method: HttpMethod,
    pub path_pattern: String,
    handler: BoundHandler,
}

impl BoundRoute {
    pub fn call(&self, req: HandlerRequest) -> HandlerFuture {
        (self.handler)(req)
    }
}

impl fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRoute")
            .field("method", &self.method)
            .field("path_pattern", &self.path_pattern)
            .finish_non_exhaustive()
    }
}

/// Bound routes in registration order.
#[derive(Debug, Clone, Default)]
pub struct BoundRoutes {
    routes: Vec<BoundRoute>,
}

impl BoundRoutes {
    /// First route whose method and template match, with its path params.
    pub fn find(&self, method: HttpMethod, path: &str) -> Option<(&BoundRoute, HashMap<String, String>)> {
        self.routes
            .iter()
            .filter(|r| r.method == method)
            .find_map(|r| match_path(&r.path_pattern, path).map(|params| (r, params)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundRoute> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Match a concrete path against a template such as `/models/{model_id}`.
fn match_path(template: &str, path: &str) -> Option<HashMap<String, String>> {
    let t_parts: Vec<&str> = template.trim_matches('/').split('/').collect();
    let p_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    if t_parts.len() != p_parts.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (t, p) in t_parts.iter().zip(p_parts.iter()) {
        if let Some(name) = t.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            if p.is_empty() {
                return None;
            }
            params.insert(name.to_string(), p.to_string());
        } else if t != p {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    struct Echo {
        tag: &'static str,
    }

    fn tag(svc: Arc<Echo>, _req: HandlerRequest) -> HandlerFuture {
        async move { Ok(Reply::json(json!({ "tag": svc.tag }))) }.boxed()
    }

    fn param(_svc: Arc<Echo>, req: HandlerRequest) -> HandlerFuture {
        async move { Ok(Reply::plain(req.params.get("id").cloned().unwrap_or_default())) }.boxed()
    }

    fn table() -> RouteTable<Echo> {
        let mut table = RouteTable::new();
        table.add_route(HttpMethod::Get, "/a").to(tag);
        table.add_route(HttpMethod::Get, "/items/{id}").to(param);
        table
    }

    #[test]
    fn registrar_returns_the_handler() {
        let mut table: RouteTable<Echo> = RouteTable::new();
        let returned = table.add_route(HttpMethod::Get, "/a").to(tag);
        assert_eq!(returned as usize, tag as Handler<Echo> as usize);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn derived_tables_are_isolated() {
        let base = table();
        let mut derived = base.derive();
        derived.add_route(HttpMethod::Get, "/b").to(tag);

        assert_eq!(base.len(), 2);
        assert_eq!(derived.len(), 3);
        assert!(base.entries().iter().all(|e| e.path_pattern != "/b"));

        let mut other = base.derive();
        assert_eq!(other.remove_route(HttpMethod::Get, "/a"), 1);
        assert_eq!(base.len(), 2);
        assert_eq!(derived.len(), 3);
    }

    #[test]
    fn remove_route_needs_exact_method_and_path() {
        let mut table = table();
        assert_eq!(table.remove_route(HttpMethod::Post, "/a"), 0);
        assert_eq!(table.remove_route(HttpMethod::Get, "/a/"), 0);
        assert_eq!(table.remove_route(HttpMethod::Get, "/a"), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_matches_method_and_template() {
        let bound = table().bind_to(Arc::new(Echo { tag: "x" }));
        assert_eq!(bound.len(), 2);

        let (route, params) = bound.find(HttpMethod::Get, "/items/42").unwrap();
        assert_eq!(route.path_pattern, "/items/{id}");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        assert!(bound.find(HttpMethod::Post, "/a").is_none());
        assert!(bound.find(HttpMethod::Get, "/items").is_none());
        assert!(bound.find(HttpMethod::Get, "/items/1/extra").is_none());
    }

    #[test]
    fn first_registered_route_wins() {
        let mut table = RouteTable::new();
        table.add_route(HttpMethod::Get, "/items/{id}").to(param);
        table.add_route(HttpMethod::Get, "/items/special").to(tag);
        let bound = table.bind_to(Arc::new(Echo { tag: "x" }));
        let (route, _) = bound.find(HttpMethod::Get, "/items/special").unwrap();
        assert_eq!(route.path_pattern, "/items/{id}");
    }

    #[tokio::test]
    async fn bound_handlers_see_their_instance() {
        let bound = table().bind_to(Arc::new(Echo { tag: "first" }));
        let (route, _) = bound.find(HttpMethod::Get, "/a").unwrap();
        let reply = route
            .call(HandlerRequest::new(HttpMethod::Get, "/a"))
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(reply.body()).unwrap();
        assert_eq!(body, json!({ "tag": "first" }));
    }

    #[test]
    fn template_matching() {
        assert!(match_path("/health", "/health").is_some());
        assert!(match_path("/health", "/health/").is_some());
        assert!(match_path("/", "/").is_some());
        assert!(match_path("/health", "/healthz").is_none());
        let params = match_path("/{a}/x/{b}", "/1/x/2").unwrap();
        assert_eq!(params["a"], "1");
        assert_eq!(params["b"], "2");
    }
}
