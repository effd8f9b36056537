// ABOUTME: Priority-ordered route matching over host, method, and path patterns
// ABOUTME: Compiles routes into an immutable snapshot with params, rewriting, and reserved-path filtering
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Route Matching
//!
//! Routes are compiled once into an immutable table sorted by descending
//! priority, with ties broken by specificity (more literal segments first,
//! fewer wildcards first). Lookups walk the table in order and take the
//! first full match. The live table is an atomically swapped snapshot, so
//! the request hot path never takes a write lock.
//!
//! Reserved paths are filtered before any table lookup and always win over
//! dynamic routes, so a catch-all route can never make the gateway's own
//! control surface unreachable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::constants::reserved_paths;
use crate::errors::{GatewayError, GatewayResult};
use crate::metering::MeterExpr;
use crate::models::Route;

/// Host pattern: literal, suffix wildcard, or match-all
#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    Literal(String),
    /// Stored with the leading dot, e.g. `.example.com`
    Suffix(String),
}

impl HostPattern {
    fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern.is_empty() || pattern == "*" {
            Self::Any
        } else if let Some(suffix) = pattern.strip_prefix("*.") {
            Self::Suffix(format!(".{suffix}"))
        } else {
            Self::Literal(pattern)
        }
    }

    fn matches(&self, host: &str) -> bool {
        let host = strip_host_port(host).to_ascii_lowercase();
        match self {
            Self::Any => true,
            Self::Literal(literal) => host == *literal,
            Self::Suffix(suffix) => host.ends_with(suffix.as_str()),
        }
    }
}

/// Strip an optional `:port` from a `Host` header value, preserving IPv6
/// brackets.
fn strip_host_port(host: &str) -> &str {
    if let Some(end) = host.strip_prefix('[').and(host.find(']')) {
        return &host[..=end];
    }
    host.rsplit_once(':')
        .map_or(host, |(name, port)| {
            if port.chars().all(|c| c.is_ascii_digit()) {
                name
            } else {
                host
            }
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A route compiled for matching
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    /// The source route definition
    pub route: Route,
    /// Pre-parsed metering expression
    pub meter: MeterExpr,
    host: HostPattern,
    methods: HashSet<String>,
    segments: Vec<PathSegment>,
    literal_count: usize,
    wildcard_count: usize,
}

impl CompiledRoute {
    /// Compile a route definition
    ///
    /// # Errors
    ///
    /// Returns a configuration error on an invalid path pattern or an
    /// unparseable metering expression.
    pub fn compile(route: Route) -> GatewayResult<Self> {
        let segments = parse_path_pattern(&route.path_pattern)?;
        let literal_count = segments
            .iter()
            .filter(|s| matches!(s, PathSegment::Literal(_)))
            .count();
        let wildcard_count = segments
            .iter()
            .filter(|s| matches!(s, PathSegment::Wildcard))
            .count();
        let meter = MeterExpr::parse(&route.metering_expression).map_err(|e| {
            GatewayError::config(format!("route {}: {}", route.id, e.message))
        })?;

        Ok(Self {
            host: HostPattern::parse(&route.host_pattern),
            methods: route
                .methods
                .iter()
                .map(|m| m.to_ascii_uppercase())
                .collect(),
            segments,
            literal_count,
            wildcard_count,
            meter,
            route,
        })
    }

    fn matches_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.contains(&method.to_ascii_uppercase())
    }

    fn match_path(&self, path: &str) -> Option<(HashMap<String, String>, Option<String>)> {
        let given: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();
        let mut rest = None;

        let mut i = 0;
        for segment in &self.segments {
            match segment {
                PathSegment::Literal(literal) => {
                    if given.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                    i += 1;
                }
                PathSegment::Param(name) => {
                    let value = given.get(i)?;
                    params.insert(name.clone(), (*value).to_owned());
                    i += 1;
                }
                PathSegment::Wildcard => {
                    rest = Some(given[i..].join("/"));
                    i = given.len();
                }
            }
        }

        if i == given.len() {
            Some((params, rest))
        } else {
            None
        }
    }
}

fn parse_path_pattern(pattern: &str) -> GatewayResult<Vec<PathSegment>> {
    let raw: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());

    for (index, part) in raw.iter().enumerate() {
        let segment = if *part == "*" {
            if index != raw.len() - 1 {
                return Err(GatewayError::config(format!(
                    "wildcard must be the final segment in path pattern: {pattern}"
                )));
            }
            PathSegment::Wildcard
        } else if let Some(name) = part.strip_prefix(':') {
            if name.is_empty() {
                return Err(GatewayError::config(format!(
                    "empty parameter name in path pattern: {pattern}"
                )));
            }
            PathSegment::Param(name.to_owned())
        } else {
            PathSegment::Literal((*part).to_owned())
        };
        segments.push(segment);
    }

    Ok(segments)
}

/// One successful route match
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<CompiledRoute>,
    /// Captured `:param` values
    pub params: HashMap<String, String>,
    /// Segments consumed by a trailing wildcard, joined with `/`
    pub wildcard_rest: Option<String>,
}

impl RouteMatch {
    /// Produce the rewritten path when the route defines a rewrite
    /// template, substituting captured parameters and the wildcard rest.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the template references an
    /// uncaptured parameter or the result would escape the upstream root.
    pub fn rewritten_path(&self) -> GatewayResult<Option<String>> {
        let Some(template) = self.route.route.rewrite.as_deref() else {
            return Ok(None);
        };

        let mut parts = Vec::new();
        for part in template.split('/').filter(|s| !s.is_empty()) {
            if part == "*" {
                if let Some(rest) = self.wildcard_rest.as_deref() {
                    if !rest.is_empty() {
                        parts.push(rest.to_owned());
                    }
                }
            } else if let Some(name) = part.strip_prefix(':') {
                let value = self.params.get(name).ok_or_else(|| {
                    GatewayError::config(format!(
                        "rewrite template references unknown parameter :{name}"
                    ))
                })?;
                parts.push(value.clone());
            } else {
                parts.push(part.to_owned());
            }
        }

        let rewritten = format!("/{}", parts.join("/"));
        // A rewritten path must never climb above the upstream root.
        if rewritten.split('/').any(|s| s == "..") {
            return Err(GatewayError::config(format!(
                "rewrite escapes upstream root: {rewritten}"
            )));
        }

        Ok(Some(rewritten))
    }
}

/// Immutable, pre-sorted route table
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<CompiledRoute>>,
}

impl RouteTable {
    /// Compile and sort a set of route definitions
    ///
    /// # Errors
    ///
    /// Returns the first compilation error encountered.
    pub fn compile(routes: Vec<Route>) -> GatewayResult<Self> {
        let mut compiled = routes
            .into_iter()
            .map(CompiledRoute::compile)
            .collect::<GatewayResult<Vec<_>>>()?;

        compiled.sort_by(|a, b| {
            b.route
                .priority
                .cmp(&a.route.priority)
                .then(b.literal_count.cmp(&a.literal_count))
                .then(a.wildcard_count.cmp(&b.wildcard_count))
        });

        Ok(Self {
            routes: compiled.into_iter().map(Arc::new).collect(),
        })
    }

    /// Find the first route matching host, method, and path
    #[must_use]
    pub fn match_route(&self, method: &str, path: &str, host: Option<&str>) -> Option<RouteMatch> {
        for compiled in &self.routes {
            if !compiled.matches_method(method) {
                continue;
            }
            if !compiled.host.matches(host.unwrap_or_default()) {
                continue;
            }
            if let Some((params, wildcard_rest)) = compiled.match_path(path) {
                return Some(RouteMatch {
                    route: Arc::clone(compiled),
                    params,
                    wildcard_rest,
                });
            }
        }
        None
    }

    /// Number of compiled routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table holds no routes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Gateway-owned path prefixes that dynamic routes may never claim
#[derive(Debug, Clone, Default)]
pub struct ReservedPaths {
    prefixes: Vec<String>,
}

impl ReservedPaths {
    /// Build the reserved set from the built-in prefixes plus configured
    /// extras.
    #[must_use]
    pub fn with_extras(extras: &[String]) -> Self {
        let mut prefixes: Vec<String> = reserved_paths::BUILTIN
            .iter()
            .map(|p| (*p).to_owned())
            .collect();
        for extra in extras {
            let normalized = if extra.starts_with('/') {
                extra.clone()
            } else {
                format!("/{extra}")
            };
            let normalized = normalized.trim_end_matches('/').to_owned();
            if !normalized.is_empty() && !prefixes.contains(&normalized) {
                prefixes.push(normalized);
            }
        }
        Self { prefixes }
    }

    /// Whether a path belongs to the gateway's own control surface
    #[must_use]
    pub fn is_reserved(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Live route snapshot with atomic hot reload
///
/// This is also the narrow match capability handed to the ingress layer:
/// `match_route(method, path, host)` and nothing else.
#[derive(Debug)]
pub struct RouteService {
    table: RwLock<Arc<RouteTable>>,
    reserved: ReservedPaths,
}

impl RouteService {
    /// Create a service over an initial table
    #[must_use]
    pub fn new(table: RouteTable, reserved: ReservedPaths) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
            reserved,
        }
    }

    /// Match a request against the current snapshot. Reserved paths never
    /// match a dynamic route, regardless of priority.
    #[must_use]
    pub fn match_route(&self, method: &str, path: &str, host: Option<&str>) -> Option<RouteMatch> {
        if self.reserved.is_reserved(path) {
            return None;
        }
        self.snapshot().match_route(method, path, host)
    }

    /// Match only routes that may pre-empt built-in handler mounts:
    /// priority above zero, outside the reserved set.
    #[must_use]
    pub fn match_priority(
        &self,
        method: &str,
        path: &str,
        host: Option<&str>,
    ) -> Option<RouteMatch> {
        self.match_route(method, path, host)
            .filter(|m| m.route.route.priority > 0)
    }

    /// The reserved-path filter in effect
    #[must_use]
    pub const fn reserved(&self) -> &ReservedPaths {
        &self.reserved
    }

    /// Swap in a freshly compiled table. In-flight requests keep their
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first route compilation error; the current snapshot is
    /// left untouched on failure.
    pub fn replace(&self, routes: Vec<Route>) -> GatewayResult<()> {
        let table = Arc::new(RouteTable::compile(routes)?);
        match self.table.write() {
            Ok(mut guard) => {
                *guard = table;
                Ok(())
            }
            Err(_) => Err(GatewayError::internal("route table lock poisoned")),
        }
    }

    /// Current immutable snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table
            .read()
            .map(|guard| Arc::clone(&*guard))
            .unwrap_or_default()
    }
}
