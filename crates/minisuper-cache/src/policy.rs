//! # Route Policies
//!
//! Maps each intercepted request to a strategy and a store.
//!
//! ```text
//! ┌────────────────────┬──────────────────────────┬────────────────────┬─────────────────┐
//! │ route class        │ strategy                 │ cache              │ limits          │
//! ├────────────────────┼──────────────────────────┼────────────────────┼─────────────────┤
//! │ /api/*             │ network-first → cache    │ api-cache          │ 100 / 24 h      │
//! │                    │   → 503 offline JSON     │                    │ 2xx + opaque    │
//! │ /_next/static/*    │ cache-first              │ runtime-cache-v1   │ unbounded       │
//! │ navigation         │ network-first → cache    │ runtime-cache-v1   │ unbounded       │
//! │                    │   → "/" → offline page   │                    │                 │
//! │ any other http(s)  │ cache-first              │ offline-cache      │ 200 / 30 days   │
//! ├────────────────────┼──────────────────────────┴────────────────────┴─────────────────┤
//! │ non-GET, non-http  │ bypass: not intercepted                                        │
//! └────────────────────┴────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use crate::request::{CacheRequest, FetchResponse, Method};
use crate::store::Expiration;

// =============================================================================
// Cache Names & Precache Manifest
// =============================================================================

/// Precache generation. Bump to invalidate the installed shell.
pub const PRECACHE_NAME: &str = "minisupermercado-pwa-v1";
pub const RUNTIME_CACHE: &str = "runtime-cache-v1";
pub const OFFLINE_CACHE: &str = "offline-cache";
pub const API_CACHE: &str = "api-cache";

/// Caches that survive activation; everything else is an old generation.
pub const ALLOWED_CACHES: [&str; 4] = [PRECACHE_NAME, RUNTIME_CACHE, OFFLINE_CACHE, API_CACHE];

/// Routes stored on install.
pub const PRECACHE_ROUTES: [&str; 9] = [
    "/",
    "/login",
    "/dashboard",
    "/dashboard/products",
    "/dashboard/sales",
    "/dashboard/reports",
    "/manifest.json",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];

pub const API_PREFIX: &str = "/api/";
pub const STATIC_PREFIX: &str = "/_next/static/";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Policy Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Api,
    StaticAsset,
    Navigation,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
}

/// Which network responses may be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cacheable {
    Success,
    SuccessOrOpaque,
}

impl Cacheable {
    pub fn allows(self, response: &FetchResponse) -> bool {
        match self {
            Cacheable::Success => response.is_success(),
            Cacheable::SuccessOrOpaque => response.is_success() || response.is_opaque(),
        }
    }
}

/// What to answer with once network and cache both miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Propagate the network error.
    None,
    /// `503` JSON body with `offline: true`.
    OfflineJson,
    /// Cached `/`, then the built-in offline page.
    OfflinePage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    pub class: RouteClass,
    pub strategy: Strategy,
    pub cache_name: &'static str,
    pub expiration: Expiration,
    pub cacheable: Cacheable,
    pub fallback: Fallback,
}

// =============================================================================
// Policy Table
// =============================================================================

#[derive(Debug, Clone)]
pub struct PolicyTable {
    api: RoutePolicy,
    static_assets: RoutePolicy,
    navigation: RoutePolicy,
    generic: RoutePolicy,
}

impl Default for PolicyTable {
    fn default() -> Self {
        PolicyTable {
            api: RoutePolicy {
                class: RouteClass::Api,
                strategy: Strategy::NetworkFirst,
                cache_name: API_CACHE,
                expiration: Expiration::new(100, DAY),
                cacheable: Cacheable::SuccessOrOpaque,
                fallback: Fallback::OfflineJson,
            },
            static_assets: RoutePolicy {
                class: RouteClass::StaticAsset,
                strategy: Strategy::CacheFirst,
                cache_name: RUNTIME_CACHE,
                expiration: Expiration::unbounded(),
                cacheable: Cacheable::Success,
                fallback: Fallback::None,
            },
            navigation: RoutePolicy {
                class: RouteClass::Navigation,
                strategy: Strategy::NetworkFirst,
                cache_name: RUNTIME_CACHE,
                expiration: Expiration::unbounded(),
                cacheable: Cacheable::Success,
                fallback: Fallback::OfflinePage,
            },
            generic: RoutePolicy {
                class: RouteClass::Generic,
                strategy: Strategy::CacheFirst,
                cache_name: OFFLINE_CACHE,
                expiration: Expiration::new(200, 30 * DAY),
                cacheable: Cacheable::Success,
                fallback: Fallback::None,
            },
        }
    }
}

impl PolicyTable {
    /// `None` means the request is not intercepted.
    pub fn classify(&self, request: &CacheRequest) -> Option<&RoutePolicy> {
        if request.method != Method::GET || !request.is_http() {
            return None;
        }
        let path = request.path();
        let policy = if path.starts_with(API_PREFIX) {
            &self.api
        } else if path.starts_with(STATIC_PREFIX) {
            &self.static_assets
        } else if request.is_navigation() {
            &self.navigation
        } else {
            &self.generic
        };
        Some(policy)
    }

    pub fn policy(&self, class: RouteClass) -> &RoutePolicy {
        match class {
            RouteClass::Api => &self.api,
            RouteClass::StaticAsset => &self.static_assets,
            RouteClass::Navigation => &self.navigation,
            RouteClass::Generic => &self.generic,
        }
    }

    /// Replaces the policy for its route class.
    pub fn set(&mut self, policy: RoutePolicy) {
        let slot = match policy.class {
            RouteClass::Api => &mut self.api,
            RouteClass::StaticAsset => &mut self.static_assets,
            RouteClass::Navigation => &mut self.navigation,
            RouteClass::Generic => &mut self.generic,
        };
        *slot = policy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(request: CacheRequest) -> Option<RouteClass> {
        PolicyTable::default()
            .classify(&request)
            .map(|policy| policy.class)
    }

    #[test]
    fn test_route_classes() {
        let get = |path: &str| CacheRequest::get(&format!("http://localhost:3000{}", path)).unwrap();

        assert_eq!(classify(get("/api/products")), Some(RouteClass::Api));
        assert_eq!(classify(get("/_next/static/chunks/app.js")), Some(RouteClass::StaticAsset));
        assert_eq!(classify(get("/icons/icon-72x72.png")), Some(RouteClass::Generic));
        assert_eq!(
            classify(CacheRequest::navigate("http://localhost:3000/dashboard/sales").unwrap()),
            Some(RouteClass::Navigation)
        );
        // API wins over navigation mode.
        assert_eq!(
            classify(CacheRequest::navigate("http://localhost:3000/api/reports").unwrap()),
            Some(RouteClass::Api)
        );
    }

    #[test]
    fn test_writes_and_foreign_schemes_bypass() {
        let post = CacheRequest::get("http://localhost:3000/api/sales")
            .unwrap()
            .with_method(Method::POST);
        assert_eq!(classify(post), None);
        assert_eq!(
            classify(CacheRequest::get("chrome-extension://abc/icon.png").unwrap()),
            None
        );
    }

    #[test]
    fn test_default_limits() {
        let table = PolicyTable::default();
        let api = table.policy(RouteClass::Api);
        assert_eq!(api.cache_name, API_CACHE);
        assert_eq!(api.expiration.max_entries.map(|n| n.get()), Some(100));
        assert_eq!(api.expiration.max_age, Some(DAY));
        assert!(api.cacheable.allows(&FetchResponse::new(0, "")));
        assert!(!api.cacheable.allows(&FetchResponse::new(500, "")));

        let generic = table.policy(RouteClass::Generic);
        assert_eq!(generic.cache_name, OFFLINE_CACHE);
        assert_eq!(generic.expiration.max_entries.map(|n| n.get()), Some(200));
        assert_eq!(generic.expiration.max_age, Some(30 * DAY));
        assert!(!generic.cacheable.allows(&FetchResponse::new(0, "")));
    }

    #[test]
    fn test_set_replaces_by_class() {
        let mut table = PolicyTable::default();
        let mut api = table.policy(RouteClass::Api).clone();
        api.strategy = Strategy::CacheFirst;
        table.set(api);
        assert_eq!(table.policy(RouteClass::Api).strategy, Strategy::CacheFirst);
    }
}
