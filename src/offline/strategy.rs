use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Method};
use serde::Serialize;

/// How the client's service worker should serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Hashed static assets: serve from cache, fetch only on a miss.
    CacheFirst,
    /// API reads: network with cache fallback.
    NetworkFirst,
    /// App routes: serve cached, refresh in the background.
    StaleWhileRevalidate,
    /// Credentials, mutations and the service worker itself.
    NetworkOnly,
}

impl CacheStrategy {
    pub fn cache_control(self) -> &'static str {
        match self {
            CacheStrategy::CacheFirst => "public, max-age=31536000, immutable",
            CacheStrategy::NetworkFirst => "no-cache",
            CacheStrategy::StaleWhileRevalidate => "public, max-age=0, stale-while-revalidate=86400",
            CacheStrategy::NetworkOnly => "no-store",
        }
    }
}

pub const CACHE_VERSION: &str = "irankhub-v1";

/// App shell routes precached at install.
pub const PRECACHE_ROUTES: &[&str] = &[
    "/",
    "/offline",
    "/dashboard",
    "/tournaments",
    "/notifications",
    "/manifest.json",
];

pub const PRECACHE_ASSETS: &[&str] = &[
    "/static/icons/icon-192.png",
    "/static/icons/icon-512.png",
    "/static/icons/badge-72.png",
];

const STATIC_PREFIXES: &[&str] = &["/static/", "/_app/immutable/", "/fonts/"];
const STATIC_EXTENSIONS: &[&str] = &[".js", ".css", ".png", ".jpg", ".svg", ".webp", ".woff2", ".ico"];
const NEVER_CACHE: &[&str] = &["/api/auth/", "/api/sync/", "/sw.js", "/sw-manifest.json"];

pub fn strategy_for(method: Method, path: &str) -> CacheStrategy {
    if method != Method::Get || NEVER_CACHE.iter().any(|p| path.starts_with(p)) {
        return CacheStrategy::NetworkOnly;
    }
    if path.starts_with("/api/") {
        return CacheStrategy::NetworkFirst;
    }
    if STATIC_PREFIXES.iter().any(|p| path.starts_with(p)) || STATIC_EXTENSIONS.iter().any(|e| path.ends_with(e)) {
        return CacheStrategy::CacheFirst;
    }
    CacheStrategy::StaleWhileRevalidate
}

/// Routing table and precache list for the service worker.
pub fn manifest() -> serde_json::Value {
    serde_json::json!({
        "version": CACHE_VERSION,
        "precache": PRECACHE_ROUTES.iter().chain(PRECACHE_ASSETS.iter()).collect::<Vec<_>>(),
        "offline_fallback": "/offline",
        "routes": [
            { "match": "prefix", "pattern": "/static/", "strategy": CacheStrategy::CacheFirst },
            { "match": "prefix", "pattern": "/api/auth/", "strategy": CacheStrategy::NetworkOnly },
            { "match": "prefix", "pattern": "/api/", "strategy": CacheStrategy::NetworkFirst },
            { "match": "navigate", "pattern": "/", "strategy": CacheStrategy::StaleWhileRevalidate },
        ],
    })
}

/// Sets Cache-Control from the request's strategy unless a route already did.
pub struct CacheStrategyHeaders;

#[rocket::async_trait]
impl Fairing for CacheStrategyHeaders {
    fn info(&self) -> Info {
        Info { name: "Offline Cache Strategy Headers", kind: Kind::Response }
    }

    async fn on_response<'r>(&self, req: &'r rocket::Request<'_>, res: &mut rocket::Response<'r>) {
        if res.headers().contains("Cache-Control") {
            return;
        }
        let strategy = strategy_for(req.method(), req.uri().path().as_str());
        res.set_header(Header::new("Cache-Control", strategy.cache_control()));
        if strategy == CacheStrategy::NetworkOnly {
            res.set_header(Header::new("Pragma", "no-cache"));
        }
    }
}
