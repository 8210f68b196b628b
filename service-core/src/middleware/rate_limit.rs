use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;

/// Rate limiter keyed by client IP address.
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Build a keyed limiter allowing `attempts` requests per `window_seconds`,
/// replenished evenly across the window.
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    let attempts = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
    let window_ms = window_seconds.max(1) * 1000;
    let period = Duration::from_millis((window_ms / u64::from(attempts.get())).max(1));

    let quota = Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(attempts))
        .allow_burst(attempts);

    Arc::new(RateLimiter::dashmap(quota))
}

/// Middleware state: the keyed limiter plus the proxies whose
/// `x-forwarded-for` entries are believed.
#[derive(Clone)]
pub struct IpRateLimit {
    limiter: IpRateLimiter,
    trusted_proxies: Arc<Vec<IpAddr>>,
}

impl IpRateLimit {
    pub fn new(limiter: IpRateLimiter, trusted_proxies: Vec<IpAddr>) -> Self {
        Self {
            limiter,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    /// Drop keys whose quota has fully replenished. Returns the keys left.
    pub fn prune(&self) -> usize {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        self.limiter.len()
    }

    /// Prune on a fixed interval until the returned task is aborted.
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let limit = self.clone();
        let every = every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let remaining = limit.prune();
                tracing::debug!(remaining, "Pruned idle rate limit keys");
            }
        })
    }

    /// Resolve the caller IP from the socket peer. Forwarded entries are
    /// only read when the peer is a trusted proxy, walking right to left
    /// past other trusted hops.
    fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())?;

        if !self.trusted_proxies.contains(&peer) {
            return Some(peer);
        }

        let hops: Vec<&str> = request
            .headers()
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|s| s.split(','))
            .collect();

        for hop in hops.into_iter().rev() {
            match hop.trim().parse::<IpAddr>() {
                Ok(ip) if self.trusted_proxies.contains(&ip) => continue,
                Ok(ip) => return Some(ip),
                Err(_) => break,
            }
        }
        Some(peer)
    }
}

/// Middleware for IP-based rate limiting.
pub async fn ip_rate_limit_middleware(
    State(limit): State<IpRateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match limit.client_ip(&request) {
        Some(ip) => match limit.limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::warn!(ip = %ip, wait_secs = wait_time.as_secs(), "Rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs().max(1)),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use tower::util::ServiceExt;

    const PROXY: &str = "10.0.0.1";

    fn app(limit: IpRateLimit) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(limit, ip_rate_limit_middleware))
    }

    fn untrusted(attempts: u32) -> IpRateLimit {
        IpRateLimit::new(create_ip_rate_limiter(attempts, 60), Vec::new())
    }

    fn behind_proxy(attempts: u32) -> IpRateLimit {
        IpRateLimit::new(
            create_ip_rate_limiter(attempts, 60),
            vec![PROXY.parse().unwrap()],
        )
    }

    fn request(peer: &str, forwarded: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(xff) = forwarded {
            builder = builder.header("x-forwarded-for", xff);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        let addr = SocketAddr::new(peer.parse().unwrap(), 40000);
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    #[tokio::test]
    async fn rejects_after_burst_is_spent() {
        let app = app(untrusted(2));

        for _ in 0..2 {
            let res = app.clone().oneshot(request("10.1.1.1", None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(request("10.1.1.1", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key(axum::http::header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn limits_are_tracked_per_ip() {
        let app = app(untrusted(1));

        let res = app.clone().oneshot(request("10.1.1.1", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.clone().oneshot(request("10.2.2.2", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn forwarded_header_from_untrusted_peer_is_ignored() {
        let app = app(untrusted(1));

        let res = app
            .clone()
            .oneshot(request("10.1.1.1", Some("203.0.113.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(request("10.1.1.1", Some("203.0.113.2")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn trusted_proxy_forwards_client_address() {
        let app = app(behind_proxy(1));

        let res = app
            .clone()
            .oneshot(request(PROXY, Some("203.0.113.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(request(PROXY, Some("203.0.113.2")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(request(PROXY, Some("203.0.113.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn spoofed_leftmost_hop_behind_proxy_is_ignored() {
        let app = app(behind_proxy(1));

        let res = app
            .clone()
            .oneshot(request(PROXY, Some("198.51.100.7, 203.0.113.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(request(PROXY, Some("198.51.100.8, 203.0.113.1")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn unknown_ip_passes_through() {
        let app = app(untrusted(1));

        for _ in 0..3 {
            let res = app
                .clone()
                .oneshot(
                    HttpRequest::builder()
                        .uri("/")
                        .header("x-forwarded-for", "203.0.113.1")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn prune_drops_replenished_keys() {
        let limit = IpRateLimit::new(create_ip_rate_limiter(1000, 1), Vec::new());
        let app = app(limit.clone());

        let res = app.clone().oneshot(request("10.1.1.1", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(limit.limiter.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limit.prune(), 0);
    }

    #[tokio::test]
    async fn prune_keeps_keys_still_limited() {
        let limit = untrusted(1);
        let app = app(limit.clone());

        let res = app.clone().oneshot(request("10.1.1.1", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(limit.prune(), 1);
    }
}
