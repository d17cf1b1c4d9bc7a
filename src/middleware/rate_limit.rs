// src/middleware/rate_limit.rs

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::i18n::Locale,
    models::auth::Principal,
};

const WINDOW: Duration = Duration::from_secs(60);
// Acima disso os baldes já cheios são descartados
const MAX_TRACKED_KEYS: usize = 10_000;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket em memória, um balde por chave (IP+usuário no login, usuário no chat).
#[derive(Clone)]
pub struct RateLimiter {
    scope: &'static str,
    capacity: f64,
    refill_per_sec: f64,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn per_minute(scope: &'static str, limit: u32) -> Self {
        let capacity = f64::from(limit.max(1));
        Self {
            scope,
            capacity,
            refill_per_sec: capacity / WINDOW.as_secs_f64(),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn check(&self, key: &str) -> Result<(), AppError> {
        if self.allow_at(key, Instant::now()).await {
            Ok(())
        } else {
            tracing::warn!(scope = self.scope, key, "Limite de requisições atingido");
            Err(AppError::RateLimited)
        }
    }

    async fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;

        if buckets.len() >= MAX_TRACKED_KEYS {
            buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) < WINDOW);
        }

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Limite por usuário nas rotas do chat. Roda depois do `auth_guard`.
pub async fn chat_rate_limit(
    State(app_state): State<AppState>,
    locale: Locale,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .extensions()
        .get::<Principal>()
        .map(|p| format!("user:{}", p.user_id))
        .unwrap_or_else(|| "anonymous".to_string());

    app_state
        .chat_limiter
        .check(&key)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sixth_login_attempt_in_a_minute_is_refused() {
        let limiter = RateLimiter::per_minute("login", 5);
        let t0 = Instant::now();
        for _ in 0..5 {
            assert!(limiter.allow_at("10.0.0.1|amadou", t0).await);
        }
        assert!(!limiter.allow_at("10.0.0.1|amadou", t0).await);
    }

    #[tokio::test]
    async fn bucket_refills_after_the_window() {
        let limiter = RateLimiter::per_minute("login", 5);
        let t0 = Instant::now();
        for _ in 0..5 {
            limiter.allow_at("k", t0).await;
        }
        assert!(!limiter.allow_at("k", t0 + Duration::from_secs(1)).await);
        assert!(limiter.allow_at("k", t0 + Duration::from_secs(61)).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::per_minute("chat", 1);
        let t0 = Instant::now();
        assert!(limiter.allow_at("user:1", t0).await);
        assert!(!limiter.allow_at("user:1", t0).await);
        assert!(limiter.allow_at("user:2", t0).await);
    }

    #[tokio::test]
    async fn check_maps_exhaustion_to_rate_limited() {
        let limiter = RateLimiter::per_minute("chat", 1);
        assert!(limiter.check("user:9").await.is_ok());
        assert!(matches!(limiter.check("user:9").await, Err(AppError::RateLimited)));
    }
}
