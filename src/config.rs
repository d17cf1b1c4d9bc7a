// src/config.rs

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::watch;

use crate::{
    common::i18n::I18nStore,
    db::{
        ChatRepository, InventoryRepository, LogisticsRepository, OrdersRepository, SalesRepository,
        TenancyRepository, UserRepository,
    },
    middleware::rate_limit::RateLimiter,
    services::{
        auth::AuthService, chat_hub::ChatHub, chat_service::ChatService, document_service::DocumentService,
        inventory_service::InventoryService, logistics_service::LogisticsService, order_service::OrderService,
        sales_service::SalesService,
    },
};

const LOGIN_ATTEMPTS_PER_MINUTE: u32 = 5;
const CHAT_REQUESTS_PER_MINUTE: u32 = 120;

/// Configuração lida do ambiente (`.env` incluído).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub db_max_connections: u32,
    pub secret_key: String,
    pub session_lifetime_secs: i64,
    pub ratelimit_storage_url: String,
    pub max_content_mb: u64,
    pub bind_addr: SocketAddr,
    pub fonts_dir: String,
    pub default_locale: String,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                var("DB_USER", "postgres"),
                var("DB_PASSWORD", ""),
                var("DB_HOST", "localhost"),
                var("DB_PORT", "5432"),
                var("DB_NAME", "distribution"),
            ),
        };

        let secret_key = lookup("SECRET_KEY").context("SECRET_KEY deve ser definida")?;

        Ok(Self {
            database_url,
            db_max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            secret_key,
            session_lifetime_secs: parse(&lookup, "PERMANENT_SESSION_LIFETIME", 28_800)?,
            ratelimit_storage_url: var("RATELIMIT_STORAGE_URL", "memory://"),
            max_content_mb: parse(&lookup, "MAX_CONTENT_MB", 25)?,
            bind_addr: parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            fonts_dir: var("FONTS_DIR", "./fonts"),
            default_locale: var("DEFAULT_LOCALE", "fr"),
        })
    }

    pub fn max_body_bytes(&self) -> usize {
        usize::try_from(self.max_content_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} inválido ('{}'): {}", key, raw, e)),
        None => Ok(default),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub settings: Arc<Settings>,
    pub i18n_store: I18nStore,
    pub user_repo: UserRepository,
    pub tenancy_repo: TenancyRepository,
    pub auth_service: AuthService,
    pub inventory_service: InventoryService,
    pub logistics_service: LogisticsService,
    pub order_service: OrderService,
    pub sales_service: SalesService,
    pub chat_service: ChatService,
    pub document_service: DocumentService,
    pub login_limiter: RateLimiter,
    pub chat_limiter: RateLimiter,
    /// Vira `true` no desligamento; os streams abertos encerram ao ver a mudança.
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let db_pool = PgPoolOptions::new()
            .max_connections(settings.db_max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&settings.database_url)
            .await?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        let i18n_store = I18nStore::load(&settings.default_locale)?;

        if !settings.ratelimit_storage_url.starts_with("memory://") {
            tracing::warn!(
                url = %settings.ratelimit_storage_url,
                "Backend de rate limit não suportado, usando memória"
            );
        }

        // --- Monta o gráfico de dependências ---
        let user_repo = UserRepository::new(db_pool.clone());
        let tenancy_repo = TenancyRepository::new(db_pool.clone());
        let inventory_repo = InventoryRepository::new(db_pool.clone());
        let logistics_repo = LogisticsRepository::new(db_pool.clone());
        let orders_repo = OrdersRepository::new(db_pool.clone());
        let sales_repo = SalesRepository::new(db_pool.clone());
        let chat_repo = ChatRepository::new(db_pool.clone());

        let auth_service = AuthService::new(
            user_repo.clone(),
            settings.secret_key.clone(),
            settings.session_lifetime_secs,
            db_pool.clone(),
        );
        let inventory_service = InventoryService::new(inventory_repo.clone(), logistics_repo.clone());
        let logistics_service = LogisticsService::new(
            db_pool.clone(),
            logistics_repo,
            inventory_repo.clone(),
            tenancy_repo.clone(),
            inventory_service.clone(),
        );
        let order_service = OrderService::new(
            db_pool.clone(),
            orders_repo.clone(),
            inventory_repo.clone(),
            tenancy_repo.clone(),
            logistics_service.clone(),
            inventory_service.clone(),
        );
        let sales_service = SalesService::new(db_pool.clone(), sales_repo, orders_repo, inventory_repo, user_repo.clone());
        let chat_service = ChatService::new(db_pool.clone(), chat_repo, ChatHub::new(), settings.max_content_mb);
        let document_service = DocumentService::new(logistics_service.clone(), settings.fonts_dir.clone());

        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            db_pool,
            settings: Arc::new(settings),
            i18n_store,
            user_repo,
            tenancy_repo,
            auth_service,
            inventory_service,
            logistics_service,
            order_service,
            sales_service,
            chat_service,
            document_service,
            login_limiter: RateLimiter::per_minute("login", LOGIN_ATTEMPTS_PER_MINUTE),
            chat_limiter: RateLimiter::per_minute("chat", CHAT_REQUESTS_PER_MINUTE),
            shutdown: Arc::new(shutdown),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_applied() {
        let settings = Settings::from_lookup(lookup_from(&[("SECRET_KEY", "s3cr3t")])).expect("settings");
        assert_eq!(settings.database_url, "postgres://postgres:@localhost:5432/distribution");
        assert_eq!(settings.db_max_connections, 10);
        assert_eq!(settings.session_lifetime_secs, 28_800);
        assert_eq!(settings.max_content_mb, 25);
        assert_eq!(settings.max_body_bytes(), 25 * 1024 * 1024);
        assert_eq!(settings.bind_addr.port(), 3000);
        assert_eq!(settings.default_locale, "fr");
    }

    #[test]
    fn database_url_wins_over_parts() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("SECRET_KEY", "s3cr3t"),
            ("DATABASE_URL", "postgres://app:pw@db:5433/conakry"),
            ("DB_HOST", "ignored"),
        ]))
        .expect("settings");
        assert_eq!(settings.database_url, "postgres://app:pw@db:5433/conakry");
    }

    #[test]
    fn parts_build_the_url() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("SECRET_KEY", "s3cr3t"),
            ("DB_HOST", "db"),
            ("DB_USER", "app"),
            ("DB_PASSWORD", "pw"),
            ("DB_NAME", "stock"),
        ]))
        .expect("settings");
        assert_eq!(settings.database_url, "postgres://app:pw@db:5432/stock");
    }

    #[test]
    fn secret_key_is_required() {
        assert!(Settings::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn invalid_number_refuses_to_start() {
        let err = Settings::from_lookup(lookup_from(&[("SECRET_KEY", "s"), ("MAX_CONTENT_MB", "vingt")]))
            .expect_err("invalid");
        assert!(err.to_string().contains("MAX_CONTENT_MB"));
    }
}
