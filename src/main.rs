//src/main.rs

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod common;
mod config;
mod db;
mod docs;
mod handlers;
mod middleware;
mod models;
mod services;

use crate::config::{AppState, Settings};
use crate::docs::ApiDoc;
use crate::middleware::{auth::auth_guard, rate_limit::chat_rate_limit};

#[tokio::main]
async fn main() {
    // .env é opcional: em produção as variáveis vêm do ambiente
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Se a configuração falhar, a aplicação não deve iniciar.
    let settings = Settings::from_env().expect("Configuração inválida");
    let bind_addr = settings.bind_addr;
    let body_limit = settings.max_body_bytes();

    let app_state = AppState::new(settings)
        .await
        .expect("Falha ao inicializar o estado da aplicação.");

    sqlx::migrate!()
        .run(&app_state.db_pool)
        .await
        .expect("Falha ao rodar as migrações do banco de dados.");

    tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

    // Login é público; /me exige token
    let auth_routes = Router::new()
        .route("/me", get(handlers::auth::me))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_guard,
        ))
        .route("/login", post(handlers::auth::login));

    let api_routes = Router::new()
        // Referência
        .route("/regions", get(handlers::tenancy::list_regions))
        .route("/depots", get(handlers::tenancy::list_depots))
        .route("/vehicles", get(handlers::tenancy::list_vehicles))
        .route("/users", get(handlers::tenancy::list_users))
        .route("/stock-items", get(handlers::tenancy::list_stock_items))
        .route("/teams", get(handlers::tenancy::list_teams))
        // Estoque
        .route("/stocks/summary", get(handlers::inventory::stock_summary))
        .route("/stocks/movements", get(handlers::inventory::stock_movements))
        .route("/stocks/transfers", post(handlers::inventory::create_transfer))
        .route("/stocks/adjustments", post(handlers::inventory::create_adjustment))
        .route("/stocks/inventory-counts", post(handlers::inventory::create_inventory_count))
        // Logística
        .route("/receptions"
               ,get(handlers::logistics::list_receptions)
               .post(handlers::logistics::create_reception)
        )
        .route("/receptions/{id}", get(handlers::logistics::get_reception))
        .route("/receptions/{id}/post", post(handlers::logistics::post_reception))
        .route("/receptions/{id}/cancel", post(handlers::logistics::cancel_reception))
        .route("/outgoings"
               ,get(handlers::logistics::list_outgoings)
               .post(handlers::logistics::create_outgoing)
        )
        .route("/outgoings/{id}", get(handlers::logistics::get_outgoing))
        .route("/outgoings/{id}/post", post(handlers::logistics::post_outgoing))
        .route("/outgoings/{id}/pdf", get(handlers::documents::outgoing_pdf))
        .route("/returns"
               ,get(handlers::logistics::list_returns)
               .post(handlers::logistics::create_return)
        )
        .route("/returns/{id}", get(handlers::logistics::get_return))
        // Pedidos
        .route("/orders"
               ,get(handlers::orders::list_orders)
               .post(handlers::orders::create_order)
        )
        .route("/orders/{id}"
               ,get(handlers::orders::get_order)
               .put(handlers::orders::edit_order)
        )
        .route("/orders/{id}/submit", post(handlers::orders::submit_order))
        .route("/orders/{id}/validate", post(handlers::orders::validate_order))
        .route("/orders/{id}/reject", post(handlers::orders::reject_order))
        .route("/orders/{id}/client/{client_id}/reject", post(handlers::orders::reject_client))
        .route("/orders/{id}/client/{client_id}/approve", post(handlers::orders::approve_client))
        .route("/orders/{id}/generate-outgoing", post(handlers::orders::generate_outgoing))
        .route("/orders/{id}/loading-summary", get(handlers::orders::loading_summary))
        // Vendas
        .route("/sales", get(handlers::sales::list_sales))
        .route("/sales/orders-to-confirm", get(handlers::sales::orders_to_confirm))
        .route("/sales/confirm/{id}", post(handlers::sales::confirm_sale))
        .route("/sales/{id}/cancel", post(handlers::sales::cancel_sale))
        .route("/sales/objectives"
               ,get(handlers::sales::list_objectives)
               .post(handlers::sales::create_objective)
        )
        .route("/sales/progress", get(handlers::sales::sales_progress))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_guard,
        ));

    // O limite por usuário roda depois do auth_guard (camada mais externa)
    let chat_routes = Router::new()
        .route("/rooms"
               ,get(handlers::chat::list_rooms)
               .post(handlers::chat::create_room)
        )
        .route("/rooms/{id}/messages"
               ,get(handlers::chat::list_messages)
               .post(handlers::chat::send_message)
        )
        .route("/rooms/{id}/read", post(handlers::chat::mark_room_read))
        .route("/rooms/{id}/search", get(handlers::chat::search_room))
        .route("/messages/read-status", post(handlers::chat::read_status))
        .route("/messages/{id}"
               ,patch(handlers::chat::edit_message)
               .delete(handlers::chat::delete_message)
        )
        .route("/search", get(handlers::chat::search_all))
        .route("/stats", get(handlers::chat::chat_stats))
        .route("/stream/rooms", get(handlers::stream::rooms_stream))
        .route("/stream/{room_id}", get(handlers::stream::room_stream))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            chat_rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_guard,
        ));

    let shutdown = app_state.shutdown.clone();

    // Combina tudo no router principal
    let app = Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .nest("/api/auth", auth_routes)
        .nest("/api/chat/api", chat_routes)
        .nest("/api", api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .expect("Falha ao iniciar o listener TCP");
    tracing::info!("🚀 Servidor escutando em {}", bind_addr);

    // ConnectInfo alimenta o limite de tentativas de login por IP
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .expect("Erro no servidor Axum");

    tracing::info!("👋 Servidor encerrado");
}

async fn shutdown_signal(shutdown: Arc<watch::Sender<bool>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Falha ao escutar Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Falha ao escutar SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("🛑 Sinal de desligamento recebido, fechando streams");
    // Streams abertos veem a mudança e encerram
    shutdown.send_replace(true);
}
