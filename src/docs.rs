// src/docs.rs

use utoipa::OpenApi;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Auth ---
        handlers::auth::login,
        handlers::auth::me,

        // --- Referência ---
        handlers::tenancy::list_regions,
        handlers::tenancy::list_depots,
        handlers::tenancy::list_vehicles,
        handlers::tenancy::list_users,
        handlers::tenancy::list_stock_items,
        handlers::tenancy::list_teams,

        // --- Estoque ---
        handlers::inventory::stock_summary,
        handlers::inventory::stock_movements,
        handlers::inventory::create_transfer,
        handlers::inventory::create_adjustment,
        handlers::inventory::create_inventory_count,

        // --- Logística ---
        handlers::logistics::list_receptions,
        handlers::logistics::get_reception,
        handlers::logistics::create_reception,
        handlers::logistics::post_reception,
        handlers::logistics::cancel_reception,
        handlers::logistics::list_outgoings,
        handlers::logistics::get_outgoing,
        handlers::logistics::create_outgoing,
        handlers::logistics::post_outgoing,
        handlers::documents::outgoing_pdf,
        handlers::logistics::list_returns,
        handlers::logistics::get_return,
        handlers::logistics::create_return,

        // --- Pedidos ---
        handlers::orders::list_orders,
        handlers::orders::create_order,
        handlers::orders::get_order,
        handlers::orders::edit_order,
        handlers::orders::submit_order,
        handlers::orders::validate_order,
        handlers::orders::reject_order,
        handlers::orders::reject_client,
        handlers::orders::approve_client,
        handlers::orders::generate_outgoing,
        handlers::orders::loading_summary,

        // --- Vendas ---
        handlers::sales::orders_to_confirm,
        handlers::sales::confirm_sale,
        handlers::sales::list_sales,
        handlers::sales::cancel_sale,
        handlers::sales::list_objectives,
        handlers::sales::create_objective,
        handlers::sales::sales_progress,

        // --- Chat ---
        handlers::chat::list_rooms,
        handlers::chat::create_room,
        handlers::chat::list_messages,
        handlers::chat::send_message,
        handlers::chat::edit_message,
        handlers::chat::delete_message,
        handlers::chat::mark_room_read,
        handlers::chat::read_status,
        handlers::chat::search_room,
        handlers::chat::search_all,
        handlers::chat::chat_stats,
        handlers::stream::room_stream,
        handlers::stream::rooms_stream,
    ),
    components(
        schemas(
            // --- Auth ---
            models::auth::User,
            models::auth::LoginUserPayload,
            models::auth::AuthResponse,
            models::auth::UserProfile,

            // --- Referência ---
            models::tenancy::TeamType,
            models::tenancy::Region,
            models::tenancy::Depot,
            models::tenancy::Vehicle,
            models::tenancy::UserSummary,
            models::tenancy::CommercialTeam,

            // --- Estoque ---
            models::inventory::StockItem,
            models::inventory::ContainerRef,
            models::inventory::StockBalance,
            models::inventory::MovementType,
            models::inventory::StockMovement,
            models::inventory::StockShortfall,
            models::inventory::TransferPayload,
            models::inventory::AdjustmentPayload,
            models::inventory::InventoryCountPayload,

            // --- Logística ---
            models::logistics::DocumentStatus,
            models::logistics::Reception,
            models::logistics::DocumentLine,
            models::logistics::ReceptionDetail,
            models::logistics::StockOutgoing,
            models::logistics::OutgoingDetail,
            models::logistics::ReturnType,
            models::logistics::StockReturn,
            models::logistics::ReturnDetail,
            models::logistics::DocumentLinePayload,
            models::logistics::CreateReceptionPayload,
            models::logistics::CreateOutgoingPayload,
            models::logistics::CreateReturnPayload,

            // --- Pedidos ---
            models::orders::OrderStatus,
            models::orders::ClientStatus,
            models::orders::PaymentType,
            models::orders::CommercialOrder,
            models::orders::OrderListRow,
            models::orders::OrderClient,
            models::orders::OrderItem,
            models::orders::OrderClientDetail,
            models::orders::OrderDetail,
            models::orders::LoadingSummaryStatus,
            models::orders::LoadingSummary,
            models::orders::LoadingSummaryItem,
            models::orders::LoadingSummaryDetail,
            models::orders::ValidationOutcome,
            models::orders::OutgoingGeneration,
            models::orders::OrderItemPayload,
            models::orders::OrderClientPayload,
            models::orders::CreateOrderPayload,
            models::orders::ReasonPayload,
            models::orders::GenerateOutgoingPayload,
            handlers::orders::ValidationResponse,

            // --- Vendas ---
            models::sales::SaleStatus,
            models::sales::CommercialSale,
            models::sales::OrderToConfirm,
            models::sales::ConfirmSalePayload,
            models::sales::SalesObjective,
            models::sales::ObjectiveItemPayload,
            models::sales::CreateObjectivePayload,
            models::sales::ItemProgress,
            models::sales::ProgressReport,

            // --- Chat ---
            models::chat::RoomType,
            models::chat::MemberRole,
            models::chat::MessageType,
            models::chat::ChatRoom,
            models::chat::MessagePreview,
            models::chat::RoomListEntry,
            models::chat::ChatAttachment,
            models::chat::ReplyPreview,
            models::chat::ChatMessageView,
            models::chat::SearchHit,
            models::chat::ReadStatus,
            models::chat::ChatStats,
            models::chat::CreateRoomPayload,
            models::chat::AttachmentPayload,
            models::chat::SendMessagePayload,
            models::chat::EditMessagePayload,
            models::chat::ReadStatusPayload,
            handlers::chat::MarkReadResponse,
            handlers::chat::ReadStatusResponse,
        )
    ),
    tags(
        (name = "Auth", description = "Login e perfil do usuário"),
        (name = "Referência", description = "Regiões, depósitos, veículos, usuários, artigos e equipes"),
        (name = "Estoque", description = "Saldos, movimentos, transferências, ajustes e inventários"),
        (name = "Logística", description = "Recepções, saídas, devoluções e bons de livraison"),
        (name = "Pedidos", description = "Pedidos comerciais e fichas de carregamento"),
        (name = "Vendas", description = "Confirmação de vendas, objetivos e progresso"),
        (name = "Chat", description = "Salas, mensagens e streams em tempo real")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_jwt",
            SecurityScheme::Http(
                Http::new(HttpAuthScheme::Bearer)
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/auth/login",
            "/api/orders/{id}/generate-outgoing",
            "/api/sales/confirm/{id}",
            "/api/outgoings/{id}/pdf",
            "/api/chat/api/stream/rooms",
        ] {
            assert!(doc.paths.paths.contains_key(path), "rota ausente: {path}");
        }
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("api_jwt"));
    }
}
