// src/middleware/rbac.rs

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use std::marker::PhantomData;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::i18n::Locale,
    models::auth::Principal,
};

/// 1. O Trait que define o que é uma Permissão
pub trait PermissionDef: Send + Sync + 'static {
    fn slug() -> &'static str;
}

/// 2. O Extractor (Guardião)
pub struct RequirePermission<T>(pub PhantomData<T>);

// 3. Implementação do FromRequestParts
impl<T, S> FromRequestParts<S> for RequirePermission<T>
where
    T: PermissionDef,
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let locale = Locale::from_request_parts(parts, state).await.unwrap_or_default();

        // A. Extrai o Principal
        let principal = parts
            .extensions
            .get::<Principal>()
            .ok_or_else(|| AppError::InvalidToken.to_api_error(&locale, &app_state.i18n_store))?;

        // B. Verifica na tabela de permissões do papel (já carregada pelo auth_guard)
        let required_perm = T::slug();
        if !principal.has_permission(required_perm) {
            tracing::warn!(user_id = principal.user_id, permission = required_perm, "Permissão negada");
            return Err(AppError::PermissionDenied(required_perm.to_string())
                .to_api_error(&locale, &app_state.i18n_store));
        }

        Ok(RequirePermission(PhantomData))
    }
}

// ---
// DEFINIÇÃO DAS PERMISSÕES (TIPOS)
// ---

macro_rules! permission {
    ($name:ident, $slug:literal) => {
        pub struct $name;
        impl PermissionDef for $name {
            fn slug() -> &'static str {
                $slug
            }
        }
    };
}

permission!(PermOrdersRead, "orders.read");
permission!(PermOrdersCreate, "orders.create");
permission!(PermOrdersUpdate, "orders.update");
permission!(PermOrdersValidate, "orders.validate");

permission!(PermReceptionsCreate, "receptions.create");
permission!(PermOutgoingsCreate, "outgoings.create");
permission!(PermReturnsCreate, "returns.create");

permission!(PermStocksRead, "stocks.read");
permission!(PermStocksTransfer, "stocks.transfer");
permission!(PermStocksAdjust, "stocks.adjust");
permission!(PermStocksInventory, "stocks.inventory");

permission!(PermSalesRead, "sales.read");
permission!(PermSalesConfirm, "sales.confirm");
permission!(PermSalesCancel, "sales.cancel");
permission!(PermSalesObjectives, "sales.objectives");

permission!(PermUsersRead, "users.read");

permission!(PermChatRead, "chat.read");
permission!(PermChatCreate, "chat.create");
permission!(PermChatUpdate, "chat.update");
permission!(PermChatDelete, "chat.delete");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_follow_module_action_format() {
        for slug in [
            PermOrdersValidate::slug(),
            PermOutgoingsCreate::slug(),
            PermSalesConfirm::slug(),
            PermChatDelete::slug(),
        ] {
            let (module, action) = slug.split_once('.').expect("module.action");
            assert!(!module.is_empty() && !action.is_empty());
        }
    }
}
