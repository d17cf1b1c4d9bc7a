// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{common::i18n::I18nStore, middleware::i18n::Locale, models::inventory::StockShortfall};

// Códigos SQLSTATE que indicam conflito de concorrência (a transação pode ser repetida)
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Campo inválido '{field}': {code}")]
    InvalidField { field: &'static str, code: &'static str },

    #[error("Credenciais inválidas")]
    InvalidCredentials,

    #[error("Token inválido")]
    InvalidToken,

    #[error("Permissão negada: {0}")]
    PermissionDenied(String),

    #[error("Recurso não encontrado: {0}")]
    ResourceNotFound(&'static str),

    #[error("Estoque insuficiente para {} item(ns)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    #[error("Conflito: {0}")]
    Conflict(&'static str),

    #[error("Limite de requisições atingido")]
    RateLimited,

    #[error("Erro de banco de dados: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro interno do servidor: {0}")]
    InternalServerError(#[from] anyhow::Error),

    #[error("Erro de Bcrypt: {0}")]
    BcryptError(#[from] bcrypt::BcryptError),

    #[error("Erro de JWT: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

/// Erro já traduzido, pronto para virar resposta HTTP.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.error,
            "details": self.details.unwrap_or(Value::Null),
        }));
        (self.status, body).into_response()
    }
}

impl AppError {
    pub fn invalid(field: &'static str, code: &'static str) -> Self {
        AppError::InvalidField { field, code }
    }

    /// Falha de serialização/deadlock do Postgres: a transação inteira pode ser repetida.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::DatabaseError(sqlx::Error::Database(db_err)) => matches!(
                db_err.code().as_deref(),
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
            ),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::InvalidField { .. } => "ValidationError",
            AppError::InvalidCredentials | AppError::InvalidToken | AppError::JwtError(_) => {
                "Unauthorized"
            }
            AppError::PermissionDenied(_) => "PermissionDenied",
            AppError::ResourceNotFound(_) => "NotFound",
            AppError::InsufficientStock(_) => "InsufficientStock",
            AppError::Conflict(_) => "Conflict",
            AppError::RateLimited => "RateLimited",
            e if e.is_retryable() => "Conflict",
            _ => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            "ValidationError" => StatusCode::BAD_REQUEST,
            "Unauthorized" => StatusCode::UNAUTHORIZED,
            "PermissionDenied" => StatusCode::FORBIDDEN,
            "NotFound" => StatusCode::NOT_FOUND,
            "InsufficientStock" | "Conflict" => StatusCode::CONFLICT,
            "RateLimited" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message_key(&self) -> String {
        match self {
            AppError::ValidationError(_) => "error.validation".into(),
            AppError::InvalidField { code, .. } => format!("validation.{code}"),
            AppError::InvalidCredentials => "error.invalid_credentials".into(),
            AppError::InvalidToken | AppError::JwtError(_) => "error.invalid_token".into(),
            AppError::PermissionDenied(_) => "error.permission_denied".into(),
            AppError::ResourceNotFound(_) => "error.not_found".into(),
            AppError::InsufficientStock(_) => "error.insufficient_stock".into(),
            AppError::Conflict(code) => format!("conflict.{code}"),
            AppError::RateLimited => "error.rate_limited".into(),
            e if e.is_retryable() => "conflict.concurrent_update".into(),
            _ => "error.internal".into(),
        }
    }

    /// Traduz o erro para o idioma do cliente e monta o corpo `{error, details}`.
    pub fn to_api_error(&self, locale: &Locale, store: &I18nStore) -> ApiError {
        let status = self.status();
        let lang = locale.0.as_str();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(kind = self.kind(), "Erro Interno do Servidor: {}", self);
            }
            StatusCode::CONFLICT => tracing::warn!(kind = self.kind(), "{}", self),
            _ => {}
        }

        let mut details = json!({ "kind": self.kind() });
        match self {
            AppError::ValidationError(errors) => {
                let mut fields = serde_json::Map::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<Value> = field_errors
                        .iter()
                        .map(|e| {
                            let key = format!("validation.{}", e.code);
                            let text = store.lookup(lang, &key).or_else(|| {
                                e.message.as_ref().map(|m| m.to_string())
                            });
                            Value::String(text.unwrap_or_else(|| e.code.to_string()))
                        })
                        .collect();
                    fields.insert(field.to_string(), Value::Array(messages));
                }
                details["fields"] = Value::Object(fields);
            }
            AppError::InvalidField { field, code } => {
                details["field"] = json!(field);
                details["message"] = json!(store.translate(lang, &format!("validation.{code}")));
            }
            AppError::ResourceNotFound(entity) => details["entity"] = json!(entity),
            AppError::PermissionDenied(permission) => details["permission"] = json!(permission),
            AppError::InsufficientStock(shortfalls) => details["shortfalls"] = json!(shortfalls),
            _ => {}
        }

        ApiError {
            status,
            error: store.translate(lang, &self.message_key()),
            details: Some(details),
        }
    }
}

// Usado pelos middlewares, que não têm acesso ao idioma do cliente.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_api_error(&Locale::default(), I18nStore::global_fallback())
            .into_response()
    }
}

/// Converte violação de unicidade em `Conflict`, mantendo os demais erros.
pub fn map_unique_violation(e: sqlx::Error, code: &'static str) -> AppError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return AppError::Conflict(code);
        }
    }
    e.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn status_follows_error_kind() {
        assert_eq!(AppError::ResourceNotFound("order").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::PermissionDenied("orders.validate".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::invalid("reason", "required").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Conflict("duplicate_reference").status(), StatusCode::CONFLICT);
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::InsufficientStock(vec![]).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::InternalServerError(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn insufficient_stock_lists_every_shortfall() {
        let store = I18nStore::global_fallback();
        let err = AppError::InsufficientStock(vec![StockShortfall::new(
            1,
            "Riz 50kg".into(),
            Decimal::from(30),
            Decimal::from(25),
        )]);

        let api = err.to_api_error(&Locale("fr".into()), store);
        let details = api.details.expect("details");

        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(details["kind"], "InsufficientStock");
        assert_eq!(details["shortfalls"][0]["stock_item_id"], 1);
        assert_eq!(details["shortfalls"][0]["missing"], 5.0);
    }

    #[test]
    fn invalid_field_carries_field_name() {
        let store = I18nStore::global_fallback();
        let api = AppError::invalid("reason", "reason_required").to_api_error(&Locale("en".into()), store);
        let details = api.details.expect("details");
        assert_eq!(details["field"], "reason");
        assert_eq!(details["kind"], "ValidationError");
    }
}
