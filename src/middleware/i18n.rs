// src/middleware/i18n.rs

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::common::i18n::FALLBACK_LOCALE;

// Idioma das mensagens ao usuário, lido do Accept-Language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale(pub String);

impl Default for Locale {
    fn default() -> Self {
        Locale(FALLBACK_LOCALE.to_string())
    }
}

impl Locale {
    /// "pt-BR" -> "pt"; ausente ou ilegível -> idioma padrão.
    pub fn from_header(value: Option<&str>) -> Self {
        value
            .and_then(|header_str| {
                accept_language::parse(header_str)
                    .first()
                    .map(|tag| tag.split('-').next().unwrap_or(tag).to_lowercase())
            })
            .filter(|lang| !lang.is_empty())
            .map(Locale)
            .unwrap_or_default()
    }
}

impl<S> FromRequestParts<S> for Locale
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok());
        Ok(Locale::from_header(header_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_subtag_is_used() {
        assert_eq!(Locale::from_header(Some("en-US,en;q=0.9")).0, "en");
        assert_eq!(Locale::from_header(Some("fr-FR")).0, "fr");
    }

    #[test]
    fn missing_header_falls_back_to_french() {
        assert_eq!(Locale::from_header(None), Locale::default());
        assert_eq!(Locale::default().0, "fr");
    }
}
