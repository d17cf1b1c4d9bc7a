// src/common/i18n.rs

use std::{collections::HashMap, sync::Arc, sync::OnceLock};

// Catálogos embutidos no binário: a lista de idiomas muda junto com o código.
const CATALOGS: &[(&str, &str)] = &[
    ("fr", include_str!("../../locales/fr.json")),
    ("en", include_str!("../../locales/en.json")),
];

pub const FALLBACK_LOCALE: &str = "fr";

type Catalog = HashMap<String, String>;

#[derive(Clone, Debug)]
pub struct I18nStore {
    catalogs: Arc<HashMap<String, Catalog>>,
    default_locale: String,
}

impl I18nStore {
    pub fn load(default_locale: &str) -> anyhow::Result<Self> {
        let mut catalogs = HashMap::new();
        for (lang, raw) in CATALOGS {
            let catalog: Catalog = serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("catálogo '{}' inválido: {}", lang, e))?;
            catalogs.insert(lang.to_string(), catalog);
        }

        if !catalogs.contains_key(default_locale) {
            anyhow::bail!("idioma padrão '{}' não possui catálogo", default_locale);
        }

        Ok(Self {
            catalogs: Arc::new(catalogs),
            default_locale: default_locale.to_string(),
        })
    }

    /// Instância usada quando o estado da aplicação não está disponível (middlewares).
    pub fn global_fallback() -> &'static I18nStore {
        static STORE: OnceLock<I18nStore> = OnceLock::new();
        STORE.get_or_init(|| {
            I18nStore::load(FALLBACK_LOCALE).unwrap_or_else(|_| I18nStore {
                catalogs: Arc::new(HashMap::new()),
                default_locale: FALLBACK_LOCALE.to_string(),
            })
        })
    }

    pub fn lookup(&self, lang: &str, key: &str) -> Option<String> {
        self.catalogs
            .get(lang)
            .and_then(|c| c.get(key))
            .or_else(|| self.catalogs.get(&self.default_locale).and_then(|c| c.get(key)))
            .cloned()
    }

    /// Traduz a chave; sem tradução devolve a própria chave.
    pub fn translate(&self, lang: &str, key: &str) -> String {
        self.lookup(lang, key).unwrap_or_else(|| key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_locale() {
        let store = I18nStore::load("fr").expect("catalogs");
        let fr = store.translate("fr", "error.not_found");
        assert_eq!(store.translate("pt", "error.not_found"), fr);
        assert_ne!(store.translate("en", "error.not_found"), fr);
    }

    #[test]
    fn unknown_key_is_returned_verbatim() {
        let store = I18nStore::load("en").expect("catalogs");
        assert_eq!(store.translate("en", "does.not.exist"), "does.not.exist");
    }

    #[test]
    fn every_french_key_has_an_english_translation() {
        let store = I18nStore::load("fr").expect("catalogs");
        let fr = &store.catalogs["fr"];
        let en = &store.catalogs["en"];
        let missing: Vec<_> = fr.keys().filter(|k| !en.contains_key(*k)).collect();
        assert!(missing.is_empty(), "missing en keys: {missing:?}");
    }

    #[test]
    fn domain_codes_are_translated() {
        let store = I18nStore::load("fr").expect("catalogs");
        for key in [
            "validation.container_exactly_one",
            "validation.order_not_pending",
            "validation.no_approved_clients",
            "validation.search_too_short",
            "conflict.duplicate_invoice",
            "warning.source_depot_out_of_region",
        ] {
            assert!(store.lookup("en", key).is_some(), "sem tradução: {key}");
        }
    }
}
