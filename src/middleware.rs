pub mod auth;
pub mod i18n;
pub mod rate_limit;
pub mod rbac;
pub mod scope;
