pub mod auth;
pub mod chat_hub;
pub mod chat_service;
pub mod document_service;
pub mod inventory_service;
pub mod logistics_service;
pub mod order_service;
pub mod sales_service;
