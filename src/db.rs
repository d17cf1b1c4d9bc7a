// src/db.rs

pub mod scope;
pub use scope::{Scope, ScopedEntity};
pub mod user_repo;
pub use user_repo::UserRepository;
pub mod tenancy_repo;
pub use tenancy_repo::TenancyRepository;
pub mod inventory_repo;
pub use inventory_repo::InventoryRepository;
pub mod logistics_repo;
pub use logistics_repo::LogisticsRepository;
pub mod orders_repo;
pub use orders_repo::{OrderVisibility, OrdersRepository};
pub mod sales_repo;
pub use sales_repo::SalesRepository;
pub mod chat_repo;
pub use chat_repo::ChatRepository;
