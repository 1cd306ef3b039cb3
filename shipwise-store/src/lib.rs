pub mod app_config;
pub mod database;
pub mod events;
pub mod memory;
pub mod order_repo;
pub mod redis_repo;
pub mod shipment_repo;

pub use database::DbClient;
pub use events::EventProducer;
pub use memory::InMemoryStore;
pub use order_repo::StoreOrderRepository;
pub use redis_repo::RedisClient;
pub use shipment_repo::StoreShipmentRepository;
