pub mod events;
pub mod pii;

pub use events::ShipmentEvent;
pub use pii::Masked;
