pub mod bluedart;
pub mod dhl;
pub mod fedex;
pub mod registry;
pub mod retry;
pub mod sandbox;
pub mod tariff;

pub use registry::{CarrierClient, CarrierRegistry};
pub use retry::{CallPolicy, RetryPolicy};
pub use sandbox::{Fault, SandboxLedger, SandboxStage};

#[cfg(test)]
pub(crate) mod testing {
    use shipwise_core::carrier::CarrierShipmentRequest;
    use shipwise_core::models::{Address, Dimensions, Package, Recipient};
    use shipwise_shared::Masked;
    use uuid::Uuid;

    pub fn booking(country: &str, postal_code: &str, service_type: &str) -> CarrierShipmentRequest {
        let city = match country {
            "IN" => "Bengaluru",
            "DE" => "Berlin",
            _ => "Austin",
        };
        CarrierShipmentRequest {
            order_id: Uuid::new_v4(),
            order_number: "ORD-2001".to_string(),
            recipient: Recipient {
                name: "Test Recipient".to_string(),
                phone: Masked::from("+919876543210"),
                email: Masked::from("recipient@example.com"),
            },
            shipping_address: Address {
                line1: "1 Test Street".to_string(),
                line2: None,
                city: city.to_string(),
                state: "ST".to_string(),
                postal_code: postal_code.to_string(),
                country: country.to_string(),
            },
            package: Package {
                weight: 2.0,
                dimensions: Dimensions { length: 30.0, width: 20.0, height: 15.0 },
                description: "Test parcel".to_string(),
                value: 1500.0,
            },
            service_type: service_type.to_string(),
            special_instructions: None,
        }
    }
}
