use shipwise_core::carrier::ShippingRate;
use shipwise_core::request::RateRequest;

/// One service a carrier sells
#[derive(Debug, Clone, Copy)]
pub struct ServiceLevel {
    pub code: &'static str,
    pub name: &'static str,
    pub transit_days: i64,
    /// Flat charge per consignment
    pub base: f64,
    /// Charge per chargeable kilogram
    pub per_kg: f64,
}

/// A carrier's published rate card
#[derive(Debug, Clone, Copy)]
pub struct Tariff {
    pub services: &'static [ServiceLevel],
    pub fuel_surcharge: f64,
    pub tax: f64,
    pub volumetric_divisor: f64,
    pub currency: &'static str,
}

impl Tariff {
    pub fn service(&self, code: &str) -> Option<&'static ServiceLevel> {
        self.services.iter().find(|s| s.code.eq_ignore_ascii_case(code.trim()))
    }

    pub fn service_codes(&self) -> Vec<&'static str> {
        self.services.iter().map(|s| s.code).collect()
    }

    /// Quote every service, or only the one named in the request.
    ///
    /// rate = base + per_kg * chargeable weight
    /// total = rate * (1 + fuel surcharge + tax)
    pub fn quote(&self, carrier: &str, request: &RateRequest) -> Vec<ShippingRate> {
        let weight = request.package.chargeable_weight(self.volumetric_divisor);

        self.services
            .iter()
            .filter(|s| match &request.service_type {
                Some(wanted) => s.code.eq_ignore_ascii_case(wanted.trim()),
                None => true,
            })
            .map(|s| {
                let rate = s.base + s.per_kg * weight;
                let total = rate * (1.0 + self.fuel_surcharge + self.tax);
                ShippingRate {
                    carrier: carrier.to_string(),
                    service_type: s.code.to_string(),
                    service_name: s.name.to_string(),
                    delivery_time: delivery_time(s.transit_days),
                    rate: round2(rate),
                    total_rate: round2(total),
                    currency: self.currency.to_string(),
                }
            })
            .collect()
    }
}

pub fn delivery_time(days: i64) -> String {
    if days == 1 {
        "1 business day".to_string()
    } else {
        format!("{} business days", days)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwise_core::models::{Dimensions, Package};

    const SERVICES: &[ServiceLevel] = &[
        ServiceLevel { code: "express", name: "Express", transit_days: 1, base: 100.0, per_kg: 50.0 },
        ServiceLevel { code: "ground", name: "Ground", transit_days: 4, base: 60.0, per_kg: 20.0 },
    ];

    const TARIFF: Tariff = Tariff {
        services: SERVICES,
        fuel_surcharge: 0.10,
        tax: 0.18,
        volumetric_divisor: 5000.0,
        currency: "INR",
    };

    fn request(service_type: Option<&str>) -> RateRequest {
        RateRequest {
            carrier: None,
            origin_postal_code: "400001".to_string(),
            destination_postal_code: "560001".to_string(),
            destination_country: "IN".to_string(),
            package: Package {
                weight: 1.5,
                dimensions: Dimensions { length: 20.0, width: 20.0, height: 10.0 },
                description: "Shoes".to_string(),
                value: 3000.0,
            },
            service_type: service_type.map(str::to_string),
        }
    }

    #[test]
    fn test_quote_all_services() {
        let rates = TARIFF.quote("test", &request(None));
        assert_eq!(rates.len(), 2);

        // 1.5 kg actual beats 0.8 kg volumetric
        let express = &rates[0];
        assert_eq!(express.rate, 175.0);
        assert_eq!(express.total_rate, 224.0);
        assert_eq!(express.delivery_time, "1 business day");
        assert_eq!(rates[1].delivery_time, "4 business days");
    }

    #[test]
    fn test_quote_filters_by_service() {
        let rates = TARIFF.quote("test", &request(Some("GROUND")));
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].service_type, "ground");
        assert!(TARIFF.quote("test", &request(Some("teleport"))).is_empty());
    }
}
