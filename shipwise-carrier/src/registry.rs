use serde_json::Value;
use shipwise_core::carrier::{CarrierAdapter, CarrierResponse, CarrierShipmentRequest, CarrierStatusUpdate};
use shipwise_core::request::RateRequest;
use shipwise_core::{CarrierFailure, CoreError, CoreResult, ShippingRate};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::bluedart::BlueDartAdapter;
use crate::dhl::DhlAdapter;
use crate::fedex::FedexAdapter;
use crate::retry::CallPolicy;
use crate::sandbox::SandboxLedger;

/// `Blue-Dart` and ` blue_dart ` both resolve to `blue_dart`.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

/// Read-only table of carrier integrations, built once at startup
pub struct CarrierRegistry {
    clients: BTreeMap<&'static str, CarrierClient>,
}

pub struct CarrierRegistryBuilder {
    adapters: Vec<Arc<dyn CarrierAdapter>>,
    policy: CallPolicy,
}

impl CarrierRegistryBuilder {
    pub fn register(mut self, adapter: Arc<dyn CarrierAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn call_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> CarrierRegistry {
        let policy = Arc::new(self.policy);
        let clients = self
            .adapters
            .into_iter()
            .map(|adapter| {
                let key = adapter.key();
                (key, CarrierClient { adapter, policy: policy.clone() })
            })
            .collect();
        CarrierRegistry { clients }
    }
}

impl CarrierRegistry {
    pub fn builder() -> CarrierRegistryBuilder {
        CarrierRegistryBuilder {
            adapters: Vec::new(),
            policy: CallPolicy::default(),
        }
    }

    /// The three sandbox-backed carriers, limited to `enabled` when it is non-empty.
    pub fn sandbox(ledger: Arc<SandboxLedger>, enabled: &[String], policy: CallPolicy) -> Self {
        let all: Vec<Arc<dyn CarrierAdapter>> = vec![
            Arc::new(BlueDartAdapter::new(ledger.clone())),
            Arc::new(FedexAdapter::new(ledger.clone())),
            Arc::new(DhlAdapter::new(ledger)),
        ];
        let wanted: Vec<String> = enabled.iter().map(|k| normalize_key(k)).collect();

        let mut builder = Self::builder().call_policy(policy);
        for adapter in all {
            if wanted.is_empty() || wanted.iter().any(|k| k == adapter.key()) {
                builder = builder.register(adapter);
            }
        }
        let registry = builder.build();
        info!(carriers = ?registry.keys(), "Carrier registry ready");
        registry
    }

    pub fn resolve(&self, key: &str) -> CoreResult<&CarrierClient> {
        self.clients
            .get(normalize_key(key).as_str())
            .ok_or_else(|| CoreError::UnsupportedCarrier(key.to_string()))
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.clients.keys().copied().collect()
    }

    pub fn clients(&self) -> impl Iterator<Item = &CarrierClient> {
        self.clients.values()
    }
}

/// An adapter behind the call policy, speaking `CoreError`.
///
/// Refusals (`success: false`) become `CarrierError { kind: Rejected }`;
/// callers only ever see successful responses.
#[derive(Clone)]
pub struct CarrierClient {
    adapter: Arc<dyn CarrierAdapter>,
    policy: Arc<CallPolicy>,
}

impl CarrierClient {
    pub fn key(&self) -> &'static str {
        self.adapter.key()
    }

    pub fn display_name(&self) -> &'static str {
        self.adapter.display_name()
    }

    fn accepted(&self, response: CarrierResponse) -> CoreResult<CarrierResponse> {
        if response.success {
            Ok(response)
        } else {
            Err(CoreError::CarrierError {
                carrier: self.key().to_string(),
                kind: CarrierFailure::Rejected,
                message: response.error_message(),
            })
        }
    }

    pub async fn create_shipment(&self, request: &CarrierShipmentRequest) -> CoreResult<CarrierResponse> {
        let response = self
            .policy
            .run(self.key(), "create_shipment", || self.adapter.create_shipment(request))
            .await?;
        let response = self.accepted(response)?;
        if response.tracking_number.as_deref().map_or(true, |n| n.trim().is_empty()) {
            return Err(CoreError::CarrierError {
                carrier: self.key().to_string(),
                kind: CarrierFailure::Transport,
                message: "booking accepted without a tracking number".to_string(),
            });
        }
        Ok(response)
    }

    pub async fn track_shipment(&self, tracking_number: &str) -> CoreResult<CarrierResponse> {
        let response = self
            .policy
            .run(self.key(), "track_shipment", || self.adapter.track_shipment(tracking_number))
            .await?;
        self.accepted(response)
    }

    pub async fn cancel_shipment(&self, tracking_number: &str) -> CoreResult<CarrierResponse> {
        let response = self
            .policy
            .run(self.key(), "cancel_shipment", || self.adapter.cancel_shipment(tracking_number))
            .await?;
        self.accepted(response)
    }

    pub async fn get_shipping_rates(&self, request: &RateRequest) -> CoreResult<Vec<ShippingRate>> {
        self.policy
            .run(self.key(), "get_shipping_rates", || self.adapter.get_shipping_rates(request))
            .await
    }

    pub fn parse_webhook(&self, payload: &Value) -> CoreResult<CarrierStatusUpdate> {
        self.adapter
            .parse_webhook(payload)
            .map_err(|reason| CoreError::ValidationError(vec![format!("{} webhook: {}", self.key(), reason)]))
    }
}
