use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use shipwise_core::models::{
    Address, OrderStatus, Package, PaymentStatus, Shipment, TrackingEvent, FULFILLABLE_ORDER_STATUSES,
};
use shipwise_core::repository::{
    FulfillmentCommit, ShipmentFilter, ShipmentRepository, ShipmentWrite, Stamp, StoreResult, WriteOutcome,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;
use uuid::Uuid;

pub struct StoreShipmentRepository {
    pool: PgPool,
}

impl StoreShipmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ShipmentRow {
    id: Uuid,
    order_id: Uuid,
    carrier: String,
    service_type: String,
    tracking_number: String,
    status: String,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    estimated_delivery: Option<DateTime<Utc>>,
    tracking_url: Option<String>,
    recipient_name: String,
    destination: Json<Address>,
    package: Json<Package>,
    special_instructions: Option<String>,
    last_event_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShipmentRow> for Shipment {
    type Error = String;

    fn try_from(row: ShipmentRow) -> Result<Self, Self::Error> {
        Ok(Shipment {
            id: row.id,
            order_id: row.order_id,
            carrier: row.carrier,
            service_type: row.service_type,
            tracking_number: row.tracking_number,
            status: row.status.parse()?,
            shipped_at: row.shipped_at,
            delivered_at: row.delivered_at,
            estimated_delivery: row.estimated_delivery,
            tracking_url: row.tracking_url,
            recipient_name: row.recipient_name,
            destination: row.destination.0,
            package: row.package.0,
            special_instructions: row.special_instructions,
            last_event_at: row.last_event_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrackingEventRow {
    id: Uuid,
    shipment_id: Uuid,
    status: String,
    location: Option<String>,
    event_timestamp: DateTime<Utc>,
    description: String,
    delivery_attempt: Option<i32>,
    source: String,
    applied: bool,
    raw_payload: Value,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<TrackingEventRow> for TrackingEvent {
    type Error = String;

    fn try_from(row: TrackingEventRow) -> Result<Self, Self::Error> {
        Ok(TrackingEvent {
            id: row.id,
            shipment_id: row.shipment_id,
            status: row.status.parse()?,
            location: row.location,
            timestamp: row.event_timestamp,
            description: row.description,
            delivery_attempt: row.delivery_attempt,
            source: row.source.parse()?,
            applied: row.applied,
            raw_payload: row.raw_payload,
            recorded_at: row.recorded_at,
        })
    }
}

fn to_shipments(rows: Vec<ShipmentRow>) -> StoreResult<Vec<Shipment>> {
    Ok(rows.into_iter().map(Shipment::try_from).collect::<Result<Vec<_>, _>>()?)
}

async fn insert_event(tx: &mut Transaction<'_, Postgres>, event: &TrackingEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO tracking_events
            (id, shipment_id, status, location, event_timestamp, description, delivery_attempt, source, applied, raw_payload, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(event.id)
    .bind(event.shipment_id)
    .bind(event.status.as_str())
    .bind(&event.location)
    .bind(event.timestamp)
    .bind(&event.description)
    .bind(event.delivery_attempt)
    .bind(event.source.as_str())
    .bind(event.applied)
    .bind(&event.raw_payload)
    .bind(event.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ShipmentRepository for StoreShipmentRepository {
    async fn get_shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>> {
        let row = sqlx::query_as::<_, ShipmentRow>("SELECT * FROM shipments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Shipment::try_from).transpose()?)
    }

    async fn find_by_tracking_number(&self, tracking_number: &str) -> StoreResult<Option<Shipment>> {
        let row = sqlx::query_as::<_, ShipmentRow>("SELECT * FROM shipments WHERE tracking_number = $1")
            .bind(tracking_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Shipment::try_from).transpose()?)
    }

    async fn list_shipments(&self, filter: &ShipmentFilter) -> StoreResult<Vec<Shipment>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM shipments WHERE TRUE");
        if let Some(order_id) = filter.order_id {
            query.push(" AND order_id = ").push_bind(order_id);
        }
        if let Some(statuses) = &filter.statuses {
            let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            query.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(before) = filter.estimated_before {
            query.push(" AND estimated_delivery < ").push_bind(before);
        }
        query.push(" ORDER BY created_at DESC");

        let rows = query.build_query_as::<ShipmentRow>().fetch_all(&self.pool).await?;
        to_shipments(rows)
    }

    async fn list_tracking_events(&self, shipment_id: Uuid) -> StoreResult<Vec<TrackingEvent>> {
        let rows = sqlx::query_as::<_, TrackingEventRow>(
            "SELECT * FROM tracking_events WHERE shipment_id = $1 ORDER BY event_timestamp ASC, recorded_at ASC",
        )
        .bind(shipment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TrackingEvent::try_from).collect::<Result<Vec<_>, _>>()?)
    }

    async fn append_tracking_event(&self, event: &TrackingEvent) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_fulfillment(
        &self,
        shipment: &Shipment,
        event: &TrackingEvent,
        shipped_at: DateTime<Utc>,
    ) -> StoreResult<FulfillmentCommit> {
        let mut tx = self.pool.begin().await?;

        let fulfillable: Vec<String> = FULFILLABLE_ORDER_STATUSES.iter().map(|s| s.as_str().to_string()).collect();
        let claimed = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, fulfillment_status = 'FULFILLED', shipped_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = ANY($4) AND payment_status = $5
            "#,
        )
        .bind(shipment.order_id)
        .bind(OrderStatus::Shipped.as_str())
        .bind(shipped_at)
        .bind(&fulfillable)
        .bind(PaymentStatus::Completed.as_str())
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(order_id = %shipment.order_id, "Order no longer fulfillable, shipment not stored");
            return Ok(FulfillmentCommit::OrderNotEligible);
        }

        let row = sqlx::query_as::<_, ShipmentRow>(
            r#"
            INSERT INTO shipments
                (id, order_id, carrier, service_type, tracking_number, status, shipped_at, delivered_at,
                 estimated_delivery, tracking_url, recipient_name, destination, package, special_instructions,
                 last_event_at, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 1, $16, $17)
            RETURNING *
            "#,
        )
        .bind(shipment.id)
        .bind(shipment.order_id)
        .bind(&shipment.carrier)
        .bind(&shipment.service_type)
        .bind(&shipment.tracking_number)
        .bind(shipment.status.as_str())
        .bind(shipment.shipped_at)
        .bind(shipment.delivered_at)
        .bind(shipment.estimated_delivery)
        .bind(&shipment.tracking_url)
        .bind(&shipment.recipient_name)
        .bind(Json(&shipment.destination))
        .bind(Json(&shipment.package))
        .bind(&shipment.special_instructions)
        .bind(shipment.last_event_at)
        .bind(shipment.created_at)
        .bind(shipment.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        insert_event(&mut tx, event).await?;
        tx.commit().await?;

        Ok(FulfillmentCommit::Committed(Shipment::try_from(row)?))
    }

    async fn write_shipment(&self, write: ShipmentWrite) -> StoreResult<WriteOutcome> {
        let mut tx = self.pool.begin().await?;
        let s = &write.shipment;

        // carrier and tracking_number are never written after insert
        let updated = sqlx::query_as::<_, ShipmentRow>(
            r#"
            UPDATE shipments
            SET service_type = $3, status = $4, shipped_at = $5, delivered_at = $6, estimated_delivery = $7,
                tracking_url = $8, special_instructions = $9, last_event_at = $10, updated_at = $11,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(s.id)
        .bind(write.expected_version)
        .bind(&s.service_type)
        .bind(s.status.as_str())
        .bind(s.shipped_at)
        .bind(s.delivered_at)
        .bind(s.estimated_delivery)
        .bind(&s.tracking_url)
        .bind(&s.special_instructions)
        .bind(s.last_event_at)
        .bind(s.updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = updated else {
            let exists = sqlx::query("SELECT 1 FROM shipments WHERE id = $1")
                .bind(s.id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;
            return Ok(if exists { WriteOutcome::VersionConflict } else { WriteOutcome::NotFound });
        };

        if let Some(event) = &write.event {
            insert_event(&mut tx, event).await?;
        }

        if let Some(change) = &write.order_change {
            let (keep_delivered_at, delivered_at) = match change.delivered_at {
                Stamp::Keep => (true, None),
                Stamp::Set(ts) => (false, Some(ts)),
                Stamp::Clear => (false, None),
            };
            sqlx::query(
                r#"
                UPDATE orders
                SET status = $2,
                    fulfillment_status = COALESCE($3, fulfillment_status),
                    delivered_at = CASE WHEN $4 THEN delivered_at ELSE $5 END,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(change.order_id)
            .bind(change.status.as_str())
            .bind(change.fulfillment_status.map(|f| f.as_str()))
            .bind(keep_delivered_at)
            .bind(delivered_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(WriteOutcome::Applied(Shipment::try_from(row)?))
    }
}
