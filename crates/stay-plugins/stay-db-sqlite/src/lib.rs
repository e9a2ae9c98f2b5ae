//! # stay-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational
//! model and the `stay-core` domain models.
//!
//! Ledger claims are conditional upserts against the
//! `(property_id, unit_key, day)` primary key inside one transaction: a night
//! that is already taken makes its upsert change zero rows, and the whole
//! transaction is rolled back. The property-wide scope (`unit_key ''`) and the
//! unit scopes overlap, so once the upserts hold the write lock the claim also
//! looks for clashing rows in the other kind of scope. SQLite admits one
//! writer at a time, so the check and the write can never interleave with
//! another claim; waiting writers queue on the busy timeout.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use stay_core::dates::{DateKey, StayRange};
use stay_core::models::{
    AvailabilityDay, Booking, BookingId, BookingStatus, DayStatus, PaymentStatus,
    PriceBreakdown, PriceOverrides, PropertyListing,
};
use stay_core::refund::CancellationPolicy;
use stay_core::traits::{
    BookingRepo, ClaimKind, ClaimOutcome, LedgerClaim, LedgerStore, PropertyDirectory,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS properties (
        id TEXT PRIMARY KEY,
        host_id TEXT NOT NULL,
        max_guests INTEGER NOT NULL,
        base_price INTEGER NOT NULL CHECK (base_price >= 0),
        cleaning_fee INTEGER NOT NULL CHECK (cleaning_fee >= 0),
        currency TEXT NOT NULL,
        unit_ids TEXT NOT NULL DEFAULT '[]',
        cancellation_policy TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS price_overrides (
        property_id TEXT NOT NULL,
        day TEXT NOT NULL,
        price INTEGER NOT NULL CHECK (price >= 0),
        PRIMARY KEY (property_id, day)
    )
    "#,
    // Only blocked/booked days are stored; a missing row is available.
    // unit_key '' is the property-wide scope (NULLs would never collide).
    r#"
    CREATE TABLE IF NOT EXISTS availability_days (
        property_id TEXT NOT NULL,
        unit_key TEXT NOT NULL DEFAULT '',
        day TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('blocked', 'booked')),
        booking_id TEXT,
        reason TEXT,
        PRIMARY KEY (property_id, unit_key, day),
        CHECK ((status = 'booked') = (booking_id IS NOT NULL))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bookings (
        id TEXT PRIMARY KEY,
        property_id TEXT NOT NULL,
        unit_ids TEXT NOT NULL,
        guest_id TEXT NOT NULL,
        host_id TEXT NOT NULL,
        check_in TEXT NOT NULL,
        check_out TEXT NOT NULL,
        guests INTEGER NOT NULL,
        price_breakdown TEXT NOT NULL,
        status TEXT NOT NULL,
        payment_status TEXT NOT NULL,
        rejection_reason TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (check_out > check_in)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_availability_booking ON availability_days(booking_id)",
    "CREATE INDEX IF NOT EXISTS idx_bookings_property ON bookings(property_id)",
];

const RESERVE_NIGHT: &str = r#"
    INSERT INTO availability_days (property_id, unit_key, day, status, booking_id, reason)
    VALUES (?, ?, ?, 'booked', ?, NULL)
    ON CONFLICT(property_id, unit_key, day) DO UPDATE
        SET status = 'booked', booking_id = excluded.booking_id, reason = NULL
        WHERE availability_days.status = 'booked'
          AND availability_days.booking_id = excluded.booking_id
"#;

const BLOCK_NIGHT: &str = r#"
    INSERT INTO availability_days (property_id, unit_key, day, status, booking_id, reason)
    VALUES (?, ?, ?, 'blocked', NULL, ?)
    ON CONFLICT(property_id, unit_key, day) DO UPDATE
        SET reason = excluded.reason
        WHERE availability_days.status = 'blocked'
"#;

// Rows in scopes that overlap `unit_key` without being it: every unit for the
// property-wide key, the property-wide key for a unit.
const CROSS_SCOPE_RESERVE: &str = r#"
    SELECT DISTINCT day FROM availability_days
    WHERE property_id = ? AND day >= ? AND day < ?
      AND ((? = '' AND unit_key <> '') OR (? <> '' AND unit_key = ''))
      AND (status = 'blocked' OR booking_id <> ?)
"#;

const CROSS_SCOPE_BLOCK: &str = r#"
    SELECT DISTINCT day FROM availability_days
    WHERE property_id = ? AND day >= ? AND day < ?
      AND ((? = '' AND unit_key <> '') OR (? <> '' AND unit_key = ''))
      AND status = 'booked'
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SqliteStayRepo {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct DayRow {
    property_id: String,
    unit_key: String,
    day: String,
    status: String,
    booking_id: Option<String>,
    reason: Option<String>,
}

#[derive(FromRow)]
struct BookingRow {
    id: String,
    property_id: String,
    unit_ids: String,
    guest_id: String,
    host_id: String,
    check_in: String,
    check_out: String,
    guests: i64,
    price_breakdown: String,
    status: String,
    payment_status: String,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct PropertyRow {
    id: String,
    host_id: String,
    max_guests: i64,
    base_price: i64,
    cleaning_fee: i64,
    currency: String,
    unit_ids: String,
    cancellation_policy: String,
}

// Helpers for the scope column and id conversion
fn unit_key(unit_id: Option<&str>) -> &str {
    unit_id.unwrap_or("")
}

fn parse_uuid(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("corrupt uuid '{raw}'"))
}

fn parse_day(raw: &str) -> anyhow::Result<DateKey> {
    raw.parse::<DateKey>()
        .map_err(|e| anyhow::anyhow!("corrupt date '{raw}': {e}"))
}

fn parse_enum<T: FromStr<Err = stay_core::AppError>>(raw: &str) -> anyhow::Result<T> {
    raw.parse::<T>().map_err(|e| anyhow::anyhow!(e.to_string()))
}

impl TryFrom<DayRow> for AvailabilityDay {
    type Error = anyhow::Error;

    fn try_from(row: DayRow) -> anyhow::Result<Self> {
        Ok(AvailabilityDay {
            property_id: row.property_id,
            unit_id: (!row.unit_key.is_empty()).then_some(row.unit_key),
            day: parse_day(&row.day)?,
            status: parse_enum::<DayStatus>(&row.status)?,
            booking_id: row.booking_id.as_deref().map(parse_uuid).transpose()?,
            reason: row.reason,
        })
    }
}

impl TryFrom<BookingRow> for Booking {
    type Error = anyhow::Error;

    fn try_from(row: BookingRow) -> anyhow::Result<Self> {
        let price_breakdown: PriceBreakdown = serde_json::from_str(&row.price_breakdown)
            .with_context(|| format!("corrupt price breakdown on booking {}", row.id))?;
        Ok(Booking {
            id: parse_uuid(&row.id)?,
            property_id: row.property_id,
            unit_ids: serde_json::from_str(&row.unit_ids)?,
            guest_id: row.guest_id,
            host_id: row.host_id,
            check_in: parse_day(&row.check_in)?,
            check_out: parse_day(&row.check_out)?,
            guests: u32::try_from(row.guests)?,
            price_breakdown,
            status: parse_enum::<BookingStatus>(&row.status)?,
            payment_status: parse_enum::<PaymentStatus>(&row.payment_status)?,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<PropertyRow> for PropertyListing {
    type Error = anyhow::Error;

    fn try_from(row: PropertyRow) -> anyhow::Result<Self> {
        Ok(PropertyListing {
            id: row.id,
            host_id: row.host_id,
            max_guests: u32::try_from(row.max_guests)?,
            base_price: row.base_price,
            cleaning_fee: row.cleaning_fee,
            currency: row.currency,
            unit_ids: serde_json::from_str(&row.unit_ids)?,
            cancellation_policy: parse_enum::<CancellationPolicy>(&row.cancellation_policy)?,
        })
    }
}

impl SqliteStayRepo {
    /// Opens (creating if needed) the database at `url` and ensures the schema.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid sqlite url '{url}'"))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        // Every connection to `sqlite::memory:` is its own database, so keep
        // exactly one alive for the life of the pool.
        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 8 });
        if in_memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open {url}"))?;

        let repo = Self::from_pool(pool);
        repo.init_db().await?;
        info!("sqlite store ready at {url}");
        Ok(repo)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates tables and indexes if they don't exist.
    pub async fn init_db(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Listing CRUD lives elsewhere; this is how seeding and tests write listings.
    pub async fn upsert_listing(&self, listing: &PropertyListing) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO properties (id, host_id, max_guests, base_price, cleaning_fee, currency, unit_ids, cancellation_policy)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                host_id = excluded.host_id,
                max_guests = excluded.max_guests,
                base_price = excluded.base_price,
                cleaning_fee = excluded.cleaning_fee,
                currency = excluded.currency,
                unit_ids = excluded.unit_ids,
                cancellation_policy = excluded.cancellation_policy
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.host_id)
        .bind(i64::from(listing.max_guests))
        .bind(listing.base_price)
        .bind(listing.cleaning_fee)
        .bind(&listing.currency)
        .bind(serde_json::to_string(&listing.unit_ids)?)
        .bind(listing.cancellation_policy.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_price_override(&self, property_id: &str, day: DateKey, price: i64) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO price_overrides (property_id, day, price) VALUES (?, ?, ?)
             ON CONFLICT(property_id, day) DO UPDATE SET price = excluded.price",
        )
        .bind(property_id)
        .bind(day.to_string())
        .bind(price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteStayRepo {
    async fn days(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
    ) -> anyhow::Result<Vec<AvailabilityDay>> {
        let rows: Vec<DayRow> = sqlx::query_as(
            "SELECT property_id, unit_key, day, status, booking_id, reason FROM availability_days
             WHERE property_id = ? AND unit_key = ? AND day >= ? AND day < ?
             ORDER BY day",
        )
        .bind(property_id)
        .bind(unit_key(unit_id))
        .bind(range.check_in.to_string())
        .bind(range.check_out.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AvailabilityDay::try_from).collect()
    }

    async fn property_days(
        &self,
        property_id: &str,
        range: &StayRange,
    ) -> anyhow::Result<Vec<AvailabilityDay>> {
        let rows: Vec<DayRow> = sqlx::query_as(
            "SELECT property_id, unit_key, day, status, booking_id, reason FROM availability_days
             WHERE property_id = ? AND day >= ? AND day < ?
             ORDER BY day, unit_key",
        )
        .bind(property_id)
        .bind(range.check_in.to_string())
        .bind(range.check_out.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AvailabilityDay::try_from).collect()
    }

    /// All nights of all scopes in one transaction.
    ///
    /// # Developer Note
    /// Every night is attempted even after the first conflict so the caller
    /// learns the full set of taken nights; the rollback discards the rest.
    async fn claim(&self, claim: &LedgerClaim) -> anyhow::Result<ClaimOutcome> {
        if claim.unit_ids.iter().any(|u| u.as_deref() == Some("")) {
            bail!("unit ids must not be empty strings");
        }

        let mut tx = self.pool.begin().await?;
        let mut conflicts = Vec::new();

        for unit in &claim.unit_ids {
            for night in claim.range.nights() {
                let query = match &claim.kind {
                    ClaimKind::Reserve(booking_id) => sqlx::query(RESERVE_NIGHT)
                        .bind(&claim.property_id)
                        .bind(unit_key(unit.as_deref()))
                        .bind(night.to_string())
                        .bind(booking_id.to_string()),
                    ClaimKind::Block { reason } => sqlx::query(BLOCK_NIGHT)
                        .bind(&claim.property_id)
                        .bind(unit_key(unit.as_deref()))
                        .bind(night.to_string())
                        .bind(reason.as_str()),
                };
                if query.execute(&mut *tx).await?.rows_affected() == 0 {
                    conflicts.push(night);
                }
            }
        }

        for unit in &claim.unit_ids {
            let key = unit_key(unit.as_deref());
            let query = match &claim.kind {
                ClaimKind::Reserve(_) => sqlx::query_scalar::<sqlx::Sqlite, String>(CROSS_SCOPE_RESERVE),
                ClaimKind::Block { .. } => sqlx::query_scalar::<sqlx::Sqlite, String>(CROSS_SCOPE_BLOCK),
            }
            .bind(&claim.property_id)
            .bind(claim.range.check_in.to_string())
            .bind(claim.range.check_out.to_string())
            .bind(key)
            .bind(key);
            let query = match &claim.kind {
                ClaimKind::Reserve(booking_id) => query.bind(booking_id.to_string()),
                ClaimKind::Block { .. } => query,
            };
            for day in query.fetch_all(&mut *tx).await? {
                conflicts.push(parse_day(&day)?);
            }
        }

        if !conflicts.is_empty() {
            tx.rollback().await?;
            conflicts.sort();
            conflicts.dedup();
            debug!(
                "sqlite ledger: claim on {} {} conflicted on {} night(s)",
                claim.property_id,
                claim.range,
                conflicts.len()
            );
            return Ok(ClaimOutcome::Conflict(conflicts));
        }

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed)
    }

    async fn release(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
        booking_id: BookingId,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM availability_days
             WHERE property_id = ? AND unit_key = ? AND day >= ? AND day < ?
               AND status = 'booked' AND booking_id = ?",
        )
        .bind(property_id)
        .bind(unit_key(unit_id))
        .bind(range.check_in.to_string())
        .bind(range.check_out.to_string())
        .bind(booking_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn clear_blocks(
        &self,
        property_id: &str,
        unit_id: Option<&str>,
        range: &StayRange,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM availability_days
             WHERE property_id = ? AND unit_key = ? AND day >= ? AND day < ? AND status = 'blocked'",
        )
        .bind(property_id)
        .bind(unit_key(unit_id))
        .bind(range.check_in.to_string())
        .bind(range.check_out.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BookingRepo for SqliteStayRepo {
    async fn insert(&self, booking: &Booking) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, property_id, unit_ids, guest_id, host_id, check_in, check_out,
                                  guests, price_breakdown, status, payment_status, rejection_reason,
                                  created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(booking.id.to_string())
        .bind(&booking.property_id)
        .bind(serde_json::to_string(&booking.unit_ids)?)
        .bind(&booking.guest_id)
        .bind(&booking.host_id)
        .bind(booking.check_in.to_string())
        .bind(booking.check_out.to_string())
        .bind(i64::from(booking.guests))
        .bind(serde_json::to_string(&booking.price_breakdown)?)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(&booking.rejection_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert booking {}", booking.id))?;
        Ok(())
    }

    async fn get(&self, id: BookingId) -> anyhow::Result<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as("SELECT * FROM bookings WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn update_status(&self, expected: BookingStatus, booking: &Booking) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE bookings SET status = ?, payment_status = ?, rejection_reason = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(&booking.rejection_reason)
        .bind(booking.updated_at)
        .bind(booking.id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_for_property(&self, property_id: &str) -> anyhow::Result<Vec<Booking>> {
        let rows: Vec<BookingRow> =
            sqlx::query_as("SELECT * FROM bookings WHERE property_id = ? ORDER BY created_at ASC")
                .bind(property_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Booking::try_from).collect()
    }
}

#[async_trait]
impl PropertyDirectory for SqliteStayRepo {
    async fn listing(&self, property_id: &str) -> anyhow::Result<Option<PropertyListing>> {
        let row: Option<PropertyRow> = sqlx::query_as("SELECT * FROM properties WHERE id = ?")
            .bind(property_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PropertyListing::try_from).transpose()
    }

    async fn price_overrides(
        &self,
        property_id: &str,
        range: &StayRange,
    ) -> anyhow::Result<PriceOverrides> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT day, price FROM price_overrides WHERE property_id = ? AND day >= ? AND day < ?",
        )
        .bind(property_id)
        .bind(range.check_in.to_string())
        .bind(range.check_out.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(day, price)| Ok((parse_day(&day)?, price)))
            .collect()
    }
}
