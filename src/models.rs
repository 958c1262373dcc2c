//! Domain models: users, functions, transactions, seat selections.
//!
//! State enums follow the same FSM conventions as the purchase coordinator:
//! explicit `is_terminal()` checks, string codes stable for persistence.

use base64::Engine as _;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core_types::{FilmId, FunctionId, SeatCode, TransactionId, UserId};

// ============================================================================
// Users
// ============================================================================

/// Customer tier drives the purchase discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerTier {
    Regular,
    Frequent,
    Premium,
}

impl CustomerTier {
    /// Discount in basis points applied to the whole purchase.
    #[inline]
    pub fn discount_bp(&self) -> u32 {
        match self {
            CustomerTier::Regular => 0,
            CustomerTier::Frequent => 1000,
            CustomerTier::Premium => 2000,
        }
    }
}

/// Registered user. The password hash never leaves the durable store layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub tier: CustomerTier,
    pub registered_at: DateTime<Utc>,
    pub active: bool,
}

impl User {
    pub fn new(email: String, name: String, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            password_hash,
            tier: CustomerTier::Regular,
            registered_at: Utc::now(),
            active: true,
        }
    }
}

// ============================================================================
// Functions (screenings)
// ============================================================================

/// Seat tier within a hall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatTier {
    Standard,
    Vip,
    Accessible,
}

/// One physical seat as configured in the hall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatDescriptor {
    pub row: char,
    pub number: u16,
    pub tier: SeatTier,
    /// Extra charge in minor units on top of the tier price.
    #[serde(default)]
    pub surcharge: i64,
}

impl SeatDescriptor {
    #[inline]
    pub fn code(&self) -> SeatCode {
        // Row/number always originate from a parsed or generated code
        SeatCode::parse(&format!("{}{}", self.row, self.number))
            .expect("hall seat descriptors carry valid codes")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HallTier {
    Standard,
    Vip,
    Imax,
    FourDx,
    DolbyAtmos,
}

/// Hall descriptor embedded in a function.
///
/// `seats_per_row` fixes the bitmap layout for that function; it is read
/// from here at every offset computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hall {
    pub id: String,
    pub name: String,
    pub tier: HallTier,
    pub rows: u16,
    pub seats_per_row: u16,
    pub capacity: u32,
    pub seats: Vec<SeatDescriptor>,
}

impl Hall {
    /// Build a rectangular hall with all-standard seats. Rows are labelled
    /// `A`, `B`, ... in order.
    pub fn grid(id: &str, name: &str, rows: u16, seats_per_row: u16) -> Self {
        let mut seats = Vec::with_capacity(rows as usize * seats_per_row as usize);
        for r in 0..rows {
            let row = (b'A' + r as u8) as char;
            for n in 1..=seats_per_row {
                seats.push(SeatDescriptor {
                    row,
                    number: n,
                    tier: SeatTier::Standard,
                    surcharge: 0,
                });
            }
        }
        Self {
            id: id.to_string(),
            name: name.to_string(),
            tier: HallTier::Standard,
            rows,
            seats_per_row,
            capacity: rows as u32 * seats_per_row as u32,
            seats,
        }
    }

    /// Look up a configured seat by code.
    pub fn seat(&self, code: &SeatCode) -> Option<&SeatDescriptor> {
        self.seats
            .iter()
            .find(|s| s.row == code.row() && s.number == code.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionState {
    Scheduled,
    Running,
    Finished,
    Cancelled,
}

impl FunctionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionState::Scheduled => "scheduled",
            FunctionState::Running => "running",
            FunctionState::Finished => "finished",
            FunctionState::Cancelled => "cancelled",
        }
    }
}

/// A scheduled showing of a film. Immutable after scheduling except for the
/// derived occupancy projection, which lives in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub film_id: FilmId,
    pub hall: Hall,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Base ticket price in minor units.
    pub base_price: i64,
    /// VIP seat price in minor units; falls back to base when absent.
    pub vip_price: Option<i64>,
    pub language: String,
    pub subtitles: bool,
    pub state: FunctionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Function {
    /// Sales close `grace` after the scheduled start.
    pub fn sales_closed(&self, now: DateTime<Utc>, grace: std::time::Duration) -> bool {
        let limit = self.starts_at
            + ChronoDuration::from_std(grace).unwrap_or_else(|_| ChronoDuration::seconds(0));
        now > limit || matches!(self.state, FunctionState::Finished | FunctionState::Cancelled)
    }

    /// Unit price for a configured seat, in minor units.
    pub fn unit_price(&self, seat: &SeatDescriptor) -> i64 {
        let tier_price = match seat.tier {
            SeatTier::Vip => self.vip_price.unwrap_or(self.base_price),
            SeatTier::Standard | SeatTier::Accessible => self.base_price,
        };
        tier_price + seat.surcharge
    }
}

// ============================================================================
// Seat map projection
// ============================================================================

/// Point-in-time state of one seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatState {
    Free,
    Held,
    Sold,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatMapEntry {
    pub code: SeatCode,
    pub row: char,
    pub number: u16,
    pub tier: SeatTier,
    pub state: SeatState,
}

/// Aggregate occupancy counts for a function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occupancy {
    pub occupied: u32,
    pub available: u32,
    pub capacity: u32,
    pub percent: f64,
}

impl Occupancy {
    pub fn from_counts(occupied: u32, capacity: u32) -> Self {
        let percent = if capacity > 0 {
            (occupied as f64 / capacity as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        Self {
            occupied,
            available: capacity.saturating_sub(occupied),
            capacity,
            percent,
        }
    }
}

/// Full seat grid snapshot returned by the inventory service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatMap {
    pub function_id: FunctionId,
    pub seats: Vec<SeatMapEntry>,
    pub occupancy: Occupancy,
}

// ============================================================================
// Hold records (cache-resident)
// ============================================================================

/// Value stored under `hold:{function}:{seat}`; the key's TTL is the hold
/// window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldEntry {
    pub user: UserId,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Selections (durable mirror of holds)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStatus {
    Temporary,
    Confirmed,
    Cancelled,
    Expired,
}

impl SelectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStatus::Temporary => "temporary",
            SelectionStatus::Confirmed => "confirmed",
            SelectionStatus::Cancelled => "cancelled",
            SelectionStatus::Expired => "expired",
        }
    }
}

/// Durable mirror of a hold, kept for audit and for `rebuild`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub id: Uuid,
    pub function_id: FunctionId,
    pub user_id: UserId,
    pub seat: SeatCode,
    pub status: SelectionStatus,
    pub selected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Selection {
    pub fn temporary(
        function_id: FunctionId,
        user_id: UserId,
        seat: SeatCode,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            function_id,
            user_id,
            seat,
            status: SelectionStatus::Temporary,
            selected_at: Utc::now(),
            expires_at,
            confirmed_at: None,
            cancelled_at: None,
        }
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Cash,
    Transfer,
    Points,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Processing,
    Confirmed,
    Failed,
    Refunded,
    Cancelled,
}

impl TransactionState {
    /// Terminal states admit no further transitions.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Confirmed
                | TransactionState::Failed
                | TransactionState::Refunded
                | TransactionState::Cancelled
        )
    }

    /// Owner-initiated cancellation is allowed pre-payment only.
    #[inline]
    pub fn cancellable(&self) -> bool {
        matches!(self, TransactionState::Pending | TransactionState::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Processing => "processing",
            TransactionState::Confirmed => "confirmed",
            TransactionState::Failed => "failed",
            TransactionState::Refunded => "refunded",
            TransactionState::Cancelled => "cancelled",
        }
    }
}

/// One seat line item on a transaction. Prices in minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatLine {
    pub code: SeatCode,
    pub row: char,
    pub number: u16,
    pub tier: SeatTier,
    pub unit_price: i64,
    /// Combined customer + promo discount in basis points.
    pub applied_discount_bp: u32,
    pub final_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetail {
    pub method: PaymentMethod,
    pub external_ref: Option<String>,
    pub last4: Option<String>,
    pub issuer: Option<String>,
    pub auth_code: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PaymentDetail {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            external_ref: None,
            last4: None,
            issuer: None,
            auth_code: None,
            processed_at: None,
        }
    }
}

/// Request audit fields (origin IP, agent, sales channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditInfo {
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default = "AuditInfo::default_channel")]
    pub channel: String,
}

impl AuditInfo {
    fn default_channel() -> String {
        "web".to_string()
    }
}

impl Default for AuditInfo {
    fn default() -> Self {
        Self {
            origin_ip: None,
            user_agent: None,
            channel: Self::default_channel(),
        }
    }
}

/// A purchase transaction. Created in `processing` by the coordinator and
/// driven to a terminal state by payment resolution, cancellation, or the
/// reaper's checkout-window sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub invoice: String,
    pub user_id: UserId,
    pub function_id: FunctionId,
    pub film_id: FilmId,
    pub seats: Vec<SeatLine>,
    pub subtotal: i64,
    pub customer_discount_bp: u32,
    pub promo_discount_bp: u32,
    pub tax: i64,
    pub total: i64,
    pub payment: PaymentDetail,
    pub state: TransactionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub qr_payload: Option<String>,
    #[serde(default)]
    pub audit: AuditInfo,
}

impl Transaction {
    /// Unique invoice number: `CIN-{yyyymmddHHMMSS}-{8HEX}`.
    ///
    /// The hex suffix is the first 8 hex digits of the transaction UUID, so
    /// the pair `(created_at, id)` and the invoice determine each other.
    pub fn invoice_number(created_at: DateTime<Utc>, id: TransactionId) -> String {
        let ts = created_at.format("%Y%m%d%H%M%S");
        let hex8 = id.simple().to_string()[..8].to_uppercase();
        format!("CIN-{ts}-{hex8}")
    }

    pub fn mark_confirmed(&mut self, auth_code: Option<String>) {
        let now = Utc::now();
        self.state = TransactionState::Confirmed;
        self.confirmed_at = Some(now);
        self.updated_at = now;
        self.payment.processed_at = Some(now);
        self.payment.auth_code = auth_code;
        self.qr_payload = Some(self.build_qr_payload());
    }

    pub fn mark_failed(&mut self) {
        self.state = TransactionState::Failed;
        self.updated_at = Utc::now();
    }

    pub fn mark_cancelled(&mut self) {
        self.state = TransactionState::Cancelled;
        self.updated_at = Utc::now();
    }

    /// Opaque payload encoded into the ticket QR.
    fn build_qr_payload(&self) -> String {
        let raw = format!("{}:{}", self.invoice, self.id);
        base64::engine::general_purpose::STANDARD.encode(raw)
    }

    pub fn seat_codes(&self) -> Vec<SeatCode> {
        self.seats.iter().map(|line| line.code).collect()
    }
}
