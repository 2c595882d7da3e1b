use crate::{entities::coupon, errors::ServiceError};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Result of applying a coupon to an amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouponDiscount {
    pub discount: Decimal,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCouponInput {
    pub code: String,
    /// Percent, 0 to 100
    pub discount: Decimal,
    #[serde(deserialize_with = "deserialize_valid_till")]
    pub valid_till: DateTime<Utc>,
    #[serde(default)]
    pub min_amount: Decimal,
    pub max_discount: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCouponInput {
    pub code: Option<String>,
    pub discount: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_optional_valid_till")]
    pub valid_till: Option<DateTime<Utc>>,
    pub min_amount: Option<Decimal>,
    pub max_discount: Option<Decimal>,
}

/// Accepts RFC 3339 timestamps or bare dates; a bare date is valid through the end of that day (UTC).
pub fn parse_valid_till(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
}

fn deserialize_valid_till<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_valid_till(&raw)
        .ok_or_else(|| serde::de::Error::custom("validTill must be a date or RFC 3339 timestamp"))
}

fn deserialize_optional_valid_till<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_valid_till(&raw).map(Some).ok_or_else(|| {
            serde::de::Error::custom("validTill must be a date or RFC 3339 timestamp")
        }),
        None => Ok(None),
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn currency_symbol(currency: Option<&str>) -> String {
    match currency.map(str::to_ascii_uppercase).as_deref() {
        None | Some("INR") => "₹".to_string(),
        Some("USD") => "$".to_string(),
        Some("EUR") => "€".to_string(),
        Some("GBP") => "£".to_string(),
        Some(other) => format!("{} ", other),
    }
}

fn validate_terms(
    discount: Decimal,
    min_amount: Decimal,
    max_discount: Decimal,
) -> Result<(), ServiceError> {
    if discount < Decimal::ZERO || discount > HUNDRED {
        return Err(ServiceError::ValidationError(
            "discount must be a percentage between 0 and 100".to_string(),
        ));
    }
    if min_amount < Decimal::ZERO || max_discount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "minAmount and maxDiscount must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// Applies coupon terms to `amount` at time `now`.
///
/// The discount is `discount% × amount`, capped at `max_discount` and
/// rounded half away from zero to two places.
pub fn compute_discount(
    coupon: &coupon::Model,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<Decimal, ServiceError> {
    if coupon.valid_till < now {
        return Err(ServiceError::BadRequest("Coupon expired".to_string()));
    }
    if amount < coupon.min_amount {
        return Err(ServiceError::BadRequest(
            "Minimum amount not met for this coupon".to_string(),
        ));
    }

    let raw = coupon.discount / HUNDRED * amount;
    Ok(raw
        .min(coupon.max_discount)
        .min(amount)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

fn map_unique_violation(err: DbErr, code: &str) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            ServiceError::Conflict(format!("Coupon code {} already exists", code))
        }
        _ => ServiceError::DatabaseError(err),
    }
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub(crate) async fn find_by_code<C>(
        conn: &C,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(conn)
            .await?)
    }

    /// Looks up `code` and evaluates it against `amount`.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        amount: Decimal,
        currency: Option<&str>,
    ) -> Result<CouponDiscount, ServiceError> {
        let coupon = Self::find_by_code(&*self.db, code)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Invalid coupon code".to_string()))?;

        let discount = compute_discount(&coupon, amount, Utc::now())?;
        Ok(CouponDiscount {
            discount,
            message: format!(
                "Coupon applied. You saved {}{:.2}",
                currency_symbol(currency),
                discount
            ),
        })
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreateCouponInput) -> Result<coupon::Model, ServiceError> {
        let code = normalize_code(&input.code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "code must not be empty".to_string(),
            ));
        }
        validate_terms(input.discount, input.min_amount, input.max_discount)?;

        if Self::find_by_code(&*self.db, &code).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let created = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            discount: Set(input.discount),
            valid_till: Set(input.valid_till),
            min_amount: Set(input.min_amount),
            max_discount: Set(input.max_discount),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| map_unique_violation(e, &code))?;

        info!(coupon_id = %created.id, code = %created.code, "Created coupon");
        Ok(created)
    }

    /// All coupons, newest first.
    pub async fn list(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<coupon::Model, ServiceError> {
        coupon::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Coupon not found".to_string()))
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        id: Uuid,
        input: UpdateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        let existing = self.get(id).await?;
        validate_terms(
            input.discount.unwrap_or(existing.discount),
            input.min_amount.unwrap_or(existing.min_amount),
            input.max_discount.unwrap_or(existing.max_discount),
        )?;

        let code = input.code.as_deref().map(normalize_code);
        if let Some(code) = &code {
            if code.is_empty() {
                return Err(ServiceError::ValidationError(
                    "code must not be empty".to_string(),
                ));
            }
            if let Some(other) = Self::find_by_code(&*self.db, code).await? {
                if other.id != id {
                    return Err(ServiceError::Conflict(format!(
                        "Coupon code {} already exists",
                        code
                    )));
                }
            }
        }

        let mut active: coupon::ActiveModel = existing.into();
        if let Some(code) = code.clone() {
            active.code = Set(code);
        }
        if let Some(discount) = input.discount {
            active.discount = Set(discount);
        }
        if let Some(valid_till) = input.valid_till {
            active.valid_till = Set(valid_till);
        }
        if let Some(min_amount) = input.min_amount {
            active.min_amount = Set(min_amount);
        }
        if let Some(max_discount) = input.max_discount {
            active.max_discount = Set(max_discount);
        }
        active.updated_at = Set(Utc::now());

        active
            .update(&*self.db)
            .await
            .map_err(|e| map_unique_violation(e, code.as_deref().unwrap_or_default()))
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = coupon::Entity::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("Coupon not found".to_string()));
        }
        info!(coupon_id = %id, "Deleted coupon");
        Ok(())
    }
}
