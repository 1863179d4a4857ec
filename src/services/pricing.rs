//! Selling prices, discounts and the price calculator.

use crate::config::PricingConfig;
use crate::error::{AppError, ValidationError};
use crate::services::fulfillment::PurchaseKind;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_STARS: u32 = 50;
pub const PREMIUM_PLANS: [u32; 3] = [3, 6, 12];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("at least {min} stars are required, got {quantity}")]
    TooFewStars { quantity: u32, min: u32 },
    #[error("no premium plan for {months} months")]
    UnknownPlan { months: u32 },
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::TooFewStars { quantity, min } => {
                AppError::validation(ValidationError::OutOfRange {
                    field: format!("quantity ({})", quantity),
                    min: Some(min.to_string()),
                    max: None,
                })
            }
            PricingError::UnknownPlan { months } => {
                AppError::validation(ValidationError::OutOfRange {
                    field: format!("months ({})", months),
                    min: Some(PREMIUM_PLANS[0].to_string()),
                    max: Some(PREMIUM_PLANS[PREMIUM_PLANS.len() - 1].to_string()),
                })
            }
        }
    }
}

/// Stars need at least [`MIN_STARS`]; Premium only comes in [`PREMIUM_PLANS`].
pub fn validate_kind(kind: &PurchaseKind) -> Result<(), PricingError> {
    match *kind {
        PurchaseKind::Stars { quantity } if quantity < MIN_STARS => Err(PricingError::TooFewStars {
            quantity,
            min: MIN_STARS,
        }),
        PurchaseKind::Premium { months } if !PREMIUM_PLANS.contains(&months) => {
            Err(PricingError::UnknownPlan { months })
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub base: Decimal,
    pub discount: Option<u8>,
    pub total: Decimal,
}

/// `total × (1 − d/100)` rounded to 2 decimals.
pub fn apply_discount(total: Decimal, discount: Option<u8>) -> Decimal {
    match discount {
        Some(d) if d > 0 => {
            let d = Decimal::from(d.min(100));
            (total * (Decimal::ONE_HUNDRED - d) / Decimal::ONE_HUNDRED).round_dp(2)
        }
        _ => total.round_dp(2),
    }
}

#[derive(Debug, Clone)]
pub struct PricingService {
    config: PricingConfig,
}

impl PricingService {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub fn premium_price(&self, months: u32) -> Result<Decimal, PricingError> {
        match months {
            3 => Ok(self.config.premium_price_3),
            6 => Ok(self.config.premium_price_6),
            12 => Ok(self.config.premium_price_12),
            _ => Err(PricingError::UnknownPlan { months }),
        }
    }

    pub fn base_price(&self, kind: &PurchaseKind) -> Result<Decimal, PricingError> {
        validate_kind(kind)?;
        match *kind {
            PurchaseKind::Stars { quantity } => Ok(self.price_for_stars(quantity)),
            PurchaseKind::Premium { months } => self.premium_price(months),
        }
    }

    pub fn quote(&self, kind: &PurchaseKind, discount: Option<u8>) -> Result<Quote, PricingError> {
        let base = self.base_price(kind)?;
        Ok(Quote {
            base,
            discount,
            total: apply_discount(base, discount),
        })
    }

    pub fn price_for_stars(&self, quantity: u32) -> Decimal {
        (Decimal::from(quantity) * self.config.star_price).round_dp(2)
    }

    /// Whole stars a budget buys at the unit price; 0 when the price is 0.
    pub fn stars_for_budget(&self, budget: Decimal) -> u64 {
        if self.config.star_price <= Decimal::ZERO || budget <= Decimal::ZERO {
            return 0;
        }
        (budget / self.config.star_price)
            .floor()
            .to_u64()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PricingService {
        PricingService::new(PricingConfig::default())
    }

    #[test]
    fn stars_are_priced_per_unit() {
        let quote = service()
            .quote(&PurchaseKind::Stars { quantity: 100 }, None)
            .unwrap();
        assert_eq!(quote.total, Decimal::from(180));
    }

    #[test]
    fn premium_plans_have_fixed_prices() {
        let s = service();
        assert_eq!(s.premium_price(3).unwrap(), Decimal::from(799));
        assert_eq!(s.premium_price(6).unwrap(), Decimal::from(1499));
        assert_eq!(s.premium_price(12).unwrap(), Decimal::from(2499));
        assert_eq!(
            s.premium_price(1),
            Err(PricingError::UnknownPlan { months: 1 })
        );
    }

    #[test]
    fn too_few_stars_is_rejected() {
        assert_eq!(
            service().base_price(&PurchaseKind::Stars { quantity: 49 }),
            Err(PricingError::TooFewStars {
                quantity: 49,
                min: 50
            })
        );
    }

    #[test]
    fn kind_validation_bounds() {
        assert!(validate_kind(&PurchaseKind::Stars { quantity: 50 }).is_ok());
        assert!(validate_kind(&PurchaseKind::Premium { months: 12 }).is_ok());
        assert_eq!(
            validate_kind(&PurchaseKind::Premium { months: 7 }),
            Err(PricingError::UnknownPlan { months: 7 })
        );
    }

    #[test]
    fn discount_is_applied_and_rounded() {
        assert_eq!(
            apply_discount(Decimal::from(799), Some(15)),
            Decimal::new(67915, 2)
        );
        assert_eq!(apply_discount(Decimal::from(100), Some(0)), Decimal::from(100));
        assert_eq!(apply_discount(Decimal::from(100), Some(100)), Decimal::ZERO);
        assert_eq!(apply_discount(Decimal::new(1001, 1), None), Decimal::new(1001, 1));
    }

    #[test]
    fn calculator_round_trips_budget() {
        let s = service();
        assert_eq!(s.price_for_stars(75), Decimal::from(135));
        assert_eq!(s.stars_for_budget(Decimal::from(100)), 55);
        assert_eq!(s.stars_for_budget(Decimal::ZERO), 0);
    }
}
