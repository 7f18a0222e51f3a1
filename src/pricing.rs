//! Fee-adjusted price visibility.
//!
//! Every price shown to a party goes through [`PricingTranslator`]. A party
//! always sees its own figures unadjusted; a figure authored by the other side
//! is shown net of the platform fee:
//!
//! - buyer-authored, shown to the seller: `raw * (1 - f)` (seller's net receipt)
//! - seller-authored, shown to the buyer: `raw * (1 + f)` (buyer's all-in cost)

use crate::error::{MarketError, Result};
use crate::types::{Direction, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Applies the platform fee to prices crossing from one side to the other
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricingTranslator {
    fee_rate: Decimal,
}

/// Per-share and total amounts of a settled trade
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// The raw agreed figure, before fees
    pub base_price: Decimal,
    pub buyer_pays_per_share: Decimal,
    pub seller_receives_per_share: Decimal,
    pub platform_fee_per_share: Decimal,
    pub quantity: u64,
    /// `buyer_pays_per_share * quantity`
    pub total_amount: Decimal,
    pub platform_fee_total: Decimal,
}

impl PricingTranslator {
    pub fn new(fee_rate: Decimal) -> Result<Self> {
        if fee_rate < Decimal::ZERO || fee_rate >= Decimal::ONE {
            return Err(MarketError::Configuration(format!(
                "fee rate must be in [0, 1), got {}",
                fee_rate
            )));
        }
        Ok(Self { fee_rate })
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    /// Reject non-positive prices before they reach any computation
    pub fn validate_price(price: Decimal) -> Result<Decimal> {
        if price <= Decimal::ZERO {
            return Err(MarketError::InvalidPrice(format!(
                "price must be greater than 0, got {}",
                price
            )));
        }
        Ok(price)
    }

    /// Price `viewer` is shown for a figure `authored_by` entered
    pub fn visible_price(&self, raw: Decimal, authored_by: Side, viewer: Side) -> Result<Decimal> {
        if authored_by == viewer {
            return Ok(raw);
        }
        match authored_by {
            Side::Buyer => self.seller_net(raw),
            Side::Seller => self.buyer_gross(raw),
        }
    }

    /// Amount the listing owner's side is told for a figure `authored_by` entered
    pub fn net_price_for_owner(
        &self,
        raw: Decimal,
        authored_by: Side,
        direction: Direction,
    ) -> Result<Decimal> {
        self.visible_price(raw, authored_by, direction.owner_side())
    }

    /// Settlement amounts for the final agreed raw price.
    ///
    /// The buyer always pays the fee on top and the seller always receives the
    /// fee-reduced figure, whoever authored the final round.
    pub fn settlement_breakdown(&self, raw: Decimal, quantity: u64) -> Result<PriceBreakdown> {
        let buyer_pays_per_share = self.buyer_gross(raw)?;
        let seller_receives_per_share = self.seller_net(raw)?;
        let platform_fee_per_share = buyer_pays_per_share - seller_receives_per_share;
        let qty = Decimal::from(quantity);

        let total_amount = buyer_pays_per_share.checked_mul(qty).ok_or_else(|| {
            MarketError::InvalidQuantity(format!(
                "{} shares at {} exceeds the largest representable total",
                quantity, buyer_pays_per_share
            ))
        })?;
        // Bounded by the total, so this cannot overflow once the total fits
        let platform_fee_total = platform_fee_per_share * qty;

        Ok(PriceBreakdown {
            base_price: raw,
            buyer_pays_per_share,
            seller_receives_per_share,
            platform_fee_per_share,
            quantity,
            total_amount,
            platform_fee_total,
        })
    }

    /// Refuse terms that could not be shown to both sides and settled
    pub fn check_terms(&self, raw: Decimal, quantity: u64) -> Result<()> {
        Self::validate_price(raw)?;
        self.settlement_breakdown(raw, quantity).map(|_| ())
    }

    fn buyer_gross(&self, raw: Decimal) -> Result<Decimal> {
        raw.checked_mul(Decimal::ONE + self.fee_rate)
            .ok_or_else(|| MarketError::InvalidPrice(format!("price {} is too large", raw)))
    }

    fn seller_net(&self, raw: Decimal) -> Result<Decimal> {
        raw.checked_mul(Decimal::ONE - self.fee_rate)
            .ok_or_else(|| MarketError::InvalidPrice(format!("price {} is too large", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn translator() -> PricingTranslator {
        PricingTranslator::new(dec!(0.02)).unwrap()
    }

    #[test]
    fn test_seller_authored_shown_to_buyer() {
        assert_eq!(
            translator().visible_price(dec!(100), Side::Seller, Side::Buyer).unwrap(),
            dec!(102)
        );
    }

    #[test]
    fn test_buyer_authored_shown_to_seller() {
        assert_eq!(
            translator().visible_price(dec!(100), Side::Buyer, Side::Seller).unwrap(),
            dec!(98)
        );
    }

    #[test]
    fn test_own_figures_never_adjusted() {
        let pricing = translator();
        assert_eq!(pricing.visible_price(dec!(100), Side::Buyer, Side::Buyer).unwrap(), dec!(100));
        assert_eq!(pricing.visible_price(dec!(100), Side::Seller, Side::Seller).unwrap(), dec!(100));
    }

    #[test]
    fn test_net_price_for_owner() {
        let pricing = translator();
        // Sell listing: owner is the seller, buyer bids 100
        assert_eq!(
            pricing.net_price_for_owner(dec!(100), Side::Buyer, Direction::Sell).unwrap(),
            dec!(98)
        );
        // Buy listing: owner is the buyer, seller offers 100
        assert_eq!(
            pricing.net_price_for_owner(dec!(100), Side::Seller, Direction::Buy).unwrap(),
            dec!(102)
        );
        // Owner's own counter comes back unadjusted
        assert_eq!(
            pricing.net_price_for_owner(dec!(110), Side::Seller, Direction::Sell).unwrap(),
            dec!(110)
        );
    }

    #[test]
    fn test_settlement_breakdown() {
        let breakdown = translator().settlement_breakdown(dec!(105), 50).unwrap();
        assert_eq!(breakdown.buyer_pays_per_share, dec!(107.1));
        assert_eq!(breakdown.seller_receives_per_share, dec!(102.9));
        assert_eq!(breakdown.platform_fee_per_share, dec!(4.2));
        assert_eq!(breakdown.total_amount, dec!(5355));
        assert_eq!(breakdown.platform_fee_total, dec!(210));
    }

    #[test]
    fn test_validate_price() {
        assert!(PricingTranslator::validate_price(dec!(0.01)).is_ok());
        assert!(matches!(
            PricingTranslator::validate_price(dec!(0)),
            Err(MarketError::InvalidPrice(_))
        ));
        assert!(matches!(
            PricingTranslator::validate_price(dec!(-5)),
            Err(MarketError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_oversized_figures_are_errors() {
        let pricing = translator();
        // Shrinking towards the seller still fits; growing towards the buyer does not
        assert!(pricing.visible_price(Decimal::MAX, Side::Buyer, Side::Seller).is_ok());
        assert!(matches!(
            pricing.visible_price(Decimal::MAX, Side::Seller, Side::Buyer),
            Err(MarketError::InvalidPrice(_))
        ));
        assert!(matches!(
            pricing.settlement_breakdown(Decimal::MAX, 1),
            Err(MarketError::InvalidPrice(_))
        ));
        assert!(matches!(
            pricing.settlement_breakdown(dec!(10000000000), u64::MAX),
            Err(MarketError::InvalidQuantity(_))
        ));
        assert!(matches!(
            pricing.check_terms(dec!(10000000000), u64::MAX),
            Err(MarketError::InvalidQuantity(_))
        ));
        assert!(pricing.check_terms(dec!(105), 50).is_ok());
        assert!(pricing.check_terms(dec!(0), 50).is_err());
    }

    #[test]
    fn test_fee_rate_bounds() {
        assert!(PricingTranslator::new(dec!(0)).is_ok());
        assert!(PricingTranslator::new(dec!(1)).is_err());
        assert!(PricingTranslator::new(dec!(-0.01)).is_err());
    }
}
