//! Verification codes and the deal terms fingerprint

use crate::error::{MarketError, Result};
use crate::types::{BidID, Hash, ListingID, UserID};
use blake2::{Blake2b512, Digest};
use rand::rngs::OsRng;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::MIN_CODE_LENGTH;

/// Characters codes are drawn from; no 0/O or 1/I to misread over the phone
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A short secret one party reads out to the relationship manager
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationCode(String);

impl VerificationCode {
    /// Draw a fresh code of `length` characters from the OS CSPRNG
    pub fn generate(length: usize) -> Result<Self> {
        if length < MIN_CODE_LENGTH {
            return Err(MarketError::Configuration(format!(
                "verification codes must be at least {} characters",
                MIN_CODE_LENGTH
            )));
        }
        let mut rng = OsRng;
        let code = (0..length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a code presented out of band, ignoring case and
    /// surrounding whitespace
    pub fn matches(&self, presented: &str) -> bool {
        let presented = presented.trim().to_ascii_uppercase();
        // Constant-time over equal lengths
        presented.len() == self.0.len()
            && presented
                .bytes()
                .zip(self.0.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerificationCode(******)")
    }
}

impl fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three per-role codes of one deal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealCodes {
    pub buyer: VerificationCode,
    pub seller: VerificationCode,
    pub rm: VerificationCode,
}

impl DealCodes {
    /// Issue three pairwise-distinct codes
    pub fn issue(length: usize) -> Result<Self> {
        let buyer = VerificationCode::generate(length)?;
        let seller = distinct_from(length, &[&buyer])?;
        let rm = distinct_from(length, &[&buyer, &seller])?;
        Ok(Self { buyer, seller, rm })
    }
}

fn distinct_from(length: usize, taken: &[&VerificationCode]) -> Result<VerificationCode> {
    loop {
        let code = VerificationCode::generate(length)?;
        if taken.iter().all(|other| **other != code) {
            return Ok(code);
        }
    }
}

/// Fields a deal's fingerprint covers
pub struct DealTerms<'a> {
    pub listing_id: &'a ListingID,
    pub bid_id: &'a BidID,
    pub buyer_id: &'a UserID,
    pub seller_id: &'a UserID,
    pub base_price: Decimal,
    pub quantity: u64,
}

/// Blake2b fingerprint over the agreed terms
pub fn terms_hash(terms: &DealTerms<'_>) -> Hash {
    let mut hasher = Blake2b512::new();
    hasher.update(terms.listing_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(terms.bid_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(terms.buyer_id.0.as_bytes());
    hasher.update(b"|");
    hasher.update(terms.seller_id.0.as_bytes());
    hasher.update(b"|");
    hasher.update(terms.base_price.normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(terms.quantity.to_be_bytes());
    let result = hasher.finalize();

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result[..32]);
    Hash(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_code_uses_alphabet() {
        let code = VerificationCode::generate(8).unwrap();
        assert_eq!(code.as_str().len(), 8);
        assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_short_codes_refused() {
        assert!(VerificationCode::generate(4).is_err());
    }

    #[test]
    fn test_issued_codes_are_distinct() {
        for _ in 0..50 {
            let codes = DealCodes::issue(MIN_CODE_LENGTH).unwrap();
            assert_ne!(codes.buyer, codes.seller);
            assert_ne!(codes.buyer, codes.rm);
            assert_ne!(codes.seller, codes.rm);
        }
    }

    #[test]
    fn test_code_matching() {
        let code = VerificationCode("ABC234".to_string());
        assert!(code.matches("ABC234"));
        assert!(code.matches(" abc234 "));
        assert!(!code.matches("ABC235"));
        assert!(!code.matches("ABC2345"));
    }

    #[test]
    fn test_debug_hides_code() {
        let code = VerificationCode("ABC234".to_string());
        assert!(!format!("{:?}", code).contains("ABC234"));
    }

    #[test]
    fn test_terms_hash_is_stable() {
        let listing = ListingID::from("lst_1");
        let bid = BidID::from("bid_1");
        let buyer = UserID::from("buyer");
        let seller = UserID::from("seller");
        let terms = |price| DealTerms {
            listing_id: &listing,
            bid_id: &bid,
            buyer_id: &buyer,
            seller_id: &seller,
            base_price: price,
            quantity: 50,
        };

        assert_eq!(terms_hash(&terms(dec!(105))), terms_hash(&terms(dec!(105.00))));
        assert_ne!(terms_hash(&terms(dec!(105))), terms_hash(&terms(dec!(106))));
    }
}
