// src/models.rs

use rust_decimal::Decimal;
use validator::ValidationError;

pub mod auth;
pub mod chat;
pub mod inventory;
pub mod logistics;
pub mod orders;
pub mod rbac;
pub mod sales;
pub mod tenancy;

pub(crate) fn validate_not_negative(val: &Decimal) -> Result<(), ValidationError> {
    if val.is_sign_negative() && !val.is_zero() {
        let mut err = ValidationError::new("not_negative");
        err.add_param("min".into(), &0.0);
        return Err(err);
    }
    Ok(())
}

pub(crate) fn validate_positive(val: &Decimal) -> Result<(), ValidationError> {
    if *val <= Decimal::ZERO {
        let mut err = ValidationError::new("positive");
        err.add_param("min".into(), &0.0);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_rules() {
        assert!(validate_positive(&Decimal::ONE).is_ok());
        assert!(validate_positive(&Decimal::ZERO).is_err());
        assert!(validate_not_negative(&Decimal::ZERO).is_ok());
        assert!(validate_not_negative(&Decimal::NEGATIVE_ONE).is_err());
    }
}
