//! Order number generation.
//!
//! Order numbers use a `CP-` prefix so they can never collide with
//! gateway-assigned payment ids (plain numerics) and stay easy to read
//! over the phone with a customer.
//!
//! Format: `CP-{10 uppercase hex chars}`

use uuid::Uuid;

const ORDER_PREFIX: &str = "CP-";

/// Generate a fresh order number.
pub fn new_order_number() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", ORDER_PREFIX, hex[..10].to_uppercase())
}

/// Cheap format check to reject garbage before hitting the database.
pub fn is_valid_order_number(s: &str) -> bool {
    let Some(rest) = s.strip_prefix(ORDER_PREFIX) else {
        return false;
    };
    !rest.is_empty() && rest.len() <= 32 && rest.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_numbers_are_valid() {
        for _ in 0..50 {
            let n = new_order_number();
            assert!(is_valid_order_number(&n), "invalid: {}", n);
        }
    }

    #[test]
    fn rejects_foreign_ids() {
        assert!(!is_valid_order_number("123456789"));
        assert!(!is_valid_order_number("CP-"));
        assert!(!is_valid_order_number("cp-ABC123"));
        assert!(!is_valid_order_number("CP-AB C123"));
    }
}
