//! # Request Validation
//!
//! One declarative rule table per operation, evaluated uniformly
//! against the raw request JSON before any service is invoked. A
//! handler runs its table, then deserializes into the typed request;
//! the table gives precise field-level errors, the typed model
//! guarantees shape.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

/// A single validation constraint.
pub enum Constraint {
    /// Value must be a string containing a UUID.
    Uuid,

    /// Value must be a decimal string: positive, bounded scale.
    Money { max_scale: u32 },

    /// Value must be one of the listed strings.
    OneOf(&'static [&'static str]),

    /// String value must not exceed this many characters.
    MaxLength(usize),

    /// Value must differ from another field's value.
    DifferentFrom(&'static str),
}

/// One row of a rule table: which field, whether it must be present,
/// and what must hold when it is.
pub struct Rule {
    pub field: &'static str,
    pub required: bool,
    pub constraint: Constraint,
}

/// Rules for `POST /transfers`.
pub const INITIATE_TRANSFER_RULES: &[Rule] = &[
    Rule {
        field: "sourceWalletId",
        required: true,
        constraint: Constraint::Uuid,
    },
    Rule {
        field: "kind",
        required: true,
        constraint: Constraint::OneOf(&["p2p", "bridge"]),
    },
    Rule {
        field: "destWalletId",
        required: false,
        constraint: Constraint::Uuid,
    },
    Rule {
        field: "destWalletId",
        required: false,
        constraint: Constraint::DifferentFrom("sourceWalletId"),
    },
    Rule {
        field: "direction",
        required: false,
        constraint: Constraint::OneOf(&["primary_to_custodial", "custodial_to_primary"]),
    },
    Rule {
        field: "amount",
        required: true,
        constraint: Constraint::Money { max_scale: 2 },
    },
    Rule {
        field: "idempotencyKey",
        required: false,
        constraint: Constraint::MaxLength(64),
    },
    Rule {
        field: "note",
        required: false,
        constraint: Constraint::MaxLength(256),
    },
];

/// Evaluate a rule table against a request payload.
///
/// Returns the first violation as `"field: problem"`.
pub fn validate(rules: &[Rule], payload: &Value) -> Result<(), String> {
    for rule in rules {
        let value = payload.get(rule.field);

        let value = match value {
            None | Some(Value::Null) => {
                if rule.required {
                    return Err(format!("{}: field is required", rule.field));
                }
                continue;
            }
            Some(value) => value,
        };

        check(rule, value, payload).map_err(|msg| format!("{}: {}", rule.field, msg))?;
    }
    Ok(())
}

fn check(rule: &Rule, value: &Value, payload: &Value) -> Result<(), String> {
    match &rule.constraint {
        Constraint::Uuid => {
            let s = as_str(value)?;
            Uuid::parse_str(s).map_err(|_| "must be a UUID".to_string())?;
            Ok(())
        }
        Constraint::Money { max_scale } => {
            let s = as_str(value)?;
            let amount: Decimal = s
                .parse()
                .map_err(|_| "must be a decimal amount like \"100.50\"".to_string())?;
            decimal_to_cents_scaled(amount, *max_scale)?;
            Ok(())
        }
        Constraint::OneOf(allowed) => {
            let s = as_str(value)?;
            if allowed.contains(&s) {
                Ok(())
            } else {
                Err(format!("must be one of: {}", allowed.join(", ")))
            }
        }
        Constraint::MaxLength(max) => {
            let s = as_str(value)?;
            if s.chars().count() <= *max {
                Ok(())
            } else {
                Err(format!("must be at most {} characters", max))
            }
        }
        Constraint::DifferentFrom(other) => {
            if payload.get(*other) == Some(value) {
                Err(format!("must differ from {}", other))
            } else {
                Ok(())
            }
        }
    }
}

fn as_str(value: &Value) -> Result<&str, String> {
    value.as_str().ok_or_else(|| "must be a string".to_string())
}

/// Convert a validated decimal amount to integer cents.
///
/// Amounts travel as decimal strings end to end; this is the single
/// place they become the integer minor units everything else uses.
pub fn decimal_to_cents(amount: Decimal) -> Result<i64, String> {
    decimal_to_cents_scaled(amount, 2)
}

fn decimal_to_cents_scaled(amount: Decimal, max_scale: u32) -> Result<i64, String> {
    let amount = amount.normalize();
    if amount <= Decimal::ZERO {
        return Err("must be positive".to_string());
    }
    if amount.scale() > max_scale {
        return Err(format!(
            "supports at most {} decimal places",
            max_scale
        ));
    }
    (amount * Decimal::from(100))
        .to_i64()
        .ok_or_else(|| "out of range".to_string())
}
