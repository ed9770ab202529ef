//! Shared value types used across the account and saga entities.
//!
//! `AccountId` and `TransactionId` are opaque, non-empty string identifiers;
//! `Amount` is an exact fixed-point decimal (never a float) so that ledger
//! arithmetic never loses cents to rounding.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An exact, non-negative-by-convention monetary amount.
///
/// Arithmetic on `Amount` is plain `Decimal` arithmetic; callers are
/// responsible for checking sign where the domain requires it (e.g. a
/// deposit/withdrawal amount must be strictly positive, while a pending
/// balance may transiently go negative inside a single entity).
pub type Amount = Decimal;

/// Error returned when an identifier fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("identifier must not be empty")]
pub struct EmptyIdError;

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Build an identifier, rejecting the empty string.
            pub fn new(value: impl Into<String>) -> Result<Self, EmptyIdError> {
                let value = value.into();
                if value.is_empty() {
                    Err(EmptyIdError)
                } else {
                    Ok(Self(value))
                }
            }

            /// View the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = EmptyIdError;
            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = EmptyIdError;
            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

opaque_id!(AccountId, "Opaque, non-empty account identifier.");
opaque_id!(
    TransactionId,
    "Opaque, non-empty transaction identifier, globally unique per saga."
);

/// The two operations a saga step can stage against an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delta {
    /// Credit the account by `amount`.
    Deposit {
        /// Amount to deposit; must be strictly positive.
        #[serde(with = "rust_decimal::serde::str")]
        amount: Amount,
    },
    /// Debit the account by `amount`.
    Withdraw {
        /// Amount to withdraw; must be strictly positive.
        #[serde(with = "rust_decimal::serde::str")]
        amount: Amount,
    },
}

impl Delta {
    /// The unsigned magnitude of this delta.
    #[must_use]
    pub fn amount(&self) -> Amount {
        match self {
            Self::Deposit { amount } | Self::Withdraw { amount } => *amount,
        }
    }

    /// The signed effect of this delta on a pending balance: `+amount` for a
    /// deposit, `-amount` for a withdrawal.
    #[must_use]
    pub fn signed(&self) -> Amount {
        match self {
            Self::Deposit { amount } => *amount,
            Self::Withdraw { amount } => -*amount,
        }
    }

    /// Returns `true` if `amount` is strictly positive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.amount() > Amount::ZERO
    }
}
