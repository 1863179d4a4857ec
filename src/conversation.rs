//! Chat flow state for the purchase and top-up dialogs.
//!
//! The chat front end keeps one [`ConversationState`] per user and feeds each
//! button press or text message through [`transition`]. A completed flow
//! yields a [`FlowAction`] for the top-up service or the fulfillment engine.
//! Invalid input returns an error and leaves the state to the caller, who
//! keeps the previous one.

use crate::payments::types::GatewayKind;
use crate::services::fulfillment::{normalize_recipient, PurchaseKind, PurchaseRequest};
use crate::services::pricing::{PricingError, PricingService};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingStarsQuantity,
    AwaitingStarsRecipient {
        quantity: u32,
    },
    AwaitingPremiumRecipient {
        months: u32,
    },
    ConfirmingPurchase {
        kind: PurchaseKind,
        recipient: String,
        total: Decimal,
    },
    AwaitingTopUpAmount,
    AwaitingGateway {
        amount: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationInput {
    BuyStars,
    BuyPremium { months: u32 },
    TopUp,
    /// Free text: a quantity, an amount or a recipient handle
    Text(String),
    /// "For myself" button
    Myself,
    Gateway(GatewayKind),
    Confirm,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub user_id: i64,
    pub username: Option<String>,
    pub discount: Option<u8>,
    pub min_top_up: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowAction {
    Purchase(PurchaseRequest),
    TopUp { amount: Decimal, gateway: GatewayKind },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: ConversationState,
    pub action: Option<FlowAction>,
}

impl Transition {
    fn to(next: ConversationState) -> Self {
        Self { next, action: None }
    }

    fn finish(action: FlowAction) -> Self {
        Self {
            next: ConversationState::Idle,
            action: Some(action),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversationError {
    #[error("'{0}' is not a whole number")]
    NotANumber(String),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("'{0}' is not a valid username")]
    InvalidRecipient(String),
    #[error("the account has no username to gift to")]
    NoOwnUsername,
    #[error("'{0}' is not a valid amount")]
    InvalidAmount(String),
    #[error("the minimum top-up is {min}")]
    BelowMinimum { min: Decimal },
    #[error("unexpected input in this step")]
    Unexpected,
}

fn parse_amount(text: &str) -> Option<Decimal> {
    Decimal::from_str(&text.trim().replace(',', "."))
        .ok()
        .filter(|a| *a > Decimal::ZERO)
}

fn confirm(
    kind: PurchaseKind,
    recipient: String,
    ctx: &ConversationContext,
    pricing: &PricingService,
) -> Result<Transition, ConversationError> {
    let quote = pricing.quote(&kind, ctx.discount)?;
    Ok(Transition::to(ConversationState::ConfirmingPurchase {
        kind,
        recipient,
        total: quote.total,
    }))
}

fn recipient_from(
    input: &ConversationInput,
    ctx: &ConversationContext,
) -> Result<String, ConversationError> {
    match input {
        ConversationInput::Text(text) => {
            normalize_recipient(text).ok_or_else(|| ConversationError::InvalidRecipient(text.clone()))
        }
        ConversationInput::Myself => ctx
            .username
            .as_deref()
            .and_then(normalize_recipient)
            .ok_or(ConversationError::NoOwnUsername),
        _ => Err(ConversationError::Unexpected),
    }
}

pub fn transition(
    state: &ConversationState,
    input: ConversationInput,
    ctx: &ConversationContext,
    pricing: &PricingService,
) -> Result<Transition, ConversationError> {
    use ConversationInput as In;
    use ConversationState as S;

    // Menu entries restart a flow from any step.
    match &input {
        In::Cancel => return Ok(Transition::to(S::Idle)),
        In::BuyStars => return Ok(Transition::to(S::AwaitingStarsQuantity)),
        In::BuyPremium { months } => {
            pricing.premium_price(*months)?;
            return Ok(Transition::to(S::AwaitingPremiumRecipient { months: *months }));
        }
        In::TopUp => return Ok(Transition::to(S::AwaitingTopUpAmount)),
        _ => {}
    }

    match state {
        S::AwaitingStarsQuantity => match input {
            In::Text(text) => {
                let quantity = text
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| ConversationError::NotANumber(text.clone()))?;
                pricing.base_price(&PurchaseKind::Stars { quantity })?;
                Ok(Transition::to(S::AwaitingStarsRecipient { quantity }))
            }
            _ => Err(ConversationError::Unexpected),
        },
        S::AwaitingStarsRecipient { quantity } => {
            let recipient = recipient_from(&input, ctx)?;
            confirm(
                PurchaseKind::Stars {
                    quantity: *quantity,
                },
                recipient,
                ctx,
                pricing,
            )
        }
        S::AwaitingPremiumRecipient { months } => {
            let recipient = recipient_from(&input, ctx)?;
            confirm(PurchaseKind::Premium { months: *months }, recipient, ctx, pricing)
        }
        S::ConfirmingPurchase {
            kind,
            recipient,
            total,
        } => match input {
            In::Confirm => Ok(Transition::finish(FlowAction::Purchase(PurchaseRequest {
                user_id: ctx.user_id,
                kind: *kind,
                recipient: recipient.clone(),
                total: *total,
            }))),
            _ => Err(ConversationError::Unexpected),
        },
        S::AwaitingTopUpAmount => match input {
            In::Text(text) => {
                let amount =
                    parse_amount(&text).ok_or_else(|| ConversationError::InvalidAmount(text.clone()))?;
                if amount < ctx.min_top_up {
                    return Err(ConversationError::BelowMinimum {
                        min: ctx.min_top_up,
                    });
                }
                Ok(Transition::to(S::AwaitingGateway { amount }))
            }
            _ => Err(ConversationError::Unexpected),
        },
        S::AwaitingGateway { amount } => match input {
            In::Gateway(gateway) => Ok(Transition::finish(FlowAction::TopUp {
                amount: *amount,
                gateway,
            })),
            _ => Err(ConversationError::Unexpected),
        },
        S::Idle => Err(ConversationError::Unexpected),
    }
}
