//! Supplier invoice reconciliation against expected order cost.

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::engine::Engine;
use crate::error::{BillingError, Result};
use crate::models::{OrderLine, OrderState, SupplierInvoiceCheck, SupplierOrder};
use crate::rules::{expected_cost, match_invoice};
use crate::services::metrics::record_reconciliation;

#[derive(Debug, Clone, Deserialize)]
pub struct NewSupplierOrder {
    pub client_id: Uuid,
    pub currency: String,
    pub lines: Vec<OrderLine>,
}

/// Invoice as claimed by the supplier.
#[derive(Debug, Clone, Deserialize)]
pub struct SupplierInvoice {
    pub supplier_reference: String,
    pub total: Decimal,
    pub currency: String,
}

impl Engine {
    #[tracing::instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub async fn create_supplier_order(&self, input: NewSupplierOrder) -> Result<SupplierOrder> {
        if input.lines.is_empty() {
            return Err(BillingError::Validation(
                "an order needs at least one line".to_string(),
            ));
        }
        let negative = input.lines.iter().any(|l| {
            l.base_cost < Decimal::ZERO || l.tiers.iter().any(|t| t.supplier_cost < Decimal::ZERO)
        });
        if negative {
            return Err(BillingError::Validation(
                "supplier costs must not be negative".to_string(),
            ));
        }
        self.load_client(input.client_id).await?;

        let now = self.now();
        let order = SupplierOrder {
            order_id: Uuid::new_v4(),
            client_id: input.client_id,
            currency: input.currency.trim().to_ascii_uppercase(),
            lines: input.lines,
            state: OrderState::AwaitingSupplierInvoice,
            created_utc: now,
            updated_utc: now,
        };
        self.store.insert_order(&order).await?;
        Ok(order)
    }

    /// Check a supplier invoice against the order and move the order on.
    ///
    /// Every check is recorded. A mismatch sends the order to manual review;
    /// a later corrected invoice may still match from there.
    #[tracing::instrument(skip(self, invoice), fields(reference = %invoice.supplier_reference))]
    pub async fn reconcile_supplier_invoice(
        &self,
        order_id: Uuid,
        invoice: SupplierInvoice,
    ) -> Result<SupplierInvoiceCheck> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| BillingError::not_found("order", order_id))?;
        if order.state == OrderState::SupplierInvoiceMatched {
            return Err(BillingError::Conflict(format!(
                "order {} already has a matched supplier invoice",
                order_id
            )));
        }

        let tolerance = self.settings.policy.reconciliation_tolerance_percent;
        let expected = expected_cost(&order.lines);
        let outcome = match_invoice(
            expected,
            &order.currency,
            invoice.total,
            &invoice.currency,
            tolerance,
        );

        let now = self.now();
        let check = SupplierInvoiceCheck {
            check_id: Uuid::new_v4(),
            order_id,
            supplier_reference: invoice.supplier_reference,
            claimed_total: invoice.total,
            claimed_currency: invoice.currency,
            expected_total: expected,
            tolerance_percent: tolerance,
            matched: outcome.matched,
            mismatch_reasons: outcome.reasons,
            checked_utc: now,
        };
        self.store.insert_supplier_check(&check).await?;

        let next = if check.matched {
            OrderState::SupplierInvoiceMatched
        } else {
            OrderState::ManualReview
        };
        if next != order.state
            && !self
                .store
                .update_order_state(order_id, order.state, next, now)
                .await?
        {
            return Err(BillingError::Conflict(format!(
                "order {} changed during reconciliation",
                order_id
            )));
        }

        record_reconciliation(if check.matched { "matched" } else { "mismatch" });
        if check.matched {
            tracing::info!(order_id = %order_id, expected = %expected, "Supplier invoice matched");
        } else {
            tracing::warn!(
                order_id = %order_id,
                expected = %expected,
                claimed = %check.claimed_total,
                reasons = ?check.mismatch_reasons,
                "Supplier invoice flagged for manual review"
            );
        }
        Ok(check)
    }
}
