//! Pure billing rules: no I/O, no clock reads.

pub mod calendar;
pub mod client_state;
pub mod commission;
pub mod invoice;
pub mod money;
pub mod proration;
pub mod reconcile;
pub mod subscription_state;
pub mod tax;

pub use commission::{Commission, CommissionBasis, compute_commission};
pub use invoice::{InvoiceTotals, bills_recurring, charge_line, recurring_line, totals};
pub use proration::{Proration, cancellation_proration, start_proration};
pub use reconcile::{DEFAULT_TOLERANCE_PERCENT, MatchOutcome, expected_cost, match_invoice};
pub use subscription_state::{SubscriptionEvent, SubscriptionState};
pub use tax::{RegistryVerdict, TaxBuyer, TaxDecision, TaxMode, TaxResolver, VatId};
