//! Invoice receivables detector.
//!
//! Emits "invoice_overdue" for invoices past their due date (magnitude from
//! the overdue staircase) and "invoice_large_outstanding" for overdue
//! invoices of 20k or more (magnitude from the amount staircase), so large
//! receivables escalate patterns even while only a few days late.

use chrono::Duration;

use crate::signals::magnitude::{amount_magnitude, overdue_magnitude};
use crate::types::{NewSignal, ScopeChain, Signal, SignalSource};

use super::{Detector, DetectorContext};

/// Amounts at or above this emit the companion large-outstanding signal.
const LARGE_OUTSTANDING_FLOOR: f64 = 20_000.0;

#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub id: String,
    pub client_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub days_overdue: i64,
    pub url: Option<String>,
}

/// Source feed collaborator for invoice records.
pub trait InvoiceFeed {
    fn fetch(&self) -> Result<Vec<InvoiceRecord>, String>;
}

pub struct InvoiceOverdueDetector<F: InvoiceFeed> {
    feed: F,
}

impl<F: InvoiceFeed> InvoiceOverdueDetector<F> {
    pub fn new(feed: F) -> Self {
        Self { feed }
    }

    fn emit(
        &self,
        ctx: &DetectorContext,
        invoice: &InvoiceRecord,
        signal_type: &str,
        magnitude: f64,
    ) -> Option<Signal> {
        if ctx.has_active(signal_type, &invoice.id) {
            return None;
        }
        let mut scope = ctx
            .scopes
            .resolve("invoice", &invoice.id)
            .unwrap_or_else(ScopeChain::default);
        if scope.client_id.is_none() {
            scope.client_id = invoice.client_id.clone();
        }

        match Signal::create(NewSignal {
            signal_type: signal_type.to_string(),
            valence: -1,
            magnitude,
            entity_type: "invoice".to_string(),
            entity_id: invoice.id.clone(),
            scope,
            source: SignalSource {
                source_type: Some("invoice".to_string()),
                source_id: Some(invoice.id.clone()),
                source_url: invoice.url.clone(),
                source_excerpt: Some(format!(
                    "{} {:.0} outstanding, {}d overdue",
                    invoice.currency, invoice.amount, invoice.days_overdue
                )),
            },
            detection_confidence: 1.0,
            attribution_confidence: 1.0,
            // The receivable became overdue at its due date; headline
            // rendering buckets the overdue age off this timestamp
            occurred_at: ctx.now - Duration::days(invoice.days_overdue),
            expires_at: Some(ctx.now + Duration::days(90)),
            detector_id: self.detector_id().to_string(),
            detector_version: self.detector_version().to_string(),
        }) {
            Ok(signal) => Some(signal),
            Err(e) => {
                log::warn!("Skipping signal for invoice {}: {}", invoice.id, e);
                None
            }
        }
    }
}

impl<F: InvoiceFeed> Detector for InvoiceOverdueDetector<F> {
    fn detector_id(&self) -> &'static str {
        "invoice_overdue_detector"
    }

    fn detector_version(&self) -> &'static str {
        "1"
    }

    fn signal_types(&self) -> &'static [&'static str] {
        &["invoice_overdue", "invoice_large_outstanding"]
    }

    fn detect(&self, ctx: &DetectorContext) -> Result<Vec<Signal>, String> {
        let invoices = self.feed.fetch()?;

        let mut signals = Vec::new();
        for invoice in &invoices {
            if invoice.days_overdue < 1 {
                continue;
            }
            signals.extend(self.emit(
                ctx,
                invoice,
                "invoice_overdue",
                overdue_magnitude(invoice.days_overdue),
            ));
            if invoice.amount >= LARGE_OUTSTANDING_FLOOR {
                signals.extend(self.emit(
                    ctx,
                    invoice,
                    "invoice_large_outstanding",
                    amount_magnitude(invoice.amount),
                ));
            }
        }
        Ok(signals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::test_support::MapScopeResolver;
    use chrono::Utc;
    use std::collections::HashSet;

    struct FixedFeed(Vec<InvoiceRecord>);

    impl InvoiceFeed for FixedFeed {
        fn fetch(&self) -> Result<Vec<InvoiceRecord>, String> {
            Ok(self.0.clone())
        }
    }

    fn invoice(id: &str, amount: f64, days_overdue: i64) -> InvoiceRecord {
        InvoiceRecord {
            id: id.to_string(),
            client_id: Some("c1".to_string()),
            amount,
            currency: "AED".to_string(),
            days_overdue,
            url: None,
        }
    }

    fn detect(records: Vec<InvoiceRecord>) -> Vec<Signal> {
        let active = HashSet::new();
        let scopes = MapScopeResolver::default();
        let ctx = DetectorContext {
            now: Utc::now(),
            active: &active,
            scopes: &scopes,
        };
        InvoiceOverdueDetector::new(FixedFeed(records))
            .detect(&ctx)
            .expect("detect")
    }

    #[test]
    fn test_small_overdue_invoice_single_signal() {
        let signals = detect(vec![invoice("i1", 3_000.0, 5)]);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, "invoice_overdue");
        assert!((signals[0].magnitude - 0.5).abs() < 1e-9);
        assert_eq!(signals[0].scope.client_id.as_deref(), Some("c1"));
        let age = (Utc::now() - signals[0].occurred_at).num_days();
        assert_eq!(age, 5, "occurred_at is the due date");
    }

    #[test]
    fn test_large_invoice_emits_companion() {
        let signals = detect(vec![invoice("i1", 60_000.0, 2)]);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].signal_type, "invoice_overdue");
        assert!((signals[0].magnitude - 0.3).abs() < 1e-9);
        assert_eq!(signals[1].signal_type, "invoice_large_outstanding");
        assert!((signals[1].magnitude - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_not_overdue_ignored() {
        assert!(detect(vec![invoice("i1", 90_000.0, 0)]).is_empty());
    }

    #[test]
    fn test_dedup_per_type() {
        let mut active = HashSet::new();
        active.insert(("invoice_overdue".to_string(), "i1".to_string()));
        let scopes = MapScopeResolver::default();
        let ctx = DetectorContext {
            now: Utc::now(),
            active: &active,
            scopes: &scopes,
        };
        let signals = InvoiceOverdueDetector::new(FixedFeed(vec![invoice("i1", 60_000.0, 2)]))
            .detect(&ctx)
            .expect("detect");
        // The overdue key is taken; the large-outstanding key is not
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, "invoice_large_outstanding");
    }
}
