//! The Lightning payment backend capability.
//!
//! The core only needs two operations: create an invoice, and ask whether the
//! invoice behind a payment hash has been settled. [`PaymentBackend`] is
//! dyn-compatible so a policy can hold `Arc<dyn PaymentBackend>`.
//!
//! [`MockBackend`] keeps invoices in memory and is meant for tests, demos and
//! local development. A node-backed implementation (LND REST) lives in
//! `l402-http`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use rand::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A boxed, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An invoice as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    /// Payment hash, lower-case hex of the 32 raw bytes.
    pub payment_hash: String,
    /// BOLT-11 payment request.
    pub payment_request: String,
    /// Amount in the smallest currency unit.
    pub amount: u64,
}

impl Invoice {
    /// Decodes [`Invoice::payment_hash`] into raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidInvoice`] if the hash is not 64 hex characters.
    pub fn payment_hash_bytes(&self) -> Result<[u8; 32], BackendError> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(&self.payment_hash, &mut out)
            .map_err(|e| BackendError::InvalidInvoice(format!("payment hash: {e}")))?;
        Ok(out)
    }
}

/// Errors reported by a payment backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached or refused the call.
    #[error("payment backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered with something that is not a usable invoice.
    #[error("invalid invoice from payment backend: {0}")]
    InvalidInvoice(String),
}

/// Invoice creation and settlement lookup.
pub trait PaymentBackend: Send + Sync {
    /// Creates an invoice for `amount` smallest units.
    fn create_invoice<'a>(
        &'a self,
        amount: u64,
        memo: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Invoice, BackendError>>;

    /// Reports whether the invoice behind `payment_hash` (hex) is settled.
    ///
    /// Unknown hashes are reported as not settled.
    fn verify_payment<'a>(
        &'a self,
        payment_hash: &'a str,
    ) -> BoxFuture<'a, Result<bool, BackendError>>;
}

impl<T: PaymentBackend + ?Sized> PaymentBackend for Arc<T> {
    fn create_invoice<'a>(
        &'a self,
        amount: u64,
        memo: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Invoice, BackendError>> {
        (**self).create_invoice(amount, memo)
    }

    fn verify_payment<'a>(
        &'a self,
        payment_hash: &'a str,
    ) -> BoxFuture<'a, Result<bool, BackendError>> {
        (**self).verify_payment(payment_hash)
    }
}

#[derive(Debug, Clone)]
struct MockInvoice {
    preimage: [u8; 32],
    memo: Option<String>,
    settled: bool,
}

/// In-memory backend with random preimages and manual settlement.
#[derive(Debug, Default)]
pub struct MockBackend {
    invoices: DashMap<String, MockInvoice>,
    auto_settle: bool,
    unavailable: AtomicBool,
}

impl MockBackend {
    /// Creates a backend whose invoices stay unpaid until [`settle`](Self::settle).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every new invoice as settled on creation.
    #[must_use]
    pub fn with_auto_settle(mut self) -> Self {
        self.auto_settle = true;
        self
    }

    /// Makes every subsequent call fail with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Marks an invoice as paid. Returns `false` for unknown hashes.
    pub fn settle(&self, payment_hash: &str) -> bool {
        self.invoices
            .get_mut(payment_hash)
            .map(|mut invoice| invoice.settled = true)
            .is_some()
    }

    /// The hex preimage of an invoice, as a paying wallet would learn it.
    #[must_use]
    pub fn preimage_for(&self, payment_hash: &str) -> Option<String> {
        self.invoices
            .get(payment_hash)
            .map(|invoice| hex::encode(invoice.preimage))
    }

    /// The memo an invoice was created with.
    #[must_use]
    pub fn memo_for(&self, payment_hash: &str) -> Option<String> {
        self.invoices
            .get(payment_hash)
            .and_then(|invoice| invoice.memo.clone())
    }

    /// Number of invoices created so far.
    #[must_use]
    pub fn invoice_count(&self) -> usize {
        self.invoices.len()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("mock backend switched off".into()));
        }
        Ok(())
    }
}

impl PaymentBackend for MockBackend {
    fn create_invoice<'a>(
        &'a self,
        amount: u64,
        memo: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Invoice, BackendError>> {
        Box::pin(async move {
            self.check_available()?;
            let preimage: [u8; 32] = rng().random();
            let payment_hash = hex::encode(Sha256::digest(preimage));
            let payment_request = format!("lnbcrt{amount}n1mock{}", &payment_hash[..16]);
            self.invoices.insert(
                payment_hash.clone(),
                MockInvoice {
                    preimage,
                    memo: memo.map(str::to_owned),
                    settled: self.auto_settle,
                },
            );
            Ok(Invoice {
                payment_hash,
                payment_request,
                amount,
            })
        })
    }

    fn verify_payment<'a>(
        &'a self,
        payment_hash: &'a str,
    ) -> BoxFuture<'a, Result<bool, BackendError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self
                .invoices
                .get(payment_hash)
                .is_some_and(|invoice| invoice.settled))
        })
    }
}
