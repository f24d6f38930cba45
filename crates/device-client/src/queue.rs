//! Offline capture: seal a sale at the register and queue it for upload.

use std::sync::Arc;

use chrono::Utc;
use log::debug;
use uuid::Uuid;

use tillsync_core::crypto;
use tillsync_core::queue::SalePayload;

use crate::error::{DeviceClientError, Result};
use crate::store::LocalStore;
use crate::types::{LocalQueueEntry, LocalQueueStats, LocalSyncStatus, NewSale};

/// Priority assigned to entries put back in line after a failure.
const RETRY_PRIORITY: &str = "CRITICAL";

/// Register-side offline queue.
///
/// Sales are sealed under the paired device key the moment they are captured;
/// the plaintext never touches disk.
pub struct OfflineQueue {
    store: Arc<dyn LocalStore>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// Capture a sale while offline. Returns the generated local transaction
    /// ID. Fails with [`DeviceClientError::NotPaired`] until pairing has
    /// stored key material.
    pub fn enqueue_sale(&self, sale: NewSale) -> Result<String> {
        let credentials = self
            .store
            .credentials()?
            .ok_or(DeviceClientError::NotPaired)?;

        if sale.total_amount.is_sign_negative() {
            return Err(DeviceClientError::invalid_request(
                "sale amount must not be negative",
            ));
        }
        if sale.currency.trim().is_empty() {
            return Err(DeviceClientError::invalid_request(
                "sale currency is required",
            ));
        }

        let local_transaction_id = Uuid::new_v4().to_string();
        let payload = SalePayload {
            local_transaction_id: local_transaction_id.clone(),
            total_amount: sale.total_amount,
            currency: sale.currency,
            customer_id: sale.customer_id,
            payment_method_id: sale.payment_method_id,
            items: sale.items,
        };
        let plaintext = serde_json::to_vec(&payload)?;
        let (iv, ciphertext) = crypto::seal(&credentials.encryption_key, &plaintext)
            .map_err(|e| DeviceClientError::Crypto(e.to_string()))?;

        let now = Utc::now();
        let entry = LocalQueueEntry {
            local_transaction_id: local_transaction_id.clone(),
            encrypted_payload: ciphertext,
            encryption_iv: iv,
            encryption_key_version: credentials.encryption_key_version,
            transaction_timestamp: now,
            transaction_amount: payload.total_amount,
            priority: "HIGH".to_string(),
            staff_actor: sale.staff_actor,
            status: LocalSyncStatus::Queued,
            attempt_count: 0,
            last_error: None,
            created_at: now,
            completed_at: None,
        };
        self.store.insert_entry(&entry)?;
        debug!("Queued offline sale {}", local_transaction_id);
        Ok(local_transaction_id)
    }

    /// Put failed entries back in line at elevated priority.
    pub fn retry_failed(&self) -> Result<usize> {
        self.store.requeue_failed(RETRY_PRIORITY)
    }

    /// Drop entries the server acknowledged at least `retention` ago.
    /// Entries that are QUEUED, SYNCING, or FAILED are never deleted.
    pub fn purge_completed(&self, retention: chrono::Duration) -> Result<usize> {
        self.store.purge_completed(Utc::now() - retention)
    }

    pub fn stats(&self) -> Result<LocalQueueStats> {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteLocalStore;
    use crate::types::DeviceCredentials;
    use rust_decimal_macros::dec;

    fn paired_store() -> (Arc<SqliteLocalStore>, Vec<u8>) {
        let store = Arc::new(SqliteLocalStore::open_in_memory().unwrap());
        let key = crypto::generate_key().to_vec();
        store
            .save_credentials(&DeviceCredentials {
                device_id: "dev-1".to_string(),
                device_name: "Front Counter".to_string(),
                encryption_key: key.clone(),
                encryption_key_version: 3,
                terminal_connection_token: "token".to_string(),
            })
            .unwrap();
        (store, key)
    }

    fn sale(amount: rust_decimal::Decimal) -> NewSale {
        NewSale {
            total_amount: amount,
            currency: "USD".to_string(),
            customer_id: None,
            payment_method_id: Some("pm-1".to_string()),
            items: vec![],
            staff_actor: Some("staff-2".to_string()),
        }
    }

    #[test]
    fn enqueue_seals_payload_under_the_paired_key() {
        let (store, key) = paired_store();
        let queue = OfflineQueue::new(store.clone());

        let id = queue.enqueue_sale(sale(dec!(19.99))).unwrap();
        let entry = store.entry(&id).unwrap().unwrap();
        assert_eq!(entry.encryption_key_version, 3);
        assert_eq!(entry.status, LocalSyncStatus::Queued);
        assert_eq!(entry.transaction_amount, dec!(19.99));

        // Ciphertext opens back to the original sale under the device key.
        let plaintext =
            crypto::open(&key, &entry.encryption_iv, &entry.encrypted_payload).unwrap();
        let payload: SalePayload = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(payload.local_transaction_id, id);
        assert_eq!(payload.total_amount, dec!(19.99));
        assert_eq!(payload.currency, "USD");
    }

    #[test]
    fn unpaired_register_cannot_capture() {
        let store = Arc::new(SqliteLocalStore::open_in_memory().unwrap());
        let queue = OfflineQueue::new(store);
        let err = queue.enqueue_sale(sale(dec!(1.00))).unwrap_err();
        assert!(matches!(err, DeviceClientError::NotPaired));
    }

    #[test]
    fn negative_amount_is_rejected_before_sealing() {
        let (store, _) = paired_store();
        let queue = OfflineQueue::new(store.clone());
        let err = queue.enqueue_sale(sale(dec!(-5.00))).unwrap_err();
        assert!(matches!(err, DeviceClientError::InvalidRequest(_)));
        assert_eq!(store.stats().unwrap().pending(), 0);
    }

    #[test]
    fn retry_failed_requeues_at_critical_priority() {
        let (store, _) = paired_store();
        let queue = OfflineQueue::new(store.clone());
        let id = queue.enqueue_sale(sale(dec!(7.00))).unwrap();
        store
            .set_status(&[id.clone()], LocalSyncStatus::Failed, Some("rejected"))
            .unwrap();

        assert_eq!(queue.retry_failed().unwrap(), 1);
        let entry = store.entry(&id).unwrap().unwrap();
        assert_eq!(entry.status, LocalSyncStatus::Queued);
        assert_eq!(entry.priority, "CRITICAL");
    }
}
