use rand::Rng;
use rand::distributions::Alphanumeric;
use ticketmail_core::Store;

const REFERENCE_LEN: usize = 8;

pub(crate) fn random_reference() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERENCE_LEN)
        .map(char::from)
        .collect()
}

/// Maps an address to its customer, creating the customer on first contact.
///
/// Returns 0 when the customer row could not be written. A customer whose
/// contact row fails is still returned and the failure is logged.
pub(crate) async fn resolve_customer(store: &Store, contact: &str, name: Option<&str>) -> i64 {
    if let Some(existing) = store.latest_customer_contact(contact).await {
        return existing.customer_id;
    }

    let fullname = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(contact);
    let customer_id = store.insert_customer(fullname, &random_reference()).await;
    if customer_id == 0 {
        tracing::error!(from = "receiver", contact, "failed to create customer");
        return 0;
    }
    tracing::info!(from = "receiver", customer_id, contact, "new customer created");

    if store.insert_customer_contact(customer_id, contact).await == 0 {
        tracing::error!(
            from = "receiver",
            customer_id,
            contact,
            "customer created without contact row"
        );
    }
    customer_id
}
