//! Per-task execution: recipient resolution, attachment staging, send.
//!
//! Runs strictly sequentially inside the drain loop. The steps and their
//! failure outcomes:
//!
//! 1. normalize the recipient into a network address
//! 2. registration check: unregistered recipients are never sent to
//! 3. text-only sends go out as one message
//! 4. attachments resolve and send in order; the text rides as the caption
//!    of the first one; the first failure aborts the rest (already-sent
//!    attachments are not retracted)

use tracing::debug;

use crate::address;
use crate::driver::{AttachmentSendOptions, ConnectionDriver};
use crate::store::{ContentStore, StoreError};
use crate::types::{DeliveryOutcome, SendTask};

/// Execute one task against the driver and produce its terminal outcome.
///
/// Never panics and never returns more than one outcome; all failure modes
/// collapse into the [`DeliveryOutcome`] variants.
pub async fn deliver(
    driver: &dyn ConnectionDriver,
    store: &dyn ContentStore,
    country_prefix: &str,
    task: &SendTask,
) -> DeliveryOutcome {
    let recipient_address = address::normalize(&task.recipient, country_prefix);
    debug!(task = %task.id, address = %recipient_address, "executing send task");

    match driver.is_recipient_registered(&recipient_address).await {
        Ok(true) => {}
        Ok(false) => return DeliveryOutcome::RecipientNotRegistered,
        Err(e) => return DeliveryOutcome::TransportError(e.to_string()),
    }

    if task.attachment_refs.is_empty() {
        let Some(text) = task.text_body.as_deref() else {
            // Validation upstream guarantees text or attachments; an empty
            // task has nothing to do.
            return DeliveryOutcome::Delivered;
        };
        return match driver.send_text(&recipient_address, text).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::TransportError(e.to_string()),
        };
    }

    for (index, reference) in task.attachment_refs.iter().enumerate() {
        let staged = match store.resolve(reference).await {
            Ok(staged) => staged,
            Err(e @ (StoreError::NotFound(_) | StoreError::UnsupportedType(_))) => {
                return DeliveryOutcome::AttachmentError(e.to_string());
            }
            Err(StoreError::Io(e)) => {
                return DeliveryOutcome::AttachmentError(e.to_string());
            }
        };

        let options = AttachmentSendOptions {
            // The message text rides as the caption of the first attachment.
            caption: if index == 0 {
                task.text_body.clone()
            } else {
                None
            },
            as_document: staged.is_video(),
        };

        if let Err(e) = driver
            .send_attachment(&recipient_address, &staged, &options)
            .await
        {
            return DeliveryOutcome::AttachmentError(e.to_string());
        }
    }

    DeliveryOutcome::Delivered
}
