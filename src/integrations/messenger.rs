use crate::{error::Error, send_message, ActorRef, Rto};

/// Opaque identifier of a posted announcement, as minted by the transport.
pub type MessageHandle = String;

/// Interactive controls attached to an outbound notification.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Markup {
    /// Approve/decline controls for a pending registration.
    ApprovalPrompt { participant: i64 },
    /// Confirm/cancel controls for a bulk delete.
    BulkDeleteConfirm,
}

/// Requests understood by the messaging transport.
///
/// This is the full surface the core needs from whatever chat platform the
/// deployment runs on; everything else about the transport stays behind the
/// actor boundary.
pub enum MessengerRequest {
    /// Direct message to one person.
    Notify(i64, String, Option<Markup>, Rto<()>),
    /// Post to the announcement channel, returning an editable handle.
    Announce(String, String, Rto<MessageHandle>),
    /// Rewrite an earlier announcement in place.
    EditAnnouncement(String, MessageHandle, String, Rto<()>),
}

pub type MessengerActor = ActorRef<MessengerRequest>;

/// Fire-and-forget direct message. A failed delivery is logged and otherwise
/// dropped; it must never undo a mutation that already committed.
pub async fn notify_best_effort(messenger: &MessengerActor, recipient: i64, text: impl Into<String>) {
    let text = text.into();
    if let Err(err) = send_message!(messenger, MessengerRequest, Notify, recipient, text, None) {
        let err = Error::Delivery(err.to_string());
        log::warn!("Dropping notification to {}: {}", recipient, err);
    }
}
