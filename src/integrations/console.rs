use tokio::sync::mpsc::UnboundedReceiver;

use crate::integrations::messenger::{Markup, MessengerRequest};

/// Reference transport for local runs: outbound traffic is written to the
/// log and announcement handles are minted from a counter. A real chat
/// platform integration replaces this task and nothing else.
pub async fn run_console_messenger(mut rx: UnboundedReceiver<MessengerRequest>) -> anyhow::Result<()> {
    log::debug!("Started console messenger");
    let mut next_handle = 0u64;

    while let Some(request) = rx.recv().await {
        match request {
            MessengerRequest::Notify(recipient, text, markup, rto) => {
                log::info!("[to {}] {}", recipient, text);
                match markup {
                    Some(Markup::ApprovalPrompt { participant }) => {
                        log::info!("[to {}] reply with !approve {} or !decline {}", recipient, participant, participant);
                    }
                    Some(Markup::BulkDeleteConfirm) => {
                        log::info!("[to {}] reply with !confirm or !cancel", recipient);
                    }
                    None => {}
                }
                rto.reply(Ok(()));
            }
            MessengerRequest::Announce(channel, text, rto) => {
                next_handle += 1;
                let handle = format!("console-{}", next_handle);
                log::info!("[channel {}] ({}) {}", channel, handle, text);
                rto.reply(Ok(handle));
            }
            MessengerRequest::EditAnnouncement(channel, handle, text, rto) => {
                log::info!("[channel {}] (edit {}) {}", channel, handle, text);
                rto.reply(Ok(()));
            }
        }
    }

    Ok(())
}
