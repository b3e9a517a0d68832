use tokio::task::JoinSet;

use self::messenger::MessengerActor;

pub mod console;
pub mod messenger;

/// Spawns the messaging transport and hands back its actor handle.
pub fn init_integrations(tasks: &mut JoinSet<Result<(), anyhow::Error>>) -> MessengerActor {
    let (messenger, rx) = MessengerActor::new();

    tasks.spawn(console::run_console_messenger(rx));

    messenger
}
