use std::{fs, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use futures::{future::BoxFuture, FutureExt};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinSet,
};

use crate::{
    core::{
        cmd::parse_event,
        db::DutyDb,
        runtime::{OperationalMode, RuntimeState},
        scheduler,
        settings::Settings,
        workflow::{self, DutyActor, DutyRequest},
    },
    integrations::init_integrations,
};

mod core;
mod error;
mod integrations;

/// A reference to a long-lived actor task, addressed with typed requests.
pub struct ActorRef<T> {
    tx: UnboundedSender<T>,
}

impl<T> ActorRef<T> {
    pub fn new() -> (Self, UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ActorRef { tx }, rx)
    }

    pub fn send(&self, msg: T) {
        if self.tx.send(msg).is_err() {
            log::error!("Actor channel closed, dropping request");
        }
    }
}

impl<T> Clone for ActorRef<T> {
    fn clone(&self) -> Self {
        ActorRef {
            tx: self.tx.clone(),
        }
    }
}

/// Reply-to handle carried inside an actor request.
pub struct Rto<T> {
    tx: oneshot::Sender<anyhow::Result<T>>,
}

impl<T> Rto<T> {
    pub fn new() -> (Self, oneshot::Receiver<anyhow::Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Rto { tx }, rx)
    }

    /// Sends the result back to the requester. The reply is discarded when
    /// the requester is no longer waiting.
    pub fn reply(self, result: anyhow::Result<T>) {
        if self.tx.send(result).is_err() {
            log::warn!("A request was dropped before its reply was read");
        }
    }
}

/// Sends a request to an actor and awaits the reply.
///
/// `send_message!(actor, Request, Variant, arg...)` expands to
/// `Request::Variant(arg..., rto)` with the reply channel appended.
#[macro_export]
macro_rules! send_message {
    ($actor:expr, $request:ident, $variant:ident $(, $arg:expr)*) => {{
        let (rto, rx) = $crate::Rto::new();
        $actor.send($request::$variant($($arg,)* rto));
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(::anyhow::anyhow!("The actor dropped the request")),
        }
    }};
}

#[derive(Parser, Debug)]
#[command(name = "DutyKeeper")]
#[command(version = "0.1")]
#[command(about = "A duty rotation and attendance service for a classroom.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: RunType,
}

#[derive(Subcommand, Debug)]
enum RunType {
    /// Create a settings file template.
    /// The output .json file will need to be manually edited to fill in the
    /// moderator identity and the announcement channel.
    Create { settings_file: PathBuf },

    /// Run the service sourced from a settings file.
    Run {
        /// Location of the SQLite database. Created on first start.
        #[arg(short, long)]
        db_file: PathBuf,

        settings_file: PathBuf,
    },
}

/// A type for inter-thread communication with an input line and a callback
/// for returning errors.
type ConsoleMessage = (
    String,
    Box<dyn Send + Sync + FnOnce(Option<String>) -> BoxFuture<'static, ()>>,
);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    match &args.command {
        RunType::Create { settings_file } => {
            let template = serde_json::to_string_pretty(&Settings::template())?;
            fs::write(settings_file, template)?;

            println!("Settings created, please open the file in a text editor and fill in the missing fields.");
            Ok(())
        }
        RunType::Run {
            db_file,
            settings_file,
        } => run_service(db_file, settings_file).await,
    }
}

async fn run_service(db_file: &PathBuf, settings_file: &PathBuf) -> anyhow::Result<()> {
    let settings: Settings = serde_json::from_str(&fs::read_to_string(settings_file)?)?;
    settings.validate()?;
    let settings = Arc::new(settings);

    let db = if db_file.exists() {
        DutyDb::load(db_file).await?
    } else {
        log::info!("Database does not exist, creating...");
        DutyDb::init(db_file).await?
    };
    let db = Arc::new(db);

    db.provision_moderator(settings.moderator_id).await?;

    // The channel may have been changed at runtime in a previous life.
    let channel = db.channel(&settings.default_channel).await?;
    let runtime = Arc::new(RuntimeState::new(OperationalMode::Active, channel));

    let mut tasks: JoinSet<Result<(), anyhow::Error>> = JoinSet::new();

    let messenger = init_integrations(&mut tasks);

    let (duty_actor, duty_rx) = DutyActor::new();
    tasks.spawn(workflow::run_duty_manager(
        db.clone(),
        settings.clone(),
        runtime.clone(),
        messenger,
        duty_rx,
    ));

    tasks.spawn(scheduler::run_scheduler(
        settings.clone(),
        runtime.clone(),
        duty_actor.clone(),
    ));

    let (console_tx, console_rx): (
        UnboundedSender<ConsoleMessage>,
        UnboundedReceiver<ConsoleMessage>,
    ) = mpsc::unbounded_channel();

    std::thread::spawn(move || loop {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            break;
        }

        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            break;
        }

        let sent = console_tx.send((
            line,
            Box::new(move |e: Option<String>| {
                async move {
                    if let Some(err) = e {
                        println!("Failed to handle input: {}", err);
                    }
                }
                .boxed()
            }),
        ));
        if sent.is_err() {
            break;
        }
    });

    tasks.spawn(dispatch_console(console_rx, duty_actor));

    log::info!("DutyKeeper initialized");

    // The service runs until the first task finishes: normally the console
    // loop on "exit", otherwise a task failing outright.
    if let Some(result) = tasks.join_next().await {
        result??;
    }
    Ok(())
}

/// Routes console lines into the duty manager.
async fn dispatch_console(
    mut rx: UnboundedReceiver<ConsoleMessage>,
    duty: DutyActor,
) -> anyhow::Result<()> {
    while let Some((line, resp)) = rx.recv().await {
        let result = match parse_event(&line) {
            Ok(event) => send_message!(duty, DutyRequest, Inbound, event),
            Err(err) => Err(err.into()),
        };
        resp(result.err().map(|e| e.to_string())).await;
    }
    Ok(())
}
