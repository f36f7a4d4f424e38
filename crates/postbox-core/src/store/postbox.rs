//! The store engine: a single writer thread that owns the SQLite connection
//! and executes queued transactions strictly in submission order.
//!
//! Callers never touch the database directly. They box a closure into a job,
//! send it over the command channel and await a oneshot reply that resolves
//! only after the job committed and every affected view published its new
//! snapshot. The next job starts after that.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};

use super::changes::CommitChanges;
use super::chat_list::initialize_chat_list;
use super::db::Database;
use super::media_box::MediaBox;
use super::transaction::Transaction;
use super::views::{ViewKey, ViewRegistry, ViewSubscription, ViewUpdate};
use crate::config::CoreConfig;
use crate::error::{PostboxError, StorageError};
use crate::seed::SeedConfiguration;
use crate::stats::SharedTransactionStats;

/// Type-erased job executed on the writer thread.
pub(crate) trait PendingTransaction: Send {
    fn run(&mut self, txn: &mut Transaction<'_>) -> Result<(), StorageError>;

    /// Called after commit and view publication.
    fn complete(self: Box<Self>);

    fn fail(self: Box<Self>, error: PostboxError);
}

struct TypedTransaction<F, R> {
    work: Option<F>,
    result: Option<R>,
    reply: oneshot::Sender<Result<R, PostboxError>>,
}

impl<F, R> PendingTransaction for TypedTransaction<F, R>
where
    F: FnOnce(&mut Transaction<'_>) -> Result<R, StorageError> + Send + 'static,
    R: Send + 'static,
{
    fn run(&mut self, txn: &mut Transaction<'_>) -> Result<(), StorageError> {
        if let Some(work) = self.work.take() {
            self.result = Some(work(txn)?);
        }
        Ok(())
    }

    fn complete(self: Box<Self>) {
        let this = *self;
        let outcome = this.result.ok_or_else(|| PostboxError::Fatal {
            message: "transaction completed without running".to_string(),
        });
        // The caller may have stopped waiting.
        let _ = this.reply.send(outcome);
    }

    fn fail(self: Box<Self>, error: PostboxError) {
        let _ = self.reply.send(Err(error));
    }
}

pub(crate) enum PostboxCommand {
    Transaction(Box<dyn PendingTransaction>),
    Subscribe {
        key: ViewKey,
        id: u64,
        sender: tokio_mpsc::UnboundedSender<ViewUpdate>,
    },
    Unsubscribe {
        key: ViewKey,
        id: u64,
    },
    Shutdown,
}

struct PostboxInner {
    commands: Sender<PostboxCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_subscriber_id: AtomicU64,
    seed: Arc<SeedConfiguration>,
    stats: SharedTransactionStats,
    media_box: MediaBox,
}

impl Drop for PostboxInner {
    fn drop(&mut self) {
        let _ = self.commands.send(PostboxCommand::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            // A job holding the last handle is dropped on the writer itself.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Cheaply cloneable handle to the store engine.
#[derive(Clone)]
pub struct Postbox {
    inner: Arc<PostboxInner>,
}

impl Postbox {
    /// Open (or create) the on-disk store described by `config`.
    pub fn open(config: &CoreConfig, seed: SeedConfiguration) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Database::open(config.database_path())?;
        let media_box = MediaBox::new(config.media_dir())?;
        tracing::info!(path = %config.database_path().display(), "Opening postbox");
        Self::start(db, seed, media_box)
    }

    /// Store that lives only as long as the handle; used by tests and tools.
    pub fn open_in_memory(seed: SeedConfiguration) -> Result<Self, StorageError> {
        Self::start(Database::open_in_memory()?, seed, MediaBox::disabled())
    }

    fn start(db: Database, seed: SeedConfiguration, media_box: MediaBox) -> Result<Self, StorageError> {
        initialize_chat_list(db.connection(), &seed)?;

        let seed = Arc::new(seed);
        let stats = SharedTransactionStats::new();
        let (commands, command_rx) = mpsc::channel::<PostboxCommand>();

        let writer = Writer {
            db,
            seed: seed.clone(),
            media_box: media_box.clone(),
            stats: stats.clone(),
            views: ViewRegistry::default(),
            version: 0,
            poisoned: None,
        };
        let worker = std::thread::Builder::new()
            .name("postbox-writer".to_string())
            .spawn(move || writer.run(command_rx))?;

        Ok(Self {
            inner: Arc::new(PostboxInner {
                commands,
                worker: Mutex::new(Some(worker)),
                next_subscriber_id: AtomicU64::new(1),
                seed,
                stats,
                media_box,
            }),
        })
    }

    /// Queue `work` behind every previously submitted job. The job is
    /// submitted immediately; the returned future only waits for the reply.
    pub fn transaction<F, R>(&self, work: F) -> impl Future<Output = Result<R, PostboxError>> + Send + 'static
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R, StorageError> + Send + 'static,
        R: Send + 'static,
    {
        let receiver = self.submit(work);
        async move {
            match receiver {
                Some(receiver) => receiver.await.unwrap_or(Err(PostboxError::Closed)),
                None => Err(PostboxError::Closed),
            }
        }
    }

    /// Blocking form of [`Postbox::transaction`] for callers outside an async
    /// runtime. Must not be called from within one.
    pub fn transaction_blocking<F, R>(&self, work: F) -> Result<R, PostboxError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R, StorageError> + Send + 'static,
        R: Send + 'static,
    {
        match self.submit(work) {
            Some(receiver) => receiver.blocking_recv().unwrap_or(Err(PostboxError::Closed)),
            None => Err(PostboxError::Closed),
        }
    }

    fn submit<F, R>(&self, work: F) -> Option<oneshot::Receiver<Result<R, PostboxError>>>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<R, StorageError> + Send + 'static,
        R: Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job = Box::new(TypedTransaction {
            work: Some(work),
            result: None,
            reply,
        });
        self.inner
            .commands
            .send(PostboxCommand::Transaction(job))
            .ok()
            .map(|_| receiver)
    }

    /// Subscribe to a view. The first update is the snapshot current after
    /// every previously submitted job.
    pub fn subscribe(&self, key: ViewKey) -> ViewSubscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = tokio_mpsc::unbounded_channel();
        if self
            .inner
            .commands
            .send(PostboxCommand::Subscribe {
                key: key.clone(),
                id,
                sender,
            })
            .is_err()
        {
            tracing::warn!(?key, "Subscribing to a closed postbox");
        }
        ViewSubscription::new(key, id, receiver, self.inner.commands.clone())
    }

    pub fn seed(&self) -> &SeedConfiguration {
        &self.inner.seed
    }

    pub fn stats(&self) -> SharedTransactionStats {
        self.inner.stats.clone()
    }

    pub fn media_box(&self) -> &MediaBox {
        &self.inner.media_box
    }
}

struct Writer {
    db: Database,
    seed: Arc<SeedConfiguration>,
    media_box: MediaBox,
    stats: SharedTransactionStats,
    views: ViewRegistry,
    /// Commit sequence number
    version: u64,
    /// Set by the first storage failure; every later job fails with it.
    poisoned: Option<String>,
}

impl Writer {
    fn run(mut self, commands: Receiver<PostboxCommand>) {
        tracing::debug!("Postbox writer started");

        while let Ok(command) = commands.recv() {
            match command {
                PostboxCommand::Transaction(job) => self.handle_transaction(job),
                PostboxCommand::Subscribe { key, id, sender } => self.handle_subscribe(key, id, sender),
                PostboxCommand::Unsubscribe { key, id } => self.views.unsubscribe(&key, id),
                PostboxCommand::Shutdown => {
                    tracing::debug!("Postbox writer shutting down");
                    break;
                }
            }
        }

        tracing::debug!("Postbox writer stopped");
    }

    fn handle_transaction(&mut self, mut job: Box<dyn PendingTransaction>) {
        if let Some(message) = &self.poisoned {
            self.stats.record_failure();
            job.fail(PostboxError::Fatal {
                message: message.clone(),
            });
            return;
        }

        let started = Instant::now();
        let changes = match self.execute(job.as_mut()) {
            Ok(changes) => changes,
            Err(error) => {
                self.poison(&error);
                self.stats.record_failure();
                job.fail(PostboxError::Fatal {
                    message: error.to_string(),
                });
                return;
            }
        };

        self.version += 1;
        if !changes.orphaned_media.is_empty() {
            let removed = self.media_box.remove_resources(&changes.orphaned_media);
            tracing::debug!(removed, "Removed orphaned media files");
        }
        if !changes.is_empty() {
            if let Err(error) = self
                .views
                .refresh(self.db.connection(), &self.seed, &changes, self.version)
            {
                // The job itself committed; only later work is refused.
                self.poison(&error);
            }
        }

        self.stats.record_commit(started.elapsed(), self.version);
        job.complete();
    }

    fn execute(&mut self, job: &mut dyn PendingTransaction) -> Result<CommitChanges, StorageError> {
        let tx = self.db.connection_mut().transaction()?;
        let mut changes = CommitChanges::default();
        {
            let mut txn = Transaction::new(&tx, &self.seed, &mut changes);
            job.run(&mut txn)?;
            txn.finalize()?;
        }
        tx.commit()?;
        Ok(changes)
    }

    fn handle_subscribe(&mut self, key: ViewKey, id: u64, sender: tokio_mpsc::UnboundedSender<ViewUpdate>) {
        if self.poisoned.is_some() {
            tracing::warn!(?key, "Refusing view subscription on poisoned postbox");
            return;
        }
        if let Err(error) = self.views.subscribe(
            self.db.connection(),
            &self.seed,
            key,
            id,
            sender,
            self.version,
        ) {
            self.poison(&error);
        }
    }

    fn poison(&mut self, error: &StorageError) {
        tracing::error!("Postbox storage failure, refusing further work: {}", error);
        self.poisoned = Some(error.to_string());
    }
}
