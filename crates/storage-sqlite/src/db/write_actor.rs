use std::any::Any;

use diesel::SqliteConnection;
use log::debug;
use tokio::sync::{mpsc, oneshot};

use super::{DbConnection, DbPool};
use crate::errors::{IntoCore, StorageError};
use barsync_core::errors::{Error, Result};

// A unit of work run on the writer's connection inside one immediate
// transaction. The return type is erased so a single channel can carry jobs
// of every shape.
type Job<T> = Box<dyn FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static>;
type ErasedJob = Job<Box<dyn Any + Send + 'static>>;
type Reply = oneshot::Sender<Result<Box<dyn Any + Send + 'static>>>;

const QUEUE_DEPTH: usize = 1024;

/// Handle for sending jobs to the writer actor.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::Sender<(ErasedJob, Reply)>,
}

impl WriteHandle {
    /// Runs `job` on the writer's dedicated connection. The job's writes
    /// commit together or not at all.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (ret_tx, ret_rx) = oneshot::channel();

        self.tx
            .send((
                Box::new(move |c| job(c).map(|v| Box::new(v) as Box<dyn Any + Send>)),
                ret_tx,
            ))
            .await
            .map_err(|_| Error::WorkerStopped("database writer is not running".to_string()))?;

        let boxed = ret_rx.await.map_err(|_| {
            Error::WorkerStopped("database writer dropped the reply".to_string())
        })??;

        boxed
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| Error::Unexpected("writer returned an unexpected type".to_string()))
    }
}

/// Spawns the single database writer.
///
/// The connection is taken from the pool before spawning, so an exhausted or
/// broken pool is reported here instead of inside the task. Must be called
/// from within a tokio runtime.
pub fn spawn_writer(pool: &DbPool) -> Result<WriteHandle> {
    let conn: DbConnection = pool.get().into_core()?;
    let (tx, rx) = mpsc::channel::<(ErasedJob, Reply)>(QUEUE_DEPTH);

    tokio::spawn(run(conn, rx));

    Ok(WriteHandle { tx })
}

async fn run(mut conn: DbConnection, mut rx: mpsc::Receiver<(ErasedJob, Reply)>) {
    while let Some((job, reply_tx)) = rx.recv().await {
        let result: Result<Box<dyn Any + Send + 'static>> = conn
            .immediate_transaction::<_, StorageError, _>(|c| job(c).map_err(StorageError::from))
            .map_err(Error::from);

        // The requester may have gone away; nothing to do then.
        let _ = reply_tx.send(result);
    }
    debug!("Database writer stopped: all handles dropped");
}
